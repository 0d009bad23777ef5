//! Node/hierarchy/reference repository and batch engine for the graph
//! store (spec §4.6, §4.7).
//!
//! - [`repository`] — [`GraphRepository`]: node/hierarchy/reference CRUD,
//!   FTS synchronization, reference cleanup, and stats recomputation (C6)
//! - [`batch`] — [`BatchEngine`]: dependency-ordered, chunked application
//!   of [`BatchOp`] sequences with retry and cancellation (C7)
//!
//! Both build on [`tgdb_concurrency::TransactionManager`] for writes and
//! read straight from [`tgdb_storage::StoreConnection`] otherwise.

#![warn(missing_docs)]

pub mod batch;
pub mod repository;

pub use batch::{BatchEngine, BatchOp, BatchOpError, BatchOptions, BatchResult, BatchStats};
pub use repository::{
    edge_from_row, node_from_row, reference_from_row, BatchCreateOutcome, GraphRepository, NodePatch,
    ReferenceCleanupReport, NODE_COLUMNS,
};
