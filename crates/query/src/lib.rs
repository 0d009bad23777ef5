//! Filtering, pagination, structural queries, integrity checking, and
//! graph traversal over the store (spec §4.8 C8, §4.9 C9).
//!
//! Every operation here is read-only and goes straight to
//! [`tgdb_storage::StoreConnection`] rather than through the transaction
//! manager, the way spec §5 allows ("readers may concurrently use C4
//! `query`"). Row decoding reuses [`tgdb_graph`]'s `node_from_row`/
//! `edge_from_row`/`reference_from_row` and its `NODE_COLUMNS` constant so
//! the column list stays in one place.

#![warn(missing_docs)]

pub mod filter;
pub mod integrity;
pub mod structural;
pub mod traversal;

pub use filter::{ListNodesResult, NodeFilter, Pagination, SortColumn, SortDirection};
pub use integrity::{IntegrityIssue, IntegrityReport, RepairReport};
pub use structural::{Subtree, StructuralQueries};
pub use traversal::{
    CentralityReport, Community, Direction, PathResult, TraversalEngine, TraversalOptions,
};
