//! Shared data model, value tree, error taxonomy, and migration-runner
//! contract for the Tana graph store.
//!
//! This crate defines the foundational types used throughout the engine:
//! - [`Node`], [`HierarchyEdge`], [`Reference`], [`NodeStats`] — the property
//!   graph data model (spec §3)
//! - [`SchemaVersion`], [`Import`] — lineage/versioning ledgers
//! - [`Value`] — a tagged JSON value tree standing in for arbitrary
//!   `fields_json`/`metadata_json` trees
//! - [`TgdbError`]/[`TgdbResult`] — the single error sum type returned by
//!   every public operation (spec §7)
//! - [`contract`] — the Migration Runner contract the storage engine
//!   requires from an external schema-migration tool (spec §6)

#![warn(missing_docs)]

pub mod contract;
pub mod error;
pub mod limits;
pub mod types;
pub mod value;

pub use contract::{MigrationOutcome, MigrationRecord, MigrationRunner, SchemaHistoryEntry};
pub use error::{ConstraintKind, TgdbError, TgdbResult};
pub use limits::{is_valid_node_id, LimitRule};
pub use types::{
    HierarchyEdge, Import, ImportStatus, Node, NodeStats, NodeType, Reference, ReferenceType,
    SchemaVersion,
};
pub use value::Value;
