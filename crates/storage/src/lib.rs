//! The relational substrate layer for the graph store (spec §4.4, §6).
//!
//! This crate wraps `rusqlite` with:
//! - [`pragma`] — the tunable pragma presets (`Development`, `Production`,
//!   `Memory`, `HighPerformance`) and the recognized pragma key set
//! - [`connection`] — [`StoreConnection`], exposing `query`/`run`/
//!   `transaction` over an open connection, with idempotent close
//! - [`migrations`] — a concrete [`tgdb_core::contract::MigrationRunner`]
//!   implementation bookkept in a `schema_version` table
//!
//! Schema authoring (the actual `CREATE TABLE` catalog) is not this
//! crate's concern (spec §1) — it lives in the facade crate that wires
//! this connection layer to a concrete migration catalog.

#![warn(missing_docs)]

pub mod connection;
pub mod migrations;
pub mod pragma;

pub use connection::{RunOutcome, StoreConnection};
pub use migrations::SqliteMigrationRunner;
pub use pragma::{PragmaConfig, PragmaPreset};
