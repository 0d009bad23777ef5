//! The Migration Runner contract (spec §6).
//!
//! Schema creation and evolution are explicitly out of scope for this
//! engine (spec §1): the table set in §3 is created by an external
//! migration runner, and the storage engine only requires this contract
//! from it. Nothing in this crate implements [`MigrationRunner`] — the
//! `tgdb` facade crate supplies a concrete catalog-driven implementation
//! over [`tgdb-storage`](../../tgdb_storage/index.html)'s connection layer.

use chrono::{DateTime, Utc};

use crate::error::TgdbResult;

/// One migration to apply, as supplied by the catalog author.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    /// Monotonically increasing version number.
    pub version: i64,
    /// Human-readable description, recorded in schema history.
    pub description: String,
    /// The DDL/DML to execute for this migration.
    pub sql: String,
}

/// The outcome of applying a single [`MigrationRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    /// Which version this outcome is for.
    pub version: i64,
    /// `true` if the migration applied cleanly.
    pub applied: bool,
    /// Error detail, if `applied` is `false`.
    pub error: Option<String>,
}

/// One row of applied-migration history, as reported by [`MigrationRunner::history`].
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaHistoryEntry {
    /// Applied migration version.
    pub version: i64,
    /// Description recorded at apply time.
    pub description: String,
    /// Checksum of the applied SQL, for drift detection.
    pub checksum: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// The contract the storage engine requires from an external schema
/// migration tool (spec §6, §4.4).
///
/// Applied-version records surfaced by [`MigrationRunner::history`] must
/// correspond 1:1 with rows the runner itself wrote to the store's
/// `schema_version` table — the storage engine never writes that table
/// directly.
pub trait MigrationRunner {
    /// The schema version currently applied to the target database, or `0`
    /// if no migration has ever been applied.
    fn get_current_version(&self) -> TgdbResult<i64>;

    /// Apply every migration in `migrations` whose version is greater than
    /// [`get_current_version`](Self::get_current_version), in ascending
    /// version order. Returns one [`MigrationOutcome`] per migration
    /// attempted; stops at the first failure.
    fn run_migrations(&self, migrations: &[MigrationRecord]) -> TgdbResult<Vec<MigrationOutcome>>;

    /// Roll the schema back to `target_version`, undoing later migrations.
    fn rollback(&self, target_version: i64) -> TgdbResult<()>;

    /// The full history of applied migrations, oldest first.
    fn history(&self) -> TgdbResult<Vec<SchemaHistoryEntry>>;
}
