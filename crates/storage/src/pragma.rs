//! Tunable pragma presets for the embedded store (spec §4.4).
//!
//! `rusqlite` opens a file with conservative defaults; this module applies
//! the tuned set of `PRAGMA` statements a given deployment profile calls
//! for, in one batch, right after the connection is established.

use rusqlite::Connection;
use tracing::debug;

use tgdb_core::TgdbResult;

/// A named pragma profile (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PragmaPreset {
    /// Favors fast iteration and visibility into errors over throughput:
    /// synchronous writes, small cache.
    Development,
    /// Favors durability and steady-state throughput for a long-lived
    /// on-disk store: WAL journaling, `NORMAL` synchronous, larger cache.
    Production,
    /// Tuned for an in-memory database: no journal, no fsync.
    Memory,
    /// Favors raw throughput over crash-safety guarantees for bulk loads
    /// (e.g. ingest): `OFF` synchronous, large cache and mmap window.
    HighPerformance,
}

/// The resolved pragma values for a preset (spec §4.4 recognized keys).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaConfig {
    /// `journal_mode`: `DELETE`, `WAL`, `MEMORY`, …
    pub journal_mode: &'static str,
    /// `synchronous`: `OFF`, `NORMAL`, `FULL`.
    pub synchronous: &'static str,
    /// `foreign_keys`: `ON`/`OFF`.
    pub foreign_keys: bool,
    /// `cache_size`; negative values are KiB, per SQLite convention.
    pub cache_size: i64,
    /// `mmap_size` in bytes.
    pub mmap_size: i64,
    /// `temp_store`: `DEFAULT`, `FILE`, `MEMORY`.
    pub temp_store: &'static str,
    /// `auto_vacuum`: `NONE`, `FULL`, `INCREMENTAL`.
    pub auto_vacuum: &'static str,
    /// `wal_autocheckpoint` in pages.
    pub wal_autocheckpoint: i64,
    /// `busy_timeout` in milliseconds.
    pub busy_timeout_ms: i64,
}

impl PragmaPreset {
    /// Resolve the preset to its concrete pragma values.
    pub fn config(self) -> PragmaConfig {
        match self {
            PragmaPreset::Development => PragmaConfig {
                journal_mode: "DELETE",
                synchronous: "FULL",
                foreign_keys: true,
                cache_size: -2_000,
                mmap_size: 0,
                temp_store: "DEFAULT",
                auto_vacuum: "NONE",
                wal_autocheckpoint: 1_000,
                busy_timeout_ms: 5_000,
            },
            PragmaPreset::Production => PragmaConfig {
                journal_mode: "WAL",
                synchronous: "NORMAL",
                foreign_keys: true,
                cache_size: -16_000,
                mmap_size: 268_435_456,
                temp_store: "MEMORY",
                auto_vacuum: "INCREMENTAL",
                wal_autocheckpoint: 1_000,
                busy_timeout_ms: 10_000,
            },
            PragmaPreset::Memory => PragmaConfig {
                journal_mode: "MEMORY",
                synchronous: "OFF",
                foreign_keys: true,
                cache_size: -8_000,
                mmap_size: 0,
                temp_store: "MEMORY",
                auto_vacuum: "NONE",
                wal_autocheckpoint: 0,
                busy_timeout_ms: 5_000,
            },
            PragmaPreset::HighPerformance => PragmaConfig {
                journal_mode: "WAL",
                synchronous: "OFF",
                foreign_keys: true,
                cache_size: -65_536,
                mmap_size: 1_073_741_824,
                temp_store: "MEMORY",
                auto_vacuum: "NONE",
                wal_autocheckpoint: 10_000,
                busy_timeout_ms: 30_000,
            },
        }
    }
}

/// Apply a pragma configuration to an open connection.
pub fn apply(conn: &Connection, config: &PragmaConfig) -> TgdbResult<()> {
    conn.pragma_update(None, "journal_mode", config.journal_mode)?;
    conn.pragma_update(None, "synchronous", config.synchronous)?;
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    conn.pragma_update(None, "cache_size", config.cache_size)?;
    conn.pragma_update(None, "mmap_size", config.mmap_size)?;
    conn.pragma_update(None, "temp_store", config.temp_store)?;
    conn.pragma_update(None, "auto_vacuum", config.auto_vacuum)?;
    conn.pragma_update(None, "wal_autocheckpoint", config.wal_autocheckpoint)?;
    conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms as u64))?;
    debug!(
        journal_mode = config.journal_mode,
        synchronous = config.synchronous,
        cache_size = config.cache_size,
        "applied pragma configuration"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_have_distinct_journal_modes() {
        assert_eq!(PragmaPreset::Development.config().journal_mode, "DELETE");
        assert_eq!(PragmaPreset::Production.config().journal_mode, "WAL");
        assert_eq!(PragmaPreset::Memory.config().journal_mode, "MEMORY");
        assert_eq!(PragmaPreset::HighPerformance.config().journal_mode, "WAL");
    }

    #[test]
    fn apply_production_preset_on_memory_connection() {
        let conn = Connection::open_in_memory().unwrap();
        apply(&conn, &PragmaPreset::Production.config()).unwrap();
        let fk: i64 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
