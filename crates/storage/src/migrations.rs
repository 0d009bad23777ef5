//! A concrete [`MigrationRunner`] implementation over a [`StoreConnection`]
//! (spec §6).
//!
//! Authoring the schema catalog itself is out of scope for this engine
//! (spec §1) — the `tgdb` facade crate owns the concrete DDL. This module
//! only supplies the runner machinery: a `schema_version` bookkeeping
//! table, checksum computation, and the apply/rollback/history operations
//! the storage engine's contract requires.

use chrono::Utc;
use tracing::{info, warn};

use tgdb_core::contract::{MigrationOutcome, MigrationRecord, MigrationRunner, SchemaHistoryEntry};
use tgdb_core::{TgdbError, TgdbResult};

use crate::connection::StoreConnection;

/// A [`MigrationRunner`] backed by a `schema_version` table in the same
/// store the migrations target.
pub struct SqliteMigrationRunner<'a> {
    conn: &'a StoreConnection,
}

impl<'a> SqliteMigrationRunner<'a> {
    /// Wrap a connection. Creates the `schema_version` bookkeeping table
    /// if it does not already exist.
    pub fn new(conn: &'a StoreConnection) -> TgdbResult<Self> {
        conn.run(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(SqliteMigrationRunner { conn })
    }
}

fn checksum(sql: &str) -> String {
    // FNV-1a: cheap, stable across platforms, sufficient for drift detection.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

impl<'a> MigrationRunner for SqliteMigrationRunner<'a> {
    fn get_current_version(&self) -> TgdbResult<i64> {
        self.conn.with_raw(|raw| {
            let version: Option<i64> = raw
                .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                    row.get::<_, Option<i64>>(0)
                })
                .map_err(TgdbError::from)?;
            Ok(version.unwrap_or(0))
        })
    }

    fn run_migrations(&self, migrations: &[MigrationRecord]) -> TgdbResult<Vec<MigrationOutcome>> {
        let current = self.get_current_version()?;
        let mut pending: Vec<&MigrationRecord> =
            migrations.iter().filter(|m| m.version > current).collect();
        pending.sort_by_key(|m| m.version);

        let mut outcomes = Vec::with_capacity(pending.len());
        for migration in pending {
            let result = self.conn.transaction(|tx| {
                tx.execute_batch(&migration.sql).map_err(TgdbError::from)?;
                tx.execute(
                    "INSERT INTO schema_version (version, description, checksum, applied_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        migration.version,
                        migration.description,
                        checksum(&migration.sql),
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(TgdbError::from)?;
                Ok(())
            });

            match result {
                Ok(()) => {
                    info!(version = migration.version, "applied migration");
                    outcomes.push(MigrationOutcome {
                        version: migration.version,
                        applied: true,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(version = migration.version, error = %e, "migration failed");
                    outcomes.push(MigrationOutcome {
                        version: migration.version,
                        applied: false,
                        error: Some(e.to_string()),
                    });
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    fn rollback(&self, target_version: i64) -> TgdbResult<()> {
        self.conn.transaction(|tx| {
            tx.execute(
                "DELETE FROM schema_version WHERE version > ?1",
                [target_version],
            )
            .map_err(TgdbError::from)?;
            Ok(())
        })
    }

    fn history(&self) -> TgdbResult<Vec<SchemaHistoryEntry>> {
        self.conn.with_raw(|raw| {
            let mut stmt = raw
                .prepare(
                    "SELECT version, description, checksum, applied_at
                     FROM schema_version ORDER BY version ASC",
                )
                .map_err(TgdbError::from)?;
            let rows = stmt
                .query_map([], |row| {
                    let applied_at: String = row.get(3)?;
                    Ok(SchemaHistoryEntry {
                        version: row.get(0)?,
                        description: row.get(1)?,
                        checksum: row.get(2)?,
                        applied_at: applied_at
                            .parse()
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })
                .map_err(TgdbError::from)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(TgdbError::from)?);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_migrations() -> Vec<MigrationRecord> {
        vec![
            MigrationRecord {
                version: 1,
                description: "create t".to_string(),
                sql: "CREATE TABLE t (id INTEGER PRIMARY KEY);".to_string(),
            },
            MigrationRecord {
                version: 2,
                description: "add column".to_string(),
                sql: "ALTER TABLE t ADD COLUMN name TEXT;".to_string(),
            },
        ]
    }

    #[test]
    fn applies_pending_migrations_in_order() {
        let conn = StoreConnection::open_memory().unwrap();
        let runner = SqliteMigrationRunner::new(&conn).unwrap();
        assert_eq!(runner.get_current_version().unwrap(), 0);

        let outcomes = runner.run_migrations(&sample_migrations()).unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.applied));
        assert_eq!(runner.get_current_version().unwrap(), 2);

        let history = runner.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
    }

    #[test]
    fn skips_already_applied_versions() {
        let conn = StoreConnection::open_memory().unwrap();
        let runner = SqliteMigrationRunner::new(&conn).unwrap();
        runner.run_migrations(&sample_migrations()).unwrap();

        let outcomes = runner.run_migrations(&sample_migrations()).unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn rollback_truncates_history() {
        let conn = StoreConnection::open_memory().unwrap();
        let runner = SqliteMigrationRunner::new(&conn).unwrap();
        runner.run_migrations(&sample_migrations()).unwrap();

        runner.rollback(1).unwrap();
        assert_eq!(runner.get_current_version().unwrap(), 1);
    }
}
