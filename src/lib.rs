//! `tgdb`: an embedded graph store for Tana knowledge-graph JSON exports
//! (spec §1 overview).
//!
//! This crate wires the seven component crates into one entry point:
//! - [`tgdb_storage`] — connection, pragma presets, migration runner
//! - [`tgdb_concurrency`] — transaction manager, event bus
//! - [`tgdb_graph`] — node/hierarchy/reference repository, batch engine
//! - [`tgdb_ingest`] — streaming scan/transform/ingest pipeline
//! - [`tgdb_query`] — filtering, structural queries, integrity, traversal
//! - [`tgdb_search`] — FTS ranking, facets, similarity, hybrid, autocomplete
//!
//! [`schema`] owns the concrete `CREATE TABLE` catalog, applied through
//! [`tgdb_storage::SqliteMigrationRunner`] the first time a store opens.

#![warn(missing_docs)]

pub mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use tgdb_concurrency::{EventBus, TransactionManager};
use tgdb_core::contract::MigrationRunner;
use tgdb_core::{Import, ImportStatus, Node, TgdbError, TgdbResult, Value};
use tgdb_graph::{BatchEngine, GraphRepository};
use tgdb_ingest::{IngestOptions, IngestPipeline, IngestReport};
use tgdb_query::filter::{list_nodes, ListNodesResult, NodeFilter, Pagination};
use tgdb_query::integrity::{self, IntegrityReport, RepairReport};
use tgdb_query::structural::{StructuralQueries, Subtree};
use tgdb_query::traversal::TraversalEngine;
use tgdb_search::facets::{self, FacetReport};
use tgdb_search::{self as search};
use tgdb_storage::{PragmaPreset, SqliteMigrationRunner, StoreConnection};

/// The embedded graph store. Holds one connection, its transaction
/// manager, and a repository built over both; every other operation
/// (ingest, query, search) borrows from here rather than opening its
/// own connection, since the engine is single-writer per store (spec
/// §1 non-goals).
pub struct TanaStore {
    conn: Arc<StoreConnection>,
    txn: Arc<TransactionManager>,
    repo: GraphRepository,
}

impl TanaStore {
    /// Open (or create) a file-backed store at `path`, applying `preset`
    /// and running any pending schema migrations.
    pub fn open_file(path: impl AsRef<Path>, preset: PragmaPreset) -> TgdbResult<Self> {
        let conn = Arc::new(StoreConnection::open_file(path, preset)?);
        Self::bootstrap(conn)
    }

    /// Open an in-memory store, migrated and ready to use.
    pub fn open_memory() -> TgdbResult<Self> {
        let conn = Arc::new(StoreConnection::open_memory()?);
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Arc<StoreConnection>) -> TgdbResult<Self> {
        {
            let runner = SqliteMigrationRunner::new(&conn)?;
            let outcomes = runner.run_migrations(&schema::catalog())?;
            if let Some(failed) = outcomes.iter().find(|o| !o.applied) {
                return Err(TgdbError::internal(format!(
                    "schema migration {} failed: {}",
                    failed.version,
                    failed.error.clone().unwrap_or_default()
                )));
            }
        }
        let txn = Arc::new(TransactionManager::new(conn.clone()));
        let repo = GraphRepository::new(conn.clone(), txn.clone());
        Ok(TanaStore { conn, txn, repo })
    }

    /// The shared connection, for callers that need direct read access.
    pub fn connection(&self) -> &Arc<StoreConnection> {
        &self.conn
    }

    /// The node/hierarchy/reference repository (C6).
    pub fn repository(&self) -> &GraphRepository {
        &self.repo
    }

    /// A batch engine over this store's repository (C7).
    pub fn batch_engine(&self) -> BatchEngine<'_> {
        BatchEngine::new(&self.repo)
    }

    /// This store's event bus — subscribe to retry/timeout/memory events
    /// emitted by the transaction manager and ingest pipeline.
    pub fn events(&self) -> &EventBus {
        self.txn.events()
    }

    /// Ingest a Tana export (spec §4.3, C3), recording an [`Import`]
    /// ledger row before and after the run. The returned report's errors
    /// are capped at `options.max_errors`; a fatal abort still leaves a
    /// `Failed` ledger row with the partial `node_count`.
    pub fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        options: IngestOptions,
        node_filter: impl FnMut(&Node) -> bool,
        on_progress: impl FnMut(tgdb_ingest::pipeline::ProgressSnapshot),
    ) -> TgdbResult<(Import, IngestReport)> {
        let import_id = self.start_import(filename, bytes)?;
        let pipeline = IngestPipeline::new(self.conn.clone(), self.txn.clone(), options);

        match pipeline.run(bytes, node_filter, on_progress) {
            Ok(report) => {
                let import = self.finish_import(&import_id, ImportStatus::Completed, report.processed, None)?;
                Ok((import, report))
            }
            Err(e) => {
                self.finish_import(&import_id, ImportStatus::Failed, 0, Some(e.to_string()))?;
                Err(e)
            }
        }
    }

    fn start_import(&self, filename: &str, bytes: &[u8]) -> TgdbResult<String> {
        let file_hash = fnv1a_hex(bytes);
        let started_at = Utc::now();
        let id = format!("{file_hash}-{}", started_at.timestamp_nanos_opt().unwrap_or(0));
        self.conn.run(
            "INSERT INTO import (id, filename, file_hash, node_count, started_at, ended_at, status, error, metadata_json) \
             VALUES (?1, ?2, ?3, 0, ?4, NULL, ?5, NULL, '{}')",
            rusqlite::params![id, filename, file_hash, started_at.to_rfc3339(), ImportStatus::Running.as_str()],
        )?;
        Ok(id)
    }

    fn finish_import(
        &self,
        import_id: &str,
        status: ImportStatus,
        node_count: u64,
        error: Option<String>,
    ) -> TgdbResult<Import> {
        let ended_at = Utc::now();
        self.conn.run(
            "UPDATE import SET node_count = ?1, ended_at = ?2, status = ?3, error = ?4 WHERE id = ?5",
            rusqlite::params![node_count as i64, ended_at.to_rfc3339(), status.as_str(), error, import_id],
        )?;
        self.get_import(import_id)
    }

    /// Look up one import ledger row.
    pub fn get_import(&self, import_id: &str) -> TgdbResult<Import> {
        self.conn
            .query(
                "SELECT id, filename, file_hash, node_count, started_at, ended_at, status, error, metadata_json \
                 FROM import WHERE id = ?1",
                [import_id],
                import_from_row,
            )?
            .into_iter()
            .next()
            .ok_or_else(|| TgdbError::not_found("import", import_id))
    }

    /// Paginated, filtered node listing (C8).
    pub fn list_nodes(&self, filter: &NodeFilter, pagination: &Pagination) -> TgdbResult<ListNodesResult> {
        list_nodes(&self.conn, filter, pagination)
    }

    /// Structural queries (subtree, ancestors, descendant count) over the
    /// hierarchy (C8).
    pub fn structural(&self) -> StructuralQueries<'_> {
        StructuralQueries::new(&self.conn)
    }

    /// A node's full subtree (every descendant plus the edges among them).
    pub fn subtree(&self, root_id: &str) -> TgdbResult<Subtree> {
        self.structural().get_subtree(root_id)
    }

    /// Validate referential/structural integrity (orphans, cycles,
    /// duplicate positions) without modifying the store.
    pub fn validate_integrity(&self) -> TgdbResult<IntegrityReport> {
        integrity::validate_integrity(&self.conn)
    }

    /// Validate integrity and repair what can be repaired automatically.
    pub fn validate_and_fix(&self) -> TgdbResult<RepairReport> {
        integrity::validate_and_fix(&self.conn)
    }

    /// Graph traversal (BFS/DFS/shortest-path/all-paths/communities/
    /// centrality) over the in-memory adjacency view (C9).
    pub fn traversal(&self) -> TraversalEngine<'_> {
        TraversalEngine::new(&self.conn)
    }

    /// Ranked full-text search (C10).
    pub fn search(&self, query: &str, weights: search::RankWeights, limit: usize) -> TgdbResult<Vec<search::SearchHit>> {
        search::search(&self.conn, query, weights, limit)
    }

    /// Facet counts (node type, owner, tag, age) over a result set.
    pub fn facets(&self, node_ids: &[String], now: chrono::DateTime<Utc>) -> TgdbResult<FacetReport> {
        facets::compute(&self.conn, node_ids, now)
    }

    /// Jaccard-similar nodes to `node_id`.
    pub fn similar(&self, node_id: &str, similarity_threshold: f64, max_results: usize) -> TgdbResult<Vec<search::SimilarNode>> {
        search::find_similar(&self.conn, node_id, similarity_threshold, max_results)
    }

    /// Autocomplete suggestions for a node-name/tag prefix.
    pub fn autocomplete(&self, prefix: &str, limit: usize) -> TgdbResult<Vec<search::Suggestion>> {
        search::suggest(&self.conn, prefix, limit)
    }
}

fn import_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Import> {
    let status: String = row.get(6)?;
    let started_at: String = row.get(4)?;
    let ended_at: Option<String> = row.get(5)?;
    Ok(Import {
        id: row.get(0)?,
        filename: row.get(1)?,
        file_hash: row.get(2)?,
        node_count: row.get::<_, i64>(3)? as u64,
        started_at: started_at.parse().unwrap_or_else(|_| Utc::now()),
        ended_at: ended_at.and_then(|s| s.parse().ok()),
        status: match status.as_str() {
            "completed" => ImportStatus::Completed,
            "failed" => ImportStatus::Failed,
            _ => ImportStatus::Running,
        },
        error: row.get(7)?,
        metadata: Value::Object(Default::default()),
    })
}

/// FNV-1a over raw bytes, for the import ledger's `file_hash` — matches
/// `tgdb_storage::migrations`'s checksum scheme so the engine has one
/// hashing convention rather than pulling in a digest crate for this.
fn fnv1a_hex(bytes: &[u8]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgdb_query::filter::{Pagination, SortColumn, SortDirection};

    #[test]
    fn opens_migrates_and_ingests() {
        let store = TanaStore::open_memory().unwrap();
        let input = br#"{"nodes":[{"id":"a","name":"Alpha","created":1700000000}]}"#;
        let (import, report) = store.ingest("export.json", input, IngestOptions::default(), |_| true, |_| {}).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(import.status, ImportStatus::Completed);
        assert_eq!(import.node_count, 1);

        let node = store.repository().get_node("a").unwrap();
        assert_eq!(node.name, "Alpha");
    }

    #[test]
    fn ingest_failure_marks_import_failed() {
        let store = TanaStore::open_memory().unwrap();
        let input = br#"{"nodes":[{"name":"missing id"}]}"#;
        let result = store.ingest("bad.json", input, IngestOptions::default(), |_| true, |_| {});
        assert!(result.is_err());

        let rows: Vec<String> = store
            .connection()
            .query("SELECT status FROM import", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, vec!["failed".to_string()]);
    }

    #[test]
    fn list_nodes_after_ingest() {
        let store = TanaStore::open_memory().unwrap();
        let input = br#"{"nodes":[{"id":"a","name":"Alpha","created":1700000000},{"id":"b","name":"Beta","created":1700000001}]}"#;
        store.ingest("export.json", input, IngestOptions::default(), |_| true, |_| {}).unwrap();

        let result = store
            .list_nodes(
                &NodeFilter::default(),
                &Pagination { page: 1, page_size: 10, sort_by: SortColumn::Name, sort_direction: SortDirection::Asc },
            )
            .unwrap();
        assert_eq!(result.data.len(), 2);
        assert_eq!(result.data[0].name, "Alpha");
    }
}
