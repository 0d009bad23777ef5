//! The ingest pipeline (spec §4.3, C3): drives the scanner and transformer
//! with batching, backpressure, progress, error policy, and a memory guard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tgdb_concurrency::{Event, TransactionManager};
use tgdb_core::{Node, Reference, TgdbError, TgdbResult};
use tgdb_graph::GraphRepository;
use tgdb_storage::StoreConnection;

use crate::scanner::{RecordScanner, ScanEvent};
use crate::transformer::{transform, TransformConfig};

/// The only recognized ingest preset knobs (spec §4.3).
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Drop nodes the transformer classifies as system nodes.
    pub skip_system_nodes: bool,
    /// Flush to storage every this many accepted records.
    pub batch_size: usize,
    /// Abort (or warn, per `continue_on_error`) once estimated heap
    /// exceeds this many megabytes.
    pub memory_limit_mb: usize,
    /// Minimum milliseconds between progress callbacks.
    pub progress_interval_ms: u32,
    /// Keep going past transformer/validation errors, up to `max_errors`.
    pub continue_on_error: bool,
    /// Hard cap on accumulated errors before the pipeline aborts.
    pub max_errors: usize,
    /// Retain the raw decoded record alongside each normalized node.
    pub preserve_raw: bool,
    /// Apply content normalization (whitespace collapse, marker strip).
    pub normalize_content: bool,
    /// If set, only these property-bag keys are copied into `Node::fields`.
    pub include_fields: Option<HashSet<String>>,
    /// Property-bag keys excluded from `Node::fields`.
    pub exclude_fields: HashSet<String>,
    /// Run a structural first pass (scanner only) to report a total count
    /// for progress. If `false`, `total` stays `0` throughout.
    pub count_total: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        IngestOptions {
            skip_system_nodes: false,
            batch_size: 500,
            memory_limit_mb: 512,
            progress_interval_ms: 250,
            continue_on_error: false,
            max_errors: 100,
            preserve_raw: false,
            normalize_content: true,
            include_fields: None,
            exclude_fields: HashSet::new(),
            count_total: true,
        }
    }
}

impl IngestOptions {
    fn transform_config(&self) -> TransformConfig {
        TransformConfig {
            normalize_content: self.normalize_content,
            preserve_raw: self.preserve_raw,
            include_fields: self.include_fields.clone(),
            exclude_fields: self.exclude_fields.clone(),
        }
    }
}

/// Outcome of one [`IngestPipeline::run`] call (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Records the scanner discovered (0 if `count_total` was disabled).
    pub total: u64,
    /// Records successfully transformed and written.
    pub processed: u64,
    /// Records skipped — filtered by `skip_system_nodes`/`node_filter`, or
    /// dropped after a tolerated error.
    pub skipped: u64,
    /// Errors accumulated up to `max_errors`, each `(record index, error)`.
    pub errors: Vec<(u64, String)>,
    /// `true` if the memory guard fired a warning at any point.
    pub memory_warned: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// A progress snapshot delivered to the caller's callback (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub struct ProgressSnapshot {
    /// Total discovered (0 if unknown).
    pub total: u64,
    /// Processed so far.
    pub processed: u64,
    /// Skipped so far.
    pub skipped: u64,
    /// Estimated heap usage in megabytes.
    pub heap_mb: usize,
    /// Elapsed time since the run started.
    pub elapsed: Duration,
}

/// Drives C1 (scanner) -> C2 (transformer) -> C7/C6 (batched write) with
/// the preset knobs of spec §4.3.
pub struct IngestPipeline {
    conn: Arc<StoreConnection>,
    repo: GraphRepository,
    txn: Arc<TransactionManager>,
    options: IngestOptions,
}

/// Heap estimate in bytes per buffered, not-yet-flushed node, used by the
/// memory guard in lieu of a real process-RSS reading (no such crate is in
/// this engine's dependency stack; see DESIGN.md).
const ESTIMATED_BYTES_PER_NODE: usize = 2048;

impl IngestPipeline {
    /// Build a pipeline over an open connection, sharing its transaction
    /// manager with the graph repository so writes get retry/timeout for
    /// free.
    pub fn new(conn: Arc<StoreConnection>, txn: Arc<TransactionManager>, options: IngestOptions) -> Self {
        let repo = GraphRepository::new(conn.clone(), txn.clone());
        IngestPipeline { conn, repo, txn, options }
    }

    /// Run the pipeline over `bytes` (the full Tana export, already in
    /// memory for the scanner's byte-range view — the scanner itself never
    /// materializes decoded records ahead of where it has scanned).
    ///
    /// `node_filter` is consulted after normalization/classification; a
    /// `false` return skips the record without counting it as an error.
    /// `on_progress` fires at most every `progress_interval_ms`.
    pub fn run(
        &self,
        bytes: &[u8],
        mut node_filter: impl FnMut(&Node) -> bool,
        mut on_progress: impl FnMut(ProgressSnapshot),
    ) -> TgdbResult<IngestReport> {
        let started = Instant::now();
        let total = if self.options.count_total {
            count_records(bytes, self.options.continue_on_error)
        } else {
            0
        };

        let mut report = IngestReport {
            total,
            ..Default::default()
        };
        let mut batch: Vec<Node> = Vec::new();
        let mut pending_refs: Vec<Reference> = Vec::new();
        let mut last_progress = Instant::now();
        let progress_interval = Duration::from_millis(self.options.progress_interval_ms as u64);
        let transform_config = self.options.transform_config();

        let mut record_index: u64 = 0;
        let events = RecordScanner::scan_complete(bytes, self.options.continue_on_error);

        for event in events {
            match event {
                ScanEvent::Record(range) => {
                    record_index += 1;
                    let record_bytes = &bytes[range];
                    match transform(record_bytes, &transform_config) {
                        Ok(transformed) => {
                            let node = transformed.node;
                            if self.options.skip_system_nodes && node.is_system_node {
                                report.skipped += 1;
                            } else if !node_filter(&node) {
                                report.skipped += 1;
                            } else {
                                let refs: Vec<Reference> = transformed
                                    .references
                                    .into_iter()
                                    .map(|r| r.into_reference(&node.id))
                                    .collect();
                                batch.push(node);
                                pending_refs.extend(refs);
                                self.maybe_flush(&mut batch, &mut pending_refs, &mut report)?;
                            }
                        }
                        Err(e) => {
                            report.errors.push((record_index, e.to_string()));
                            if !self.options.continue_on_error || report.errors.len() >= self.options.max_errors {
                                self.flush_batch(&mut batch, &mut pending_refs, &mut report)?;
                                return Err(TgdbError::internal(format!(
                                    "ingest aborted after {} errors (max_errors={})",
                                    report.errors.len(),
                                    self.options.max_errors
                                )));
                            }
                            report.skipped += 1;
                        }
                    }
                }
                ScanEvent::Error(e) => {
                    report.errors.push((record_index, e.to_string()));
                    if !self.options.continue_on_error || report.errors.len() >= self.options.max_errors {
                        self.flush_batch(&mut batch, &mut pending_refs, &mut report)?;
                        return Err(e);
                    }
                }
            }

            if last_progress.elapsed() >= progress_interval {
                on_progress(ProgressSnapshot {
                    total: report.total,
                    processed: report.processed,
                    skipped: report.skipped,
                    heap_mb: estimated_heap_mb(batch.len()),
                    elapsed: started.elapsed(),
                });
                last_progress = Instant::now();
            }
        }

        self.flush_batch(&mut batch, &mut pending_refs, &mut report)?;
        report.elapsed = started.elapsed();
        on_progress(ProgressSnapshot {
            total: report.total,
            processed: report.processed,
            skipped: report.skipped,
            heap_mb: estimated_heap_mb(0),
            elapsed: report.elapsed,
        });
        Ok(report)
    }

    fn maybe_flush(
        &self,
        batch: &mut Vec<Node>,
        pending_refs: &mut Vec<Reference>,
        report: &mut IngestReport,
    ) -> TgdbResult<()> {
        let heap_mb = estimated_heap_mb(batch.len());
        if heap_mb > self.options.memory_limit_mb {
            self.flush_batch(batch, pending_refs, report)?;
            let heap_mb_after = estimated_heap_mb(batch.len());
            if heap_mb_after > self.options.memory_limit_mb {
                report.memory_warned = true;
                self.txn.events().publish(Event::MemoryWarning {
                    current_mb: heap_mb_after,
                    limit_mb: self.options.memory_limit_mb,
                });
                if !self.options.continue_on_error {
                    return Err(TgdbError::MemoryLimit {
                        current_mb: heap_mb_after,
                        limit_mb: self.options.memory_limit_mb,
                    });
                }
            }
            return Ok(());
        }
        if batch.len() >= self.options.batch_size {
            self.flush_batch(batch, pending_refs, report)?;
        }
        Ok(())
    }

    /// Flush buffered nodes, then the references extracted from them.
    /// References are written after their source nodes commit but are not
    /// rejected for dangling targets (spec §3, §8 scenario 3) — see
    /// [`GraphRepository::batch_create_references`].
    fn flush_batch(
        &self,
        batch: &mut Vec<Node>,
        pending_refs: &mut Vec<Reference>,
        report: &mut IngestReport,
    ) -> TgdbResult<()> {
        if !batch.is_empty() {
            let outcome = self.repo.batch_create_nodes(batch)?;
            report.processed += outcome.created.len() as u64;
            report.skipped += outcome.skipped_duplicates.len() as u64;
            batch.clear();
        }
        if !pending_refs.is_empty() {
            self.repo.batch_create_references(pending_refs)?;
            pending_refs.clear();
        }
        Ok(())
    }

    /// The shared connection, for callers that also need read access
    /// during/after ingest (e.g. to report counts).
    pub fn connection(&self) -> &Arc<StoreConnection> {
        &self.conn
    }
}

fn estimated_heap_mb(buffered_nodes: usize) -> usize {
    (buffered_nodes * ESTIMATED_BYTES_PER_NODE) / (1024 * 1024)
}

/// First-pass structural count: scan for record spans without
/// transforming them (spec §4.3 "Two-pass option").
fn count_records(bytes: &[u8], continue_on_error: bool) -> u64 {
    RecordScanner::scan_complete(bytes, continue_on_error)
        .into_iter()
        .filter(|e| matches!(e, ScanEvent::Record(_)))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgdb_concurrency::TransactionManager;

    fn schema() -> &'static str {
        r#"
        CREATE TABLE nodes (
            id TEXT PRIMARY KEY, name TEXT NOT NULL, content TEXT NOT NULL,
            doc_type TEXT, owner_id TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
            node_type TEXT NOT NULL, is_system_node INTEGER NOT NULL,
            fields_json TEXT NOT NULL, metadata_json TEXT NOT NULL);
        CREATE TABLE hierarchy_edges (parent_id TEXT, child_id TEXT, position INTEGER,
            PRIMARY KEY (parent_id, child_id));
        CREATE TABLE node_references (source_id TEXT, target_id TEXT, reference_type TEXT, context TEXT,
            PRIMARY KEY (source_id, target_id, reference_type));
        CREATE TABLE node_stats (node_id TEXT PRIMARY KEY, access_count INTEGER, incoming_references INTEGER,
            direct_children INTEGER, depth INTEGER);
        CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags);
        "#
    }

    fn pipeline() -> IngestPipeline {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        for stmt in schema().split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                conn.run(stmt, []).unwrap();
            }
        }
        let txn = Arc::new(TransactionManager::new(conn.clone()));
        IngestPipeline::new(conn, txn, IngestOptions::default())
    }

    #[test]
    fn minimal_ingest_scenario() {
        // spec §8 scenario 1
        let pipeline = pipeline();
        let input = br#"{"nodes":[{"id":"a","name":"Alpha","created":1700000000}]}"#;
        let report = pipeline.run(input, |_| true, |_| {}).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 0);

        let node = pipeline.repo_for_test().get_node("a").unwrap();
        assert_eq!(node.name, "Alpha");
        assert!(!node.is_system_node);
    }

    #[test]
    fn system_filtering_scenario() {
        // spec §8 scenario 2
        let input = br#"{"nodes":[{"id":"a","name":"A","created":1700000000},{"id":"SYS_1","name":"S","created":1700000000}]}"#;

        let skip = pipeline();
        let mut opts = IngestOptions::default();
        opts.skip_system_nodes = true;
        let skip = IngestPipeline::new(skip.conn.clone(), Arc::new(TransactionManager::new(skip.conn.clone())), opts);
        let report = skip.run(input, |_| true, |_| {}).unwrap();
        assert_eq!(report.processed, 1);

        let keep = pipeline();
        let report2 = keep.run(input, |_| true, |_| {}).unwrap();
        assert_eq!(report2.processed, 2);
        let sys_node = keep.repo_for_test().get_node("SYS_1").unwrap();
        assert!(sys_node.is_system_node);
    }

    #[test]
    fn error_budget_aborts_past_max_errors() {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        for stmt in schema().split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                conn.run(stmt, []).unwrap();
            }
        }
        let txn = Arc::new(TransactionManager::new(conn.clone()));
        let mut opts = IngestOptions::default();
        opts.continue_on_error = true;
        opts.max_errors = 1;
        let pipeline = IngestPipeline::new(conn, txn, opts);
        let input = br#"{"nodes":[{"name":"missing id"},{"name":"also missing"}]}"#;
        let result = pipeline.run(input, |_| true, |_| {});
        assert!(result.is_err());
    }

    impl IngestPipeline {
        fn repo_for_test(&self) -> &GraphRepository {
            &self.repo
        }
    }
}
