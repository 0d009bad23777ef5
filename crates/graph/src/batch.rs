//! The batch engine (spec §4.7, C7): apply a sequence of typed operations
//! against the repository with dependency resolution, chunking,
//! transactional/non-transactional modes, progress/cancellation, and
//! retry-on-lock.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tgdb_concurrency::RetryPolicy;
use tgdb_core::{ConstraintKind, Node, NodeType, ReferenceType, TgdbError, TgdbResult, Value};

use crate::repository::{
    create_edge_in_txn, create_reference_in_txn, delete_node_in_txn, fetch_node_in_txn, insert_node,
    sync_fts, update_node_in_txn, GraphRepository, NodePatch,
};

/// Wall-clock budget for one batch chunk's transaction.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// One unit of work the batch engine can apply (spec §4.7).
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Create a node. `depends_on` lists ids (node or op-local) this
    /// operation requires to exist first, for dependency resolution.
    CreateNode { node: Node, depends_on: Vec<String> },
    /// Apply a partial update to an existing node.
    UpdateNode { id: String, patch: NodePatch },
    /// Delete a node, optionally cascading.
    DeleteNode { id: String, cascade: bool },
    /// Create a hierarchy edge.
    CreateHierarchyEdge {
        parent_id: String,
        child_id: String,
        position: Option<u32>,
    },
    /// Move a node under a new parent.
    MoveNode { child_id: String, new_parent_id: String },
    /// Create a reference.
    CreateReference {
        source_id: String,
        target_id: String,
        reference_type: ReferenceType,
        context: Option<String>,
    },
}

impl BatchOp {
    fn kind(&self) -> &'static str {
        match self {
            BatchOp::CreateNode { .. } => "create_node",
            BatchOp::UpdateNode { .. } => "update_node",
            BatchOp::DeleteNode { .. } => "delete_node",
            BatchOp::CreateHierarchyEdge { .. } => "create_hierarchy_edge",
            BatchOp::MoveNode { .. } => "move_node",
            BatchOp::CreateReference { .. } => "create_reference",
        }
    }

    /// The id this operation primarily concerns, for error reporting.
    fn subject_id(&self) -> String {
        match self {
            BatchOp::CreateNode { node, .. } => node.id.clone(),
            BatchOp::UpdateNode { id, .. } => id.clone(),
            BatchOp::DeleteNode { id, .. } => id.clone(),
            BatchOp::CreateHierarchyEdge { child_id, .. } => child_id.clone(),
            BatchOp::MoveNode { child_id, .. } => child_id.clone(),
            BatchOp::CreateReference { source_id, target_id, .. } => format!("{source_id}->{target_id}"),
        }
    }

    fn depends_on(&self) -> &[String] {
        match self {
            BatchOp::CreateNode { depends_on, .. } => depends_on,
            _ => &[],
        }
    }
}

/// Options controlling how a batch is applied (spec §4.7).
pub struct BatchOptions<'a> {
    /// Number of operations committed per transaction chunk.
    pub chunk_size: usize,
    /// Each chunk runs in its own transaction.
    pub transactional: bool,
    /// Keep applying later ops in a chunk after one op fails, instead of
    /// aborting the chunk.
    pub continue_on_error: bool,
    /// Topologically order `CreateNode` ops by `depends_on` before chunking.
    pub resolve_dependencies: bool,
    /// Reject a dependency cycle instead of applying ops in input order.
    pub validate_circular: bool,
    /// Retry a chunk whose commit hit a lock/busy conflict.
    pub retry_on_lock: bool,
    /// Maximum retries per chunk when `retry_on_lock` is set.
    pub max_retries: u32,
    /// Base delay between retries, doubled each attempt.
    pub retry_delay_ms: u64,
    /// Invoked after each op; return `false` to cancel the remaining batch.
    pub on_progress: Option<Box<dyn FnMut(usize, usize) -> bool + 'a>>,
    /// Record per-chunk timing/retry counters in the result.
    pub collect_stats: bool,
}

impl<'a> Default for BatchOptions<'a> {
    fn default() -> Self {
        BatchOptions {
            chunk_size: 100,
            transactional: true,
            continue_on_error: false,
            resolve_dependencies: false,
            validate_circular: false,
            retry_on_lock: true,
            max_retries: 5,
            retry_delay_ms: 10,
            on_progress: None,
            collect_stats: false,
        }
    }
}

/// One failed operation, recorded when `continue_on_error` is set (or when
/// dependency resolution rejects the whole batch up front).
#[derive(Debug, Clone)]
pub struct BatchOpError {
    /// Id the failing operation concerned.
    pub id: String,
    /// Which kind of operation failed.
    pub kind: &'static str,
    /// Human-readable failure reason.
    pub reason: String,
}

/// Per-chunk timing/retry counters, present when `collect_stats` is set.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    /// Number of chunks executed.
    pub chunks_run: usize,
    /// Total retries spent across all chunks.
    pub total_retries: u32,
}

/// The outcome of [`BatchEngine::apply`] (spec §4.7).
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// `true` if the batch finished with no errors and was not cancelled
    /// (or, under `continue_on_error`, did not abort fatally).
    pub success: bool,
    /// Number of ops that were attempted (succeeded or recorded as an error).
    pub completed: usize,
    /// Nodes created.
    pub created: usize,
    /// Nodes/edges/references updated or moved.
    pub updated: usize,
    /// Nodes deleted.
    pub deleted: usize,
    /// Per-op failures.
    pub errors: Vec<BatchOpError>,
    /// `true` if a progress callback returned `false`.
    pub cancelled: bool,
    /// Total retries spent waiting out lock/busy conflicts.
    pub retries: u32,
    /// Number of chunks executed.
    pub chunks: usize,
    /// Timing/retry stats, if `collect_stats` was set.
    pub stats: Option<BatchStats>,
}

/// Applies [`BatchOp`] sequences against a [`GraphRepository`] (spec §4.7, C7).
pub struct BatchEngine<'repo> {
    repo: &'repo GraphRepository,
}

impl<'repo> BatchEngine<'repo> {
    /// Wrap a repository to apply batches against.
    pub fn new(repo: &'repo GraphRepository) -> Self {
        BatchEngine { repo }
    }

    /// Apply `ops` per `options` (spec §4.7's five-step algorithm).
    pub fn apply(&self, ops: Vec<BatchOp>, mut options: BatchOptions<'_>) -> TgdbResult<BatchResult> {
        let ordered = if options.resolve_dependencies {
            match topo_sort(&ops, options.validate_circular) {
                Ok(ordered) => ordered,
                Err(e) => {
                    let mut result = BatchResult::default();
                    result.errors.push(BatchOpError {
                        id: "<batch>".to_string(),
                        kind: "dependency_resolution",
                        reason: e.to_string(),
                    });
                    return Ok(result);
                }
            }
        } else {
            (0..ops.len()).collect()
        };

        let total = ops.len();
        let mut result = BatchResult::default();
        let mut stats = BatchStats::default();

        'chunks: for chunk_indices in ordered.chunks(options.chunk_size.max(1)) {
            result.chunks += 1;
            stats.chunks_run += 1;
            let chunk: Vec<&BatchOp> = chunk_indices.iter().map(|&i| &ops[i]).collect();

            let mut attempt = 0;
            loop {
                let outcome = self.run_chunk(&chunk, &options, &mut result, total);
                match outcome {
                    Ok(stop) => {
                        if stop {
                            break 'chunks;
                        }
                        break;
                    }
                    Err(e) if options.retry_on_lock && e.is_retryable() && attempt < options.max_retries => {
                        attempt += 1;
                        result.retries += 1;
                        stats.total_retries += 1;
                        let backoff = Duration::from_millis(options.retry_delay_ms * 2u64.pow(attempt));
                        thread::sleep(backoff);
                    }
                    Err(e) => {
                        if !options.continue_on_error {
                            result.errors.push(BatchOpError {
                                id: "<chunk>".to_string(),
                                kind: "chunk",
                                reason: e.to_string(),
                            });
                        }
                        break;
                    }
                }
            }

            if let Some(cb) = options.on_progress.as_mut() {
                if !cb(result.completed, total) {
                    result.cancelled = true;
                    break;
                }
            }
        }

        if options.collect_stats {
            result.stats = Some(stats);
        }

        result.success = if options.continue_on_error {
            !result.cancelled
        } else {
            result.errors.is_empty() && !result.cancelled
        };
        Ok(result)
    }

    /// Apply one chunk of ops, either transactionally (all-or-nothing) or
    /// op-by-op. Returns `Ok(true)` if the batch should stop entirely
    /// (reserved for future fatal-abort signaling; currently always `false`
    /// on success).
    fn run_chunk(
        &self,
        chunk: &[&BatchOp],
        options: &BatchOptions<'_>,
        result: &mut BatchResult,
        total: usize,
    ) -> TgdbResult<bool> {
        if options.transactional {
            let applied = self.apply_chunk_transactionally(chunk, options.continue_on_error)?;
            merge(result, applied);
        } else {
            for op in chunk {
                match self.apply_one(op) {
                    Ok(effect) => apply_effect(result, effect),
                    Err(e) => {
                        result.errors.push(BatchOpError {
                            id: op.subject_id(),
                            kind: op.kind(),
                            reason: e.to_string(),
                        });
                        if !options.continue_on_error {
                            break;
                        }
                    }
                }
                result.completed += 1;
            }
        }
        let _ = total;
        Ok(false)
    }

    /// Apply a chunk inside one real transaction. With
    /// `continue_on_error=false`, the first failing op's error is
    /// propagated out of the transaction body, rolling back every op
    /// already applied in this chunk (spec §8 scenario 7). With
    /// `continue_on_error=true`, failures are recorded and the chunk still
    /// commits whatever succeeded.
    fn apply_chunk_transactionally(&self, chunk: &[&BatchOp], continue_on_error: bool) -> TgdbResult<ChunkOutcome> {
        let chunk: Vec<BatchOp> = chunk.iter().map(|op| (*op).clone()).collect();
        self.repo
            .transaction_manager()
            .execute("batch_chunk", RetryPolicy::default(), CHUNK_TIMEOUT, move |tx| {
                let mut outcome = ChunkOutcome::default();
                for op in &chunk {
                    let applied = match op {
                        BatchOp::CreateNode { node, .. } => {
                            insert_node(tx, node).and_then(|_| sync_fts(tx, node)).map(|_| Effect::Created)
                        }
                        BatchOp::UpdateNode { id, patch } => update_node_in_txn(tx, id, patch).map(|_| Effect::Updated),
                        BatchOp::DeleteNode { id, cascade } => {
                            delete_node_in_txn(tx, id, *cascade).map(|_| Effect::Deleted)
                        }
                        BatchOp::CreateHierarchyEdge { parent_id, child_id, position } => {
                            create_edge_in_txn(tx, parent_id, child_id, *position).map(|_| Effect::Updated)
                        }
                        BatchOp::MoveNode { child_id, new_parent_id } => {
                            fetch_node_in_txn(tx, child_id)
                                .and_then(|_| tx.run("DELETE FROM hierarchy_edges WHERE child_id = ?1", [child_id.as_str()]))
                                .and_then(|_| create_edge_in_txn(tx, new_parent_id, child_id, None))
                                .map(|_| Effect::Updated)
                        }
                        BatchOp::CreateReference { source_id, target_id, reference_type, context } => {
                            create_reference_in_txn(tx, source_id, target_id, *reference_type, context.clone())
                                .map(|_| Effect::Updated)
                        }
                    };
                    match applied {
                        Ok(effect) => {
                            outcome.effects.push(effect);
                            outcome.completed += 1;
                        }
                        Err(e) if continue_on_error => {
                            outcome.errors.push(BatchOpError {
                                id: op.subject_id(),
                                kind: op.kind(),
                                reason: e.to_string(),
                            });
                            outcome.completed += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(outcome)
            })
    }

    fn apply_one(&self, op: &BatchOp) -> TgdbResult<Effect> {
        match op {
            BatchOp::CreateNode { node, .. } => {
                self.repo.create_node(node)?;
                Ok(Effect::Created)
            }
            BatchOp::UpdateNode { id, patch } => {
                self.repo.update_node(id, patch.clone())?;
                Ok(Effect::Updated)
            }
            BatchOp::DeleteNode { id, cascade } => {
                self.repo.delete_node(id, *cascade)?;
                Ok(Effect::Deleted)
            }
            BatchOp::CreateHierarchyEdge { parent_id, child_id, position } => {
                self.repo.create_edge(parent_id, child_id, *position)?;
                Ok(Effect::Updated)
            }
            BatchOp::MoveNode { child_id, new_parent_id } => {
                self.repo.move_node(child_id, new_parent_id)?;
                Ok(Effect::Updated)
            }
            BatchOp::CreateReference { source_id, target_id, reference_type, context } => {
                self.repo
                    .create_reference(source_id, target_id, *reference_type, context.clone())?;
                Ok(Effect::Updated)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Effect {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    effects: Vec<Effect>,
    errors: Vec<BatchOpError>,
    completed: usize,
}

fn apply_effect(result: &mut BatchResult, effect: Effect) {
    match effect {
        Effect::Created => result.created += 1,
        Effect::Updated => result.updated += 1,
        Effect::Deleted => result.deleted += 1,
    }
}

fn merge(result: &mut BatchResult, chunk: ChunkOutcome) {
    for effect in chunk.effects {
        apply_effect(result, effect);
    }
    result.errors.extend(chunk.errors);
    result.completed += chunk.completed;
}

/// Topologically order `CreateNode` ops by `depends_on`, leaving
/// non-`CreateNode` ops in their original relative position after all ops
/// they don't depend on. Detects cycles when `validate_circular` is set.
fn topo_sort(ops: &[BatchOp], validate_circular: bool) -> TgdbResult<Vec<usize>> {
    let mut index_by_id: HashMap<String, usize> = HashMap::new();
    for (i, op) in ops.iter().enumerate() {
        if let BatchOp::CreateNode { node, .. } = op {
            index_by_id.insert(node.id.clone(), i);
        }
    }

    let mut visited = vec![false; ops.len()];
    let mut in_progress = vec![false; ops.len()];
    let mut order = Vec::with_capacity(ops.len());

    fn visit(
        i: usize,
        ops: &[BatchOp],
        index_by_id: &HashMap<String, usize>,
        visited: &mut [bool],
        in_progress: &mut [bool],
        order: &mut Vec<usize>,
        validate_circular: bool,
        stack: &mut FxHashSet<usize>,
    ) -> TgdbResult<()> {
        if visited[i] {
            return Ok(());
        }
        if in_progress[i] {
            if validate_circular {
                return Err(TgdbError::constraint(ConstraintKind::Cycle, "circular dependency in batch"));
            }
            return Ok(());
        }
        in_progress[i] = true;
        stack.insert(i);
        for dep in ops[i].depends_on() {
            if let Some(&dep_idx) = index_by_id.get(dep) {
                visit(dep_idx, ops, index_by_id, visited, in_progress, order, validate_circular, stack)?;
            }
        }
        in_progress[i] = false;
        stack.remove(&i);
        visited[i] = true;
        order.push(i);
        Ok(())
    }

    let mut stack = FxHashSet::default();
    for i in 0..ops.len() {
        visit(i, ops, &index_by_id, &mut visited, &mut in_progress, &mut order, validate_circular, &mut stack)?;
    }
    Ok(order)
}
