//! The graph repository (spec §4.6, C6): node/hierarchy/reference CRUD,
//! FTS synchronization, and the two supplemented maintenance operations
//! (`validate_and_clean` for references, `recompute_stats`).
//!
//! Writes go through the [`TransactionManager`] so they get retry,
//! timeout, and event emission for free; reads go straight to the
//! [`StoreConnection`] the way spec §5 allows ("readers may concurrently
//! use C4 `query`").

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Row;
use tracing::debug;

use tgdb_concurrency::{RetryPolicy, TransactionManager, TxnHandle};
use tgdb_core::{limits, ConstraintKind, HierarchyEdge, Node, NodeStats, NodeType, Reference, ReferenceType, TgdbError, TgdbResult, Value};
use tgdb_storage::StoreConnection;

/// Default wall-clock budget for one repository write transaction.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Column list shared by every `SELECT ... FROM nodes` in this crate and
/// in `tgdb-query`/`tgdb-search`, so row decoding stays in one place.
pub const NODE_COLUMNS: &str = "id, name, content, doc_type, owner_id, created_at, updated_at, node_type, is_system_node, fields_json, metadata_json";

/// Decode one `nodes` row selected with [`NODE_COLUMNS`] in order.
pub fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    let fields_json: String = row.get(9)?;
    let metadata_json: String = row.get(10)?;
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        doc_type: row.get(3)?,
        owner_id: row.get(4)?,
        created_at: parse_rfc3339(&row.get::<_, String>(5)?),
        updated_at: parse_rfc3339(&row.get::<_, String>(6)?),
        node_type: NodeType::from_str_lenient(&row.get::<_, String>(7)?),
        is_system_node: row.get::<_, i64>(8)? != 0,
        fields: json_to_value(&fields_json),
        metadata: json_to_value(&metadata_json),
    })
}

/// Decode one `hierarchy_edges` row selected as `parent_id, child_id, position`.
pub fn edge_from_row(row: &Row<'_>) -> rusqlite::Result<HierarchyEdge> {
    Ok(HierarchyEdge {
        parent_id: row.get(0)?,
        child_id: row.get(1)?,
        position: row.get::<_, i64>(2)? as u32,
    })
}

/// Decode one `node_references` row selected as
/// `source_id, target_id, reference_type, context`.
pub fn reference_from_row(row: &Row<'_>) -> rusqlite::Result<Reference> {
    let kind: String = row.get(2)?;
    Ok(Reference {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        reference_type: ReferenceType::parse(&kind).unwrap_or(ReferenceType::Related),
        context: row.get(3)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap())
}

fn json_to_value(s: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(s)
        .map(Value::from)
        .unwrap_or(Value::Object(Default::default()))
}

fn value_to_json(v: &Value) -> String {
    serde_json::to_string(&serde_json::Value::from(v.clone())).unwrap_or_else(|_| "{}".to_string())
}

/// A partial update to a node; `None` leaves the field unchanged. `id` and
/// `created_at` cannot be changed (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    /// New display name.
    pub name: Option<String>,
    /// New content body.
    pub content: Option<String>,
    /// New `doc_type`, or `Some(None)` to clear it.
    pub doc_type: Option<Option<String>>,
    /// New `owner_id`, or `Some(None)` to clear it.
    pub owner_id: Option<Option<String>>,
    /// New node type.
    pub node_type: Option<NodeType>,
    /// New system classification.
    pub is_system_node: Option<bool>,
    /// Replacement property bag.
    pub fields: Option<Value>,
    /// Replacement metadata bag.
    pub metadata: Option<Value>,
}

/// Outcome of a batch node creation (spec §4.6 "skip duplicates silently").
#[derive(Debug, Clone, Default)]
pub struct BatchCreateOutcome {
    /// Ids that were created.
    pub created: Vec<String>,
    /// Ids that already existed and were skipped.
    pub skipped_duplicates: Vec<String>,
}

/// Outcome of [`GraphRepository::validate_and_clean_references`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceCleanupReport {
    /// References removed because an endpoint no longer exists.
    pub orphaned_removed: usize,
    /// Exact-duplicate reference rows removed.
    pub duplicates_removed: usize,
}

/// Node/hierarchy/reference CRUD plus FTS sync (spec §4.6, C6).
pub struct GraphRepository {
    conn: Arc<StoreConnection>,
    txn: Arc<TransactionManager>,
}

impl GraphRepository {
    /// Wrap a connection and the transaction manager that guards its writes.
    pub fn new(conn: Arc<StoreConnection>, txn: Arc<TransactionManager>) -> Self {
        GraphRepository { conn, txn }
    }

    /// The underlying connection, for callers (query/search crates) that
    /// need raw read access.
    pub fn connection(&self) -> &Arc<StoreConnection> {
        &self.conn
    }

    /// The transaction manager guarding writes, for the batch engine to
    /// group multiple operations into one transaction.
    pub(crate) fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.txn
    }

    // ---- nodes ---------------------------------------------------------

    /// Insert a node, echoing the stored row. Duplicate id is a
    /// `Constraint(PrimaryKey)` (spec §4.6).
    pub fn create_node(&self, node: &Node) -> TgdbResult<Node> {
        let node = node.clone();
        self.txn.execute("create_node", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            insert_node(tx, &node)?;
            sync_fts(tx, &node)?;
            Ok(node.clone())
        })
    }

    /// Fetch one node by id.
    pub fn get_node(&self, id: &str) -> TgdbResult<Node> {
        let rows = self
            .conn
            .query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"), [id], node_from_row)?;
        rows.into_iter().next().ok_or_else(|| TgdbError::not_found("node", id))
    }

    /// Apply a partial update. Always advances `updated_at`. Unknown id is
    /// `NotFound` (spec §4.6).
    pub fn update_node(&self, id: &str, patch: NodePatch) -> TgdbResult<Node> {
        let id = id.to_string();
        self.txn
            .execute("update_node", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
                update_node_in_txn(tx, &id, &patch)
            })
    }

    /// Delete a node. With `cascade=false`, refuses if children or
    /// references exist (`Constraint(Dependency)`). With `cascade=true`,
    /// removes hierarchy edges, references, stats, and the FTS row in the
    /// same transaction, then the node itself (spec §4.6).
    pub fn delete_node(&self, id: &str, cascade: bool) -> TgdbResult<()> {
        let id = id.to_string();
        self.txn
            .execute("delete_node", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
                delete_node_in_txn(tx, &id, cascade)
            })
    }

    /// Insert many nodes in one transaction; duplicates are skipped
    /// silently rather than failing the batch (spec §4.6).
    pub fn batch_create_nodes(&self, nodes: &[Node]) -> TgdbResult<BatchCreateOutcome> {
        let nodes = nodes.to_vec();
        self.txn.execute("batch_create_nodes", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            let mut outcome = BatchCreateOutcome::default();
            for node in &nodes {
                let exists: i64 = tx
                    .query("SELECT COUNT(*) FROM nodes WHERE id = ?1", [&node.id], |row| row.get(0))?
                    .into_iter()
                    .next()
                    .unwrap_or(0);
                if exists > 0 {
                    outcome.skipped_duplicates.push(node.id.clone());
                    continue;
                }
                insert_node(tx, node)?;
                sync_fts(tx, node)?;
                outcome.created.push(node.id.clone());
            }
            Ok(outcome)
        })
    }

    /// Insert many references in one transaction, tolerating endpoints
    /// that don't exist as nodes (a dangling target is not rejected here
    /// the way [`create_reference`](Self::create_reference) rejects it —
    /// free-text mentions like `#todo` or `[[Bob]]` are common in a Tana
    /// export and have no backing node; spec §3 calls these "orphaned
    /// references", invalid but reported by the integrity check rather
    /// than refused outright). Only the source endpoint is required to
    /// exist. Exact-duplicate triples are skipped silently, same as
    /// `create_reference`'s unique-constraint behavior but without
    /// failing the batch.
    pub fn batch_create_references(&self, refs: &[Reference]) -> TgdbResult<usize> {
        let refs = refs.to_vec();
        self.txn
            .execute("batch_create_references", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
                let mut created = 0usize;
                for reference in &refs {
                    tx.run(
                        "INSERT OR IGNORE INTO node_references (source_id, target_id, reference_type, context) \
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![
                            reference.source_id,
                            reference.target_id,
                            reference.reference_type.as_str(),
                            reference.context
                        ],
                    )
                    .map(|changes| {
                        if changes > 0 {
                            created += 1;
                        }
                    })?;
                }
                Ok(created)
            })
    }

    // ---- hierarchy -------------------------------------------------------

    /// Create a parent→child edge. Rejects a self-edge and any edge that
    /// would introduce a cycle. With `position` unset, appends after the
    /// current last child; with `position` set and colliding, existing
    /// siblings at or after it shift by one (spec §4.6).
    pub fn create_edge(&self, parent: &str, child: &str, position: Option<u32>) -> TgdbResult<HierarchyEdge> {
        let (parent, child) = (parent.to_string(), child.to_string());
        self.txn.execute("create_edge", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            create_edge_in_txn(tx, &parent, &child, position)
        })
    }

    /// Detach `child` from its current parent (if any) and attach it to
    /// `new_parent` with an auto-assigned position. Rejects a cycle.
    pub fn move_node(&self, child: &str, new_parent: &str) -> TgdbResult<HierarchyEdge> {
        let (child, new_parent) = (child.to_string(), new_parent.to_string());
        self.txn.execute("move_node", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            tx.run("DELETE FROM hierarchy_edges WHERE child_id = ?1", [&child])?;
            create_edge_in_txn(tx, &new_parent, &child, None)
        })
    }

    /// Reorder `parent`'s children to `ordered_child_ids`, which must be a
    /// permutation of the current children (spec §4.6).
    pub fn reorder_children(&self, parent: &str, ordered_child_ids: &[String]) -> TgdbResult<()> {
        let (parent, wanted) = (parent.to_string(), ordered_child_ids.to_vec());
        self.txn.execute("reorder_children", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            let mut current: Vec<String> = tx
                .query(
                    "SELECT child_id FROM hierarchy_edges WHERE parent_id = ?1 ORDER BY position",
                    [&parent],
                    |row| row.get(0),
                )?;
            current.sort();
            let mut sorted_wanted = wanted.clone();
            sorted_wanted.sort();
            if current != sorted_wanted {
                return Err(TgdbError::constraint(
                    ConstraintKind::Check,
                    "ordered_child_ids is not a permutation of the current children",
                ));
            }
            for (position, child_id) in wanted.iter().enumerate() {
                tx.run(
                    "UPDATE hierarchy_edges SET position = ?3 WHERE parent_id = ?1 AND child_id = ?2",
                    rusqlite::params![parent, child_id, position as i64],
                )?;
            }
            Ok(())
        })
    }

    // ---- references --------------------------------------------------

    /// Insert a reference. Rejects a missing endpoint
    /// (`Constraint(Orphan)`) and an exact duplicate triple
    /// (`Constraint(Unique)`) (spec §4.6).
    pub fn create_reference(
        &self,
        source: &str,
        target: &str,
        reference_type: ReferenceType,
        context: Option<String>,
    ) -> TgdbResult<Reference> {
        let (source, target) = (source.to_string(), target.to_string());
        self.txn
            .execute("create_reference", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
                create_reference_in_txn(tx, &source, &target, reference_type, context.clone())
            })
    }

    /// Remove orphaned (dangling endpoint) and exact-duplicate reference
    /// rows; returns counts removed (spec §4.6, §2).
    pub fn validate_and_clean_references(&self) -> TgdbResult<ReferenceCleanupReport> {
        self.txn.execute(
            "validate_and_clean_references",
            RetryPolicy::default(),
            DEFAULT_TIMEOUT,
            |tx| {
                let orphaned = tx.run(
                    "DELETE FROM node_references WHERE source_id NOT IN (SELECT id FROM nodes) \
                     OR target_id NOT IN (SELECT id FROM nodes)",
                    [],
                )?;
                let duplicates = tx.run(
                    "DELETE FROM node_references WHERE rowid NOT IN ( \
                       SELECT MIN(rowid) FROM node_references \
                       GROUP BY source_id, target_id, reference_type)",
                    [],
                )?;
                Ok(ReferenceCleanupReport {
                    orphaned_removed: orphaned,
                    duplicates_removed: duplicates,
                })
            },
        )
    }

    // ---- stats ---------------------------------------------------------

    /// Recompute and persist `NodeStats` for one node from
    /// `hierarchy_edges`/`node_references` alone (spec §3, §2).
    pub fn recompute_stats(&self, id: &str) -> TgdbResult<NodeStats> {
        let id = id.to_string();
        self.txn.execute("recompute_stats", RetryPolicy::default(), DEFAULT_TIMEOUT, move |tx| {
            recompute_stats_in_txn(tx, &id)
        })
    }

    /// Recompute stats for every node; returns the number updated.
    pub fn recompute_all_stats(&self) -> TgdbResult<usize> {
        self.txn.execute("recompute_all_stats", RetryPolicy::default(), DEFAULT_TIMEOUT, |tx| {
            let ids: Vec<String> = tx.query("SELECT id FROM nodes", [], |row| row.get(0))?;
            for id in &ids {
                recompute_stats_in_txn(tx, id)?;
            }
            Ok(ids.len())
        })
    }
}

pub(crate) fn insert_node(tx: &TxnHandle<'_>, node: &Node) -> TgdbResult<()> {
    limits::validate_id(&node.id).map_err(|r| TgdbError::validation("id", r, Some(node.id.clone())))?;
    let exists: i64 = tx
        .query("SELECT COUNT(*) FROM nodes WHERE id = ?1", [&node.id], |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);
    if exists > 0 {
        return Err(TgdbError::constraint(ConstraintKind::PrimaryKey, format!("duplicate id `{}`", node.id)));
    }
    tx.run(
        "INSERT INTO nodes (id, name, content, doc_type, owner_id, created_at, updated_at, node_type, \
         is_system_node, fields_json, metadata_json) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        rusqlite::params![
            node.id,
            node.name,
            node.content,
            node.doc_type,
            node.owner_id,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
            node.node_type.as_str(),
            node.is_system_node as i64,
            value_to_json(&node.fields),
            value_to_json(&node.metadata),
        ],
    )?;
    Ok(())
}

pub(crate) fn fetch_node_in_txn(tx: &TxnHandle<'_>, id: &str) -> TgdbResult<Node> {
    tx.query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"), [id], node_from_row)?
        .into_iter()
        .next()
        .ok_or_else(|| TgdbError::not_found("node", id))
}

pub(crate) fn update_node_in_txn(tx: &TxnHandle<'_>, id: &str, patch: &NodePatch) -> TgdbResult<Node> {
    let mut node = fetch_node_in_txn(tx, id)?;
    if let Some(name) = &patch.name {
        limits::validate_name(name).map_err(|r| TgdbError::validation("name", r, None))?;
        node.name = name.clone();
    }
    if let Some(content) = &patch.content {
        limits::validate_content(content).map_err(|r| TgdbError::validation("content", r, None))?;
        node.content = content.clone();
    }
    if let Some(doc_type) = &patch.doc_type {
        node.doc_type = doc_type.clone();
    }
    if let Some(owner_id) = &patch.owner_id {
        node.owner_id = owner_id.clone();
    }
    if let Some(node_type) = patch.node_type {
        node.node_type = node_type;
    }
    if let Some(is_system_node) = patch.is_system_node {
        node.is_system_node = is_system_node;
    }
    if let Some(fields) = &patch.fields {
        node.fields = fields.clone();
    }
    if let Some(metadata) = &patch.metadata {
        node.metadata = metadata.clone();
    }
    node.updated_at = Utc::now();

    tx.run(
        "UPDATE nodes SET name=?2, content=?3, doc_type=?4, owner_id=?5, updated_at=?6, \
         node_type=?7, is_system_node=?8, fields_json=?9, metadata_json=?10 WHERE id=?1",
        rusqlite::params![
            node.id,
            node.name,
            node.content,
            node.doc_type,
            node.owner_id,
            node.updated_at.to_rfc3339(),
            node.node_type.as_str(),
            node.is_system_node as i64,
            value_to_json(&node.fields),
            value_to_json(&node.metadata),
        ],
    )?;
    sync_fts(tx, &node)?;
    Ok(node)
}

pub(crate) fn delete_node_in_txn(tx: &TxnHandle<'_>, id: &str, cascade: bool) -> TgdbResult<()> {
    fetch_node_in_txn(tx, id)?;
    let children: i64 = tx
        .query("SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id = ?1", [id], |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);
    let references: i64 = tx
        .query(
            "SELECT COUNT(*) FROM node_references WHERE source_id = ?1 OR target_id = ?1",
            [id],
            |row| row.get(0),
        )?
        .into_iter()
        .next()
        .unwrap_or(0);

    if !cascade && (children > 0 || references > 0) {
        return Err(TgdbError::constraint(
            ConstraintKind::Dependency,
            format!("children:{children}, references:{references}"),
        ));
    }

    if cascade {
        tx.run("DELETE FROM hierarchy_edges WHERE parent_id = ?1 OR child_id = ?1", [id])?;
        tx.run("DELETE FROM node_references WHERE source_id = ?1 OR target_id = ?1", [id])?;
        tx.run("DELETE FROM node_stats WHERE node_id = ?1", [id])?;
    }
    tx.run("DELETE FROM nodes_fts WHERE id = ?1", [id])?;
    tx.run("DELETE FROM nodes WHERE id = ?1", [id])?;
    Ok(())
}

pub(crate) fn create_reference_in_txn(
    tx: &TxnHandle<'_>,
    source: &str,
    target: &str,
    reference_type: ReferenceType,
    context: Option<String>,
) -> TgdbResult<Reference> {
    let reference = Reference {
        source_id: source.to_string(),
        target_id: target.to_string(),
        reference_type,
        context: context.clone(),
    };
    for endpoint in [source, target] {
        let exists: i64 = tx
            .query("SELECT COUNT(*) FROM nodes WHERE id = ?1", [endpoint], |row| row.get(0))?
            .into_iter()
            .next()
            .unwrap_or(0);
        if exists == 0 {
            return Err(TgdbError::constraint(
                ConstraintKind::Orphan,
                format!("endpoint `{endpoint}` does not exist"),
            ));
        }
    }
    let dup: i64 = tx
        .query(
            "SELECT COUNT(*) FROM node_references WHERE source_id=?1 AND target_id=?2 AND reference_type=?3",
            rusqlite::params![source, target, reference_type.as_str()],
            |row| row.get(0),
        )?
        .into_iter()
        .next()
        .unwrap_or(0);
    if dup > 0 {
        return Err(TgdbError::constraint(ConstraintKind::Unique, "duplicate reference triple"));
    }
    tx.run(
        "INSERT INTO node_references (source_id, target_id, reference_type, context) VALUES (?1,?2,?3,?4)",
        rusqlite::params![source, target, reference_type.as_str(), context],
    )?;
    Ok(reference)
}

/// Extract `#token` tags from text for the FTS `tags` column (spec §4.6
/// "derived-tags"); intentionally simpler than the ingest transformer's
/// reference extraction, which also handles `[[...]]`/`@token`.
fn extract_tags(text: &str) -> String {
    let mut tags = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '#' {
            let rest = &text[i + 1..];
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
                .unwrap_or(rest.len());
            if end > 0 {
                tags.push(rest[..end].to_string());
            }
        }
    }
    tags.join(" ")
}

pub(crate) fn sync_fts(tx: &TxnHandle<'_>, node: &Node) -> TgdbResult<()> {
    let tags = extract_tags(&format!("{} {}", node.name, node.content));
    tx.run("DELETE FROM nodes_fts WHERE id = ?1", [&node.id])?;
    tx.run(
        "INSERT INTO nodes_fts (id, name, content, tags) VALUES (?1,?2,?3,?4)",
        rusqlite::params![node.id, node.name, node.content, tags],
    )?;
    Ok(())
}

fn is_ancestor(tx: &TxnHandle<'_>, candidate: &str, of: &str) -> TgdbResult<bool> {
    let mut frontier = vec![of.to_string()];
    let mut visited = std::collections::HashSet::new();
    while let Some(node) = frontier.pop() {
        if !visited.insert(node.clone()) {
            continue;
        }
        let parents: Vec<String> = tx.query(
            "SELECT parent_id FROM hierarchy_edges WHERE child_id = ?1",
            [&node],
            |row| row.get(0),
        )?;
        for parent in parents {
            if parent == candidate {
                return Ok(true);
            }
            frontier.push(parent);
        }
    }
    Ok(false)
}

pub(crate) fn create_edge_in_txn(
    tx: &TxnHandle<'_>,
    parent: &str,
    child: &str,
    position: Option<u32>,
) -> TgdbResult<HierarchyEdge> {
    if parent == child {
        return Err(TgdbError::constraint(ConstraintKind::Cycle, "self-edge"));
    }
    fetch_node_in_txn(tx, parent)?;
    fetch_node_in_txn(tx, child)?;
    if is_ancestor(tx, child, parent)? || child == parent {
        return Err(TgdbError::constraint(
            ConstraintKind::Cycle,
            format!("`{child}` is an ancestor of `{parent}`"),
        ));
    }
    let dup: i64 = tx
        .query(
            "SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id=?1 AND child_id=?2",
            [parent, child],
            |row| row.get(0),
        )?
        .into_iter()
        .next()
        .unwrap_or(0);
    if dup > 0 {
        return Err(TgdbError::constraint(ConstraintKind::Unique, "duplicate hierarchy edge"));
    }

    let max_position: Option<i64> = tx
        .query(
            "SELECT MAX(position) FROM hierarchy_edges WHERE parent_id = ?1",
            [parent],
            |row| row.get(0),
        )?
        .into_iter()
        .next()
        .flatten();

    let next_position = max_position.map(|m| m + 1).unwrap_or(0) as u32;
    let resolved_position = match position {
        Some(p) => {
            // Clamp an out-of-range explicit position to one past the
            // current last child so positions stay a contiguous
            // permutation of 0..N-1 (spec P3) instead of leaving a gap.
            let p = p.min(next_position);
            tx.run(
                "UPDATE hierarchy_edges SET position = position + 1 WHERE parent_id = ?1 AND position >= ?2",
                rusqlite::params![parent, p as i64],
            )?;
            p
        }
        None => next_position,
    };

    tx.run(
        "INSERT INTO hierarchy_edges (parent_id, child_id, position) VALUES (?1,?2,?3)",
        rusqlite::params![parent, child, resolved_position as i64],
    )?;
    debug!(parent, child, resolved_position, "hierarchy edge created");
    Ok(HierarchyEdge {
        parent_id: parent.to_string(),
        child_id: child.to_string(),
        position: resolved_position,
    })
}

pub(crate) fn recompute_stats_in_txn(tx: &TxnHandle<'_>, id: &str) -> TgdbResult<NodeStats> {
    let incoming_references: i64 = tx
        .query("SELECT COUNT(*) FROM node_references WHERE target_id = ?1", [id], |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);
    let direct_children: i64 = tx
        .query("SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id = ?1", [id], |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);

    let mut depth = 0u32;
    let mut current = id.to_string();
    let mut guard = 0;
    loop {
        let parent: Option<String> = tx
            .query("SELECT parent_id FROM hierarchy_edges WHERE child_id = ?1 LIMIT 1", [&current], |row| row.get(0))?
            .into_iter()
            .next();
        match parent {
            Some(p) => {
                depth += 1;
                current = p;
                guard += 1;
                if guard > 10_000 {
                    break;
                }
            }
            None => break,
        }
    }

    let access_count: i64 = tx
        .query("SELECT access_count FROM node_stats WHERE node_id = ?1", [id], |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);

    let stats = NodeStats {
        access_count: access_count as u64,
        incoming_references: incoming_references as u64,
        direct_children: direct_children as u64,
        depth,
    };

    tx.run(
        "INSERT INTO node_stats (node_id, access_count, incoming_references, direct_children, depth) \
         VALUES (?1,?2,?3,?4,?5) \
         ON CONFLICT(node_id) DO UPDATE SET access_count=excluded.access_count, \
         incoming_references=excluded.incoming_references, direct_children=excluded.direct_children, depth=excluded.depth",
        rusqlite::params![id, stats.access_count as i64, stats.incoming_references as i64, stats.direct_children as i64, stats.depth as i64],
    )?;
    Ok(stats)
}

fn schema_for_tests() -> &'static str {
    r#"
    CREATE TABLE nodes (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        content TEXT NOT NULL,
        doc_type TEXT,
        owner_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        node_type TEXT NOT NULL,
        is_system_node INTEGER NOT NULL,
        fields_json TEXT NOT NULL,
        metadata_json TEXT NOT NULL
    );
    CREATE TABLE hierarchy_edges (
        parent_id TEXT NOT NULL,
        child_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (parent_id, child_id)
    );
    CREATE TABLE node_references (
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        reference_type TEXT NOT NULL,
        context TEXT,
        PRIMARY KEY (source_id, target_id, reference_type)
    );
    CREATE TABLE node_stats (
        node_id TEXT PRIMARY KEY,
        access_count INTEGER NOT NULL,
        incoming_references INTEGER NOT NULL,
        direct_children INTEGER NOT NULL,
        depth INTEGER NOT NULL
    );
    CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags);
    "#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> GraphRepository {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        for stmt in schema_for_tests().split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                conn.run(stmt, []).unwrap();
            }
        }
        let txn = Arc::new(TransactionManager::new(conn.clone()));
        GraphRepository::new(conn, txn)
    }

    fn node(id: &str, name: &str) -> Node {
        Node {
            id: id.to_string(),
            name: name.to_string(),
            content: name.to_string(),
            doc_type: None,
            owner_id: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            updated_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            node_type: NodeType::Node,
            is_system_node: false,
            fields: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
        }
    }

    #[test]
    fn create_and_get_round_trips() {
        let repo = repo();
        repo.create_node(&node("a", "Alpha")).unwrap();
        let fetched = repo.get_node("a").unwrap();
        assert_eq!(fetched.name, "Alpha");
    }

    #[test]
    fn duplicate_create_is_primary_key_conflict() {
        let repo = repo();
        repo.create_node(&node("a", "Alpha")).unwrap();
        let err = repo.create_node(&node("a", "Other")).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::PrimaryKey));
    }

    #[test]
    fn update_advances_updated_at_and_rejects_unknown_id() {
        let repo = repo();
        repo.create_node(&node("a", "Alpha")).unwrap();
        let updated = repo
            .update_node(
                "a",
                NodePatch {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(updated.updated_at >= updated.created_at);
        assert!(matches!(
            repo.update_node("missing", NodePatch::default()),
            Err(TgdbError::NotFound { .. })
        ));
    }

    #[test]
    fn cascade_delete_scenario() {
        let repo = repo();
        repo.create_node(&node("a", "A")).unwrap();
        repo.create_node(&node("b", "B")).unwrap();
        repo.create_node(&node("x", "X")).unwrap();
        repo.create_edge("a", "b", None).unwrap();
        repo.create_reference("x", "a", ReferenceType::Link, None).unwrap();

        let err = repo.delete_node("a", false).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::Dependency));

        repo.delete_node("a", true).unwrap();
        assert!(matches!(repo.get_node("a"), Err(TgdbError::NotFound { .. })));
    }

    #[test]
    fn hierarchy_cycle_is_rejected() {
        let repo = repo();
        repo.create_node(&node("a", "A")).unwrap();
        repo.create_node(&node("b", "B")).unwrap();
        repo.create_node(&node("c", "C")).unwrap();
        repo.create_edge("a", "b", Some(0)).unwrap();
        repo.create_edge("b", "c", Some(0)).unwrap();
        let err = repo.create_edge("c", "a", Some(0)).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::Cycle));
        // store unchanged: no edge (c,a) exists
        let children_of_c: i64 = repo
            .conn
            .query("SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id='c'", [], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(children_of_c, 0);
    }

    #[test]
    fn position_insertion_shifts_siblings() {
        let repo = repo();
        for id in ["p", "a", "b", "c"] {
            repo.create_node(&node(id, id)).unwrap();
        }
        repo.create_edge("p", "a", None).unwrap();
        repo.create_edge("p", "b", None).unwrap();
        repo.create_edge("p", "c", Some(1)).unwrap();

        let mut rows: Vec<(String, i64)> = repo
            .conn
            .query(
                "SELECT child_id, position FROM hierarchy_edges WHERE parent_id = 'p' ORDER BY position",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        rows.sort_by_key(|(_, pos)| *pos);
        assert_eq!(
            rows,
            vec![("a".to_string(), 0), ("c".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn reference_rejects_missing_endpoint_and_duplicate() {
        let repo = repo();
        repo.create_node(&node("a", "A")).unwrap();
        repo.create_node(&node("b", "B")).unwrap();
        let err = repo.create_reference("a", "missing", ReferenceType::Link, None).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::Orphan));

        repo.create_reference("a", "b", ReferenceType::Link, None).unwrap();
        let err = repo.create_reference("a", "b", ReferenceType::Link, None).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::Unique));
    }

    #[test]
    fn recompute_stats_counts_children_and_references() {
        let repo = repo();
        for id in ["a", "b", "x"] {
            repo.create_node(&node(id, id)).unwrap();
        }
        repo.create_edge("a", "b", None).unwrap();
        repo.create_reference("x", "a", ReferenceType::Link, None).unwrap();
        let stats = repo.recompute_stats("a").unwrap();
        assert_eq!(stats.direct_children, 1);
        assert_eq!(stats.incoming_references, 1);
        assert_eq!(stats.depth, 0);

        let child_stats = repo.recompute_stats("b").unwrap();
        assert_eq!(child_stats.depth, 1);
    }

    #[test]
    fn validate_and_clean_removes_orphans_and_duplicates() {
        let repo = repo();
        repo.create_node(&node("a", "A")).unwrap();
        repo.create_node(&node("b", "B")).unwrap();
        repo.create_reference("a", "b", ReferenceType::Link, None).unwrap();
        // simulate an orphan left behind by a direct delete of "b" without cascade
        repo.conn.run("DELETE FROM nodes WHERE id = 'b'", []).unwrap();
        let report = repo.validate_and_clean_references().unwrap();
        assert_eq!(report.orphaned_removed, 1);
    }
}
