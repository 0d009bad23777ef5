//! Integrity checking and repair (spec §4.8 "Integrity").

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tgdb_core::TgdbResult;
use tgdb_storage::StoreConnection;

/// One integrity problem found by [`validate_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// A hierarchy edge whose parent or child no longer exists.
    OrphanedEdge { parent_id: String, child_id: String },
    /// A hierarchy edge duplicated (same parent/child pair appears twice,
    /// which the schema's primary key should prevent but a direct writer
    /// bypassing the repository could still produce).
    DuplicateEdge { parent_id: String, child_id: String, count: u32 },
    /// A directed cycle in the hierarchy graph.
    Cycle { path: Vec<String> },
    /// A parent whose child positions are not a contiguous `0..N` range.
    PositionGap { parent_id: String, positions: Vec<u32> },
    /// A reference whose source or target no longer exists.
    OrphanedReference { source_id: String, target_id: String },
}

/// Result of [`validate_integrity`] (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Every issue found, in detection order.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// `true` iff no issues were found.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Result of [`validate_and_fix`] (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// Orphaned hierarchy edges removed.
    pub orphaned_edges_removed: usize,
    /// Duplicate hierarchy edges removed.
    pub duplicate_edges_removed: usize,
    /// Parents whose positions were compacted to `0..N`.
    pub positions_compacted: usize,
    /// Cycles detected but *not* mutated — the caller must decide policy
    /// (spec §4.8: "reports (c) without mutating").
    pub cycles_reported: usize,
}

/// Detect orphaned/duplicate hierarchy edges, directed cycles, position
/// gaps, and orphaned references, without mutating anything (spec §4.8).
pub fn validate_integrity(conn: &Arc<StoreConnection>) -> TgdbResult<IntegrityReport> {
    let mut issues = Vec::new();

    let edge_counts: Vec<(String, String, i64)> = conn.query(
        "SELECT parent_id, child_id, COUNT(*) FROM hierarchy_edges GROUP BY parent_id, child_id",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let node_ids: FxHashSet<String> = conn
        .query("SELECT id FROM nodes", [], |row| row.get(0))?
        .into_iter()
        .collect();

    for (parent_id, child_id, count) in &edge_counts {
        if !node_ids.contains(parent_id) || !node_ids.contains(child_id) {
            issues.push(IntegrityIssue::OrphanedEdge {
                parent_id: parent_id.clone(),
                child_id: child_id.clone(),
            });
        }
        if *count > 1 {
            issues.push(IntegrityIssue::DuplicateEdge {
                parent_id: parent_id.clone(),
                child_id: child_id.clone(),
                count: *count as u32,
            });
        }
    }

    if let Some(path) = find_cycle(conn)? {
        issues.push(IntegrityIssue::Cycle { path });
    }

    let positions: Vec<(String, i64)> = conn.query(
        "SELECT parent_id, position FROM hierarchy_edges ORDER BY parent_id, position",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mut by_parent: FxHashMap<String, Vec<u32>> = FxHashMap::default();
    for (parent, pos) in positions {
        by_parent.entry(parent).or_default().push(pos as u32);
    }
    for (parent_id, mut positions) in by_parent {
        positions.sort_unstable();
        let expected: Vec<u32> = (0..positions.len() as u32).collect();
        if positions != expected {
            issues.push(IntegrityIssue::PositionGap { parent_id, positions });
        }
    }

    let references: Vec<(String, String)> = conn.query(
        "SELECT source_id, target_id FROM node_references",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    for (source_id, target_id) in references {
        if !node_ids.contains(&source_id) || !node_ids.contains(&target_id) {
            issues.push(IntegrityIssue::OrphanedReference { source_id, target_id });
        }
    }

    Ok(IntegrityReport { issues })
}

/// Remove orphaned and duplicate edges, compact position gaps, and report
/// (without mutating) any cycles found — cycle removal requires caller
/// policy since multiple edges could be cut to break it (spec §4.8).
pub fn validate_and_fix(conn: &Arc<StoreConnection>) -> TgdbResult<RepairReport> {
    let report = validate_integrity(conn)?;
    let mut repair = RepairReport::default();

    for issue in &report.issues {
        match issue {
            IntegrityIssue::OrphanedEdge { parent_id, child_id } => {
                conn.run(
                    "DELETE FROM hierarchy_edges WHERE parent_id = ?1 AND child_id = ?2",
                    rusqlite::params![parent_id, child_id],
                )?;
                repair.orphaned_edges_removed += 1;
            }
            IntegrityIssue::DuplicateEdge { parent_id, child_id, count } => {
                // SQLite's rowid lets us keep exactly one copy.
                conn.run(
                    "DELETE FROM hierarchy_edges WHERE rowid NOT IN (
                        SELECT MIN(rowid) FROM hierarchy_edges WHERE parent_id = ?1 AND child_id = ?2
                     ) AND parent_id = ?1 AND child_id = ?2",
                    rusqlite::params![parent_id, child_id],
                )?;
                repair.duplicate_edges_removed += (*count as usize).saturating_sub(1);
            }
            IntegrityIssue::Cycle { .. } => {
                repair.cycles_reported += 1;
            }
            IntegrityIssue::PositionGap { .. } | IntegrityIssue::OrphanedReference { .. } => {}
        }
    }

    // Compact positions after orphan/duplicate cleanup so gaps reflect the
    // post-cleanup edge set.
    let parents: Vec<String> = conn.query(
        "SELECT DISTINCT parent_id FROM hierarchy_edges",
        [],
        |row| row.get(0),
    )?;
    for parent in parents {
        let mut children: Vec<(String, i64)> = conn.query(
            "SELECT child_id, position FROM hierarchy_edges WHERE parent_id = ?1 ORDER BY position, child_id",
            [&parent],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        children.sort_by_key(|(_, pos)| *pos);
        let needs_compaction = children
            .iter()
            .enumerate()
            .any(|(i, (_, pos))| *pos != i as i64);
        if needs_compaction {
            for (i, (child_id, _)) in children.iter().enumerate() {
                conn.run(
                    "UPDATE hierarchy_edges SET position = ?3 WHERE parent_id = ?1 AND child_id = ?2",
                    rusqlite::params![parent, child_id, i as i64],
                )?;
            }
            repair.positions_compacted += 1;
        }
    }

    Ok(repair)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn find_cycle(conn: &Arc<StoreConnection>) -> TgdbResult<Option<Vec<String>>> {
    let edges: Vec<(String, String)> = conn.query(
        "SELECT parent_id, child_id FROM hierarchy_edges",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mut adjacency: FxHashMap<String, Vec<String>> = FxHashMap::default();
    for (parent, child) in edges {
        adjacency.entry(parent).or_default().push(child);
    }

    let mut marks: FxHashMap<String, Mark> = FxHashMap::default();
    let nodes: Vec<String> = adjacency.keys().cloned().collect();

    for start in nodes {
        if marks.contains_key(&start) {
            continue;
        }
        let mut stack = vec![start];
        let mut path = Vec::new();
        if dfs_cycle(&adjacency, &mut marks, &mut path, &mut stack) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

fn dfs_cycle(
    adjacency: &FxHashMap<String, Vec<String>>,
    marks: &mut FxHashMap<String, Mark>,
    path: &mut Vec<String>,
    stack: &mut Vec<String>,
) -> bool {
    let node = stack.pop().expect("seeded with one element");
    if let Some(Mark::Done) = marks.get(&node) {
        return false;
    }
    marks.insert(node.clone(), Mark::Visiting);
    path.push(node.clone());
    if let Some(children) = adjacency.get(&node) {
        for child in children {
            match marks.get(child) {
                Some(Mark::Visiting) => {
                    path.push(child.clone());
                    return true;
                }
                Some(Mark::Done) => continue,
                None => {
                    let mut sub_stack = vec![child.clone()];
                    if dfs_cycle(adjacency, marks, path, &mut sub_stack) {
                        return true;
                    }
                    path.pop();
                }
            }
        }
    }
    marks.insert(node, Mark::Done);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_schema() -> Arc<StoreConnection> {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run(
            "CREATE TABLE nodes (id TEXT PRIMARY KEY, name TEXT, content TEXT, doc_type TEXT, owner_id TEXT, created_at TEXT, updated_at TEXT, node_type TEXT, is_system_node INTEGER, fields_json TEXT, metadata_json TEXT)",
            [],
        )
        .unwrap();
        conn.run("CREATE TABLE hierarchy_edges (parent_id TEXT, child_id TEXT, position INTEGER)", [])
            .unwrap();
        conn.run("CREATE TABLE node_references (source_id TEXT, target_id TEXT, reference_type TEXT, context TEXT)", [])
            .unwrap();
        conn
    }

    fn insert_node(conn: &StoreConnection, id: &str) {
        conn.run(
            "INSERT INTO nodes VALUES (?1, ?1, '', NULL, NULL, '2023-01-01T00:00:00Z', '2023-01-01T00:00:00Z', 'node', 0, '{}', '{}')",
            [id],
        )
        .unwrap();
    }

    #[test]
    fn detects_orphaned_edge() {
        let conn = conn_with_schema();
        insert_node(&conn, "a");
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','missing',0)", []).unwrap();
        let report = validate_integrity(&conn).unwrap();
        assert!(report.issues.iter().any(|i| matches!(i, IntegrityIssue::OrphanedEdge { .. })));
    }

    #[test]
    fn detects_cycle() {
        let conn = conn_with_schema();
        for id in ["a", "b", "c"] {
            insert_node(&conn, id);
        }
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','b',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('b','c',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('c','a',0)", []).unwrap();
        let report = validate_integrity(&conn).unwrap();
        assert!(report.issues.iter().any(|i| matches!(i, IntegrityIssue::Cycle { .. })));
    }

    #[test]
    fn detects_position_gap() {
        let conn = conn_with_schema();
        for id in ["a", "b", "c"] {
            insert_node(&conn, id);
        }
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','b',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','c',5)", []).unwrap();
        let report = validate_integrity(&conn).unwrap();
        assert!(report.issues.iter().any(|i| matches!(i, IntegrityIssue::PositionGap { .. })));
    }

    #[test]
    fn fix_removes_orphans_and_compacts_positions() {
        let conn = conn_with_schema();
        for id in ["a", "b", "c"] {
            insert_node(&conn, id);
        }
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','b',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','c',5)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','missing',9)", []).unwrap();

        let repair = validate_and_fix(&conn).unwrap();
        assert_eq!(repair.orphaned_edges_removed, 1);
        assert_eq!(repair.positions_compacted, 1);

        let report_after = validate_integrity(&conn).unwrap();
        assert!(report_after.issues.iter().all(|i| !matches!(i, IntegrityIssue::PositionGap { .. })));
    }

    #[test]
    fn cycle_is_reported_not_mutated() {
        let conn = conn_with_schema();
        for id in ["a", "b"] {
            insert_node(&conn, id);
        }
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','b',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('b','a',0)", []).unwrap();
        let repair = validate_and_fix(&conn).unwrap();
        assert_eq!(repair.cycles_reported, 1);
        let edges: i64 = conn
            .query("SELECT COUNT(*) FROM hierarchy_edges", [], |row| row.get(0))
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(edges, 2);
    }
}
