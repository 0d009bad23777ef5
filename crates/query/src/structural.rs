//! Structural queries over the hierarchy (spec §4.8 "Structural queries").

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tgdb_core::{HierarchyEdge, Node, TgdbError, TgdbResult};
use tgdb_graph::{edge_from_row, node_from_row, NODE_COLUMNS};
use tgdb_storage::StoreConnection;

/// Upper bound on `get_ancestors`/`get_descendants` depth (spec §4.8).
pub const MAX_STRUCTURAL_DEPTH: u32 = 100;

/// A subtree rooted at some node: every descendant node plus the edges
/// connecting them (spec §4.8 `get_subtree`).
#[derive(Debug, Clone, Default)]
pub struct Subtree {
    /// All nodes in the subtree, including the root.
    pub nodes: Vec<Node>,
    /// All hierarchy edges among them.
    pub edges: Vec<HierarchyEdge>,
}

/// Structural (hierarchy-shaped) read queries, borrowing the shared
/// connection (spec §4.8).
pub struct StructuralQueries<'a> {
    conn: &'a Arc<StoreConnection>,
}

impl<'a> StructuralQueries<'a> {
    /// Wrap a connection for structural reads.
    pub fn new(conn: &'a Arc<StoreConnection>) -> Self {
        StructuralQueries { conn }
    }

    /// Direct children of `id`, ordered by position.
    pub fn get_children(&self, id: &str) -> TgdbResult<Vec<Node>> {
        let cols = prefixed_columns();
        let sql = format!(
            "SELECT {cols} FROM nodes n \
             JOIN hierarchy_edges e ON e.child_id = n.id \
             WHERE e.parent_id = ?1 ORDER BY e.position"
        );
        self.conn.query(&sql, [id], node_from_row)
    }

    /// Direct parents of `id` (normally at most one, but the schema does
    /// not forbid multiple parents pointing at the same child through
    /// distinct edges created before a move).
    pub fn get_parents(&self, id: &str) -> TgdbResult<Vec<Node>> {
        let cols = prefixed_columns();
        let sql = format!(
            "SELECT {cols} FROM nodes n \
             JOIN hierarchy_edges e ON e.parent_id = n.id \
             WHERE e.child_id = ?1"
        );
        self.conn.query(&sql, [id], node_from_row)
    }

    /// Ancestors of `id`, nearest first, bounded by `max_depth` (<=
    /// [`MAX_STRUCTURAL_DEPTH`]).
    pub fn get_ancestors(&self, id: &str, max_depth: u32) -> TgdbResult<Vec<Node>> {
        let max_depth = clamp_depth(max_depth)?;
        let mut result = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut frontier = id.to_string();
        for _ in 0..max_depth {
            let parents: Vec<String> = self.conn.query(
                "SELECT parent_id FROM hierarchy_edges WHERE child_id = ?1",
                [&frontier],
                |row| row.get(0),
            )?;
            let Some(parent) = parents.into_iter().next() else {
                break;
            };
            if !seen.insert(parent.clone()) {
                break;
            }
            result.push(self.node_by_id(&parent)?);
            frontier = parent;
        }
        Ok(result)
    }

    /// Descendants of `id` in BFS order, bounded by `max_depth` (<=
    /// [`MAX_STRUCTURAL_DEPTH`]).
    pub fn get_descendants(&self, id: &str, max_depth: u32) -> TgdbResult<Vec<Node>> {
        let max_depth = clamp_depth(max_depth)?;
        let mut result = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        seen.insert(id.to_string());
        let mut frontier = vec![id.to_string()];
        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for parent in &frontier {
                for child in self.get_children(parent)? {
                    if seen.insert(child.id.clone()) {
                        next.push(child.id.clone());
                        result.push(child);
                    }
                }
            }
            frontier = next;
        }
        Ok(result)
    }

    /// Siblings of `id` (other children of its parent), in position order.
    pub fn get_siblings(&self, id: &str) -> TgdbResult<Vec<Node>> {
        let parent: Option<String> = self
            .conn
            .query(
                "SELECT parent_id FROM hierarchy_edges WHERE child_id = ?1",
                [id],
                |row| row.get(0),
            )?
            .into_iter()
            .next();
        let Some(parent) = parent else {
            return Ok(Vec::new());
        };
        Ok(self
            .get_children(&parent)?
            .into_iter()
            .filter(|n| n.id != id)
            .collect())
    }

    /// Every node with no incoming hierarchy edge.
    pub fn get_root_nodes(&self) -> TgdbResult<Vec<Node>> {
        let cols = prefixed_columns();
        let sql = format!(
            "SELECT {cols} FROM nodes n \
             WHERE NOT EXISTS (SELECT 1 FROM hierarchy_edges e WHERE e.child_id = n.id)"
        );
        self.conn.query(&sql, [], node_from_row)
    }

    /// Every node with no outgoing hierarchy edge (no children).
    pub fn get_leaf_nodes(&self) -> TgdbResult<Vec<Node>> {
        let cols = prefixed_columns();
        let sql = format!(
            "SELECT {cols} FROM nodes n \
             WHERE NOT EXISTS (SELECT 1 FROM hierarchy_edges e WHERE e.parent_id = n.id)"
        );
        self.conn.query(&sql, [], node_from_row)
    }

    /// The full subtree rooted at `id`: every descendant node (unbounded
    /// depth, capped at [`MAX_STRUCTURAL_DEPTH`]) plus the edges among them.
    pub fn get_subtree(&self, id: &str) -> TgdbResult<Subtree> {
        let root = self.node_by_id(id)?;
        let descendants = self.get_descendants(id, MAX_STRUCTURAL_DEPTH)?;
        let mut ids: FxHashSet<String> = descendants.iter().map(|n| n.id.clone()).collect();
        ids.insert(id.to_string());

        let mut nodes = vec![root];
        nodes.extend(descendants);

        let mut edges = Vec::new();
        for node_id in &ids {
            let rows: Vec<HierarchyEdge> = self.conn.query(
                "SELECT parent_id, child_id, position FROM hierarchy_edges WHERE parent_id = ?1",
                [node_id],
                edge_from_row,
            )?;
            edges.extend(rows.into_iter().filter(|e| ids.contains(&e.child_id)));
        }

        Ok(Subtree { nodes, edges })
    }

    fn node_by_id(&self, id: &str) -> TgdbResult<Node> {
        let rows = self
            .conn
            .query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"), [id], node_from_row)?;
        rows.into_iter().next().ok_or_else(|| TgdbError::not_found("node", id))
    }
}

fn prefixed_columns() -> String {
    NODE_COLUMNS
        .split(", ")
        .map(|c| format!("n.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn clamp_depth(max_depth: u32) -> TgdbResult<u32> {
    if max_depth > MAX_STRUCTURAL_DEPTH {
        return Err(TgdbError::validation(
            "max_depth",
            tgdb_core::LimitRule::IdPattern,
            Some(max_depth.to_string()),
        ));
    }
    Ok(max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_chain() -> Arc<StoreConnection> {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run(
            "CREATE TABLE nodes (
                id TEXT PRIMARY KEY, name TEXT NOT NULL, content TEXT NOT NULL,
                doc_type TEXT, owner_id TEXT, created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
                node_type TEXT NOT NULL, is_system_node INTEGER NOT NULL,
                fields_json TEXT NOT NULL, metadata_json TEXT NOT NULL)",
            [],
        )
        .unwrap();
        conn.run("CREATE TABLE hierarchy_edges (parent_id TEXT, child_id TEXT, position INTEGER)", [])
            .unwrap();
        for id in ["a", "b", "c", "d"] {
            conn.run(
                "INSERT INTO nodes VALUES (?1, ?1, '', NULL, NULL, '2023-01-01T00:00:00Z', '2023-01-01T00:00:00Z', 'node', 0, '{}', '{}')",
                [id],
            )
            .unwrap();
        }
        // a -> b -> c, a -> d
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','b',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('b','c',0)", []).unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','d',1)", []).unwrap();
        conn
    }

    #[test]
    fn children_ordered_by_position() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let children = q.get_children("a").unwrap();
        assert_eq!(children.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["b", "d"]);
    }

    #[test]
    fn ancestors_nearest_first() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let ancestors = q.get_ancestors("c", 10).unwrap();
        assert_eq!(ancestors.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn descendants_bfs_order() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let descendants = q.get_descendants("a", 10).unwrap();
        let ids: Vec<&str> = descendants.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&"b"));
        assert!(ids.contains(&"c"));
        assert!(ids.contains(&"d"));
    }

    #[test]
    fn siblings_excludes_self() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let siblings = q.get_siblings("b").unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].id, "d");
    }

    #[test]
    fn root_and_leaf_nodes() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let roots = q.get_root_nodes().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "a");
        let leaves = q.get_leaf_nodes().unwrap();
        let leaf_ids: FxHashSet<String> = leaves.into_iter().map(|n| n.id).collect();
        assert!(leaf_ids.contains("c"));
        assert!(leaf_ids.contains("d"));
    }

    #[test]
    fn subtree_includes_root_and_edges() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        let subtree = q.get_subtree("a").unwrap();
        assert_eq!(subtree.nodes.len(), 4);
        assert_eq!(subtree.edges.len(), 3);
    }

    #[test]
    fn rejects_depth_over_max() {
        let conn = conn_with_chain();
        let q = StructuralQueries::new(&conn);
        assert!(q.get_ancestors("c", MAX_STRUCTURAL_DEPTH + 1).is_err());
    }
}
