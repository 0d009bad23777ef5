//! FTS ranking with tunable multiplicative weights (spec §4.10 "Ranking").

use std::sync::Arc;

use tgdb_core::{Node, TgdbResult};
use tgdb_graph::{node_from_row, NODE_COLUMNS};
use tgdb_storage::StoreConnection;

use crate::query::compile;

/// Tunable ranking weights (spec §4.10 defaults).
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    /// Multiplier when the query matches the node's name.
    pub w_name: f64,
    /// Multiplier when the query matches the node's content.
    pub w_content: f64,
    /// Multiplier when the query matches a `#tag`.
    pub w_tag: f64,
    /// Multiplier applied when the node has at least one hierarchy child.
    pub w_hier: f64,
    /// Multiplier applied when incoming references exceed `ref_threshold`.
    pub w_ref: f64,
    /// Incoming-reference count above which `w_ref` applies.
    pub ref_threshold: u64,
}

impl Default for RankWeights {
    fn default() -> Self {
        RankWeights {
            w_name: 3.0,
            w_content: 1.0,
            w_tag: 2.0,
            w_hier: 1.2,
            w_ref: 1.1,
            ref_threshold: 2,
        }
    }
}

/// One ranked search result (spec §4.10).
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched node.
    pub node: Node,
    /// Raw FTS5 rank, negated so higher is better.
    pub base_score: f64,
    /// `base_score` after multiplicative weight adjustments.
    pub score: f64,
}

/// Run `query` against the FTS index and rank results (spec §4.10).
///
/// `query` is compiled via [`compile`] before reaching FTS5, so callers
/// pass raw user input here, not a pre-built `MATCH` expression.
pub fn search(conn: &Arc<StoreConnection>, query: &str, weights: RankWeights, limit: usize) -> TgdbResult<Vec<SearchHit>> {
    let compiled = compile(query)?;
    if compiled.match_expr.trim().is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(String, f64, bool, bool, bool)> = conn.query(
        "SELECT nodes_fts.id, bm25(nodes_fts) as rank, \
                (nodes_fts.name MATCH ?1) as name_hit, \
                (nodes_fts.content MATCH ?1) as content_hit, \
                (nodes_fts.tags MATCH ?1) as tag_hit \
         FROM nodes_fts WHERE nodes_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        rusqlite::params![compiled.match_expr, limit as i64],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, i64>(3)? != 0,
                row.get::<_, i64>(4)? != 0,
            ))
        },
    )?;

    let mut hits = Vec::with_capacity(rows.len());
    for (id, bm25_rank, name_hit, content_hit, tag_hit) in rows {
        let node = fetch_node(conn, &id)?;
        let Some(node) = node else { continue };

        let has_children: i64 = conn
            .query(
                "SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id = ?1",
                [&id],
                |row| row.get(0),
            )?
            .into_iter()
            .next()
            .unwrap_or(0);
        let incoming_refs: i64 = conn
            .query(
                "SELECT COUNT(*) FROM node_references WHERE target_id = ?1",
                [&id],
                |row| row.get(0),
            )?
            .into_iter()
            .next()
            .unwrap_or(0);

        let base_score = -bm25_rank;
        let mut score = base_score;
        if name_hit {
            score *= weights.w_name;
        }
        if content_hit {
            score *= weights.w_content;
        }
        if tag_hit {
            score *= weights.w_tag;
        }
        if has_children > 0 {
            score *= weights.w_hier;
        }
        if incoming_refs as u64 > weights.ref_threshold {
            score *= weights.w_ref;
        }

        hits.push(SearchHit { node, base_score, score });
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(hits)
}

fn fetch_node(conn: &Arc<StoreConnection>, id: &str) -> TgdbResult<Option<Node>> {
    Ok(conn
        .query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"), [id], node_from_row)?
        .into_iter()
        .next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_docs() -> Arc<StoreConnection> {
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
        conn.run("CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags)", [])
            .unwrap();

        for (id, name, content) in [
            ("a", "Graph Database", "An embedded graph store."),
            ("b", "Cooking Notes", "Recipes and cooking tips."),
        ] {
            conn.run(
                "INSERT INTO nodes VALUES (?1, ?2, ?3, NULL, NULL, '2023-01-01T00:00:00Z', '2023-01-01T00:00:00Z', 'node', 0, '{}', '{}')",
                rusqlite::params![id, name, content],
            )
            .unwrap();
            conn.run(
                "INSERT INTO nodes_fts (id, name, content, tags) VALUES (?1, ?2, ?3, '')",
                rusqlite::params![id, name, content],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn ranks_name_match_above_content_only_match() {
        let conn = conn_with_docs();
        let hits = search(&conn, "graph", RankWeights::default(), 10).unwrap();
        assert_eq!(hits[0].node.id, "a");
    }

    #[test]
    fn hierarchy_presence_boosts_score() {
        let conn = conn_with_docs();
        conn.run(
            "INSERT INTO nodes VALUES ('c','Graph Child','graph',NULL,NULL,'2023-01-01T00:00:00Z','2023-01-01T00:00:00Z','node',0,'{}','{}')",
            [],
        )
        .unwrap();
        conn.run(
            "INSERT INTO nodes_fts (id, name, content, tags) VALUES ('c','Graph Child','graph','')",
            [],
        )
        .unwrap();
        conn.run("INSERT INTO hierarchy_edges VALUES ('a','c',0)", []).unwrap();

        let hits = search(&conn, "graph", RankWeights::default(), 10).unwrap();
        let a_hit = hits.iter().find(|h| h.node.id == "a").unwrap();
        assert!(a_hit.score > a_hit.base_score);
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let conn = conn_with_docs();
        let hits = search(&conn, "", RankWeights::default(), 10).unwrap();
        assert!(hits.is_empty());
    }
}
