//! Jaccard-based "find similar nodes" (spec §4.10 "Similarity").

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tgdb_core::{Node, TgdbResult};
use tgdb_graph::{node_from_row, NODE_COLUMNS};
use tgdb_storage::StoreConnection;

/// Cap on how many recent user nodes are scanned when looking for
/// matches — keeps similarity search bounded on large graphs without a
/// dedicated vector index (spec §4.10).
const CANDIDATE_SCAN_LIMIT: usize = 500;

/// One similarity hit (spec §4.10).
#[derive(Debug, Clone)]
pub struct SimilarNode {
    /// The candidate node.
    pub node: Node,
    /// Jaccard similarity in `[0.0, 1.0]`.
    pub similarity: f64,
}

fn word_set(text: &str) -> FxHashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

fn jaccard(a: &FxHashSet<String>, b: &FxHashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Extract `#token` tags from text, matching the scheme the repository
/// uses to populate the FTS `tags` column.
fn extract_tags(text: &str) -> FxHashSet<String> {
    let mut tags = FxHashSet::default();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '#' {
            let rest = &text[i + 1..];
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
                .unwrap_or(rest.len());
            if end > 0 {
                tags.insert(rest[..end].to_lowercase());
            }
        }
    }
    tags
}

/// Find nodes similar to `node_id` among the `CANDIDATE_SCAN_LIMIT` most
/// recently created user nodes, scored by a blend of name-word, content-
/// word, and tag Jaccard similarity plus a node-type equality bonus.
pub fn find_similar(
    conn: &Arc<StoreConnection>,
    node_id: &str,
    similarity_threshold: f64,
    max_results: usize,
) -> TgdbResult<Vec<SimilarNode>> {
    let target = conn
        .query(&format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"), [node_id], node_from_row)?
        .into_iter()
        .next();
    let Some(target) = target else {
        return Ok(Vec::new());
    };

    let target_name_words = word_set(&target.name);
    let target_content_words = word_set(&target.content);
    let target_tags = extract_tags(&format!("{} {}", target.name, target.content));

    let candidates = conn.query(
        &format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id != ?1 AND is_system_node = 0 \
             ORDER BY created_at DESC LIMIT ?2"
        ),
        rusqlite::params![node_id, CANDIDATE_SCAN_LIMIT as i64],
        node_from_row,
    )?;

    let mut hits = Vec::new();
    for candidate in candidates {
        let name_sim = jaccard(&target_name_words, &word_set(&candidate.name));
        let content_sim = jaccard(&target_content_words, &word_set(&candidate.content));
        let tag_sim = jaccard(&target_tags, &extract_tags(&format!("{} {}", candidate.name, candidate.content)));
        let type_bonus = if candidate.node_type == target.node_type { 0.1 } else { 0.0 };

        let similarity = (0.4 * name_sim + 0.4 * content_sim + 0.2 * tag_sim + type_bonus).min(1.0);
        if similarity >= similarity_threshold {
            hits.push(SimilarNode { node: candidate, similarity });
        }
    }

    hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(max_results);
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_nodes(rows: &[(&str, &str, &str, &str, &str)]) -> Arc<StoreConnection> {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run(
            "CREATE TABLE nodes (id TEXT PRIMARY KEY, name TEXT, content TEXT, doc_type TEXT, owner_id TEXT, created_at TEXT, updated_at TEXT, node_type TEXT, is_system_node INTEGER, fields_json TEXT, metadata_json TEXT)",
            [],
        )
        .unwrap();
        for (i, (id, name, content, node_type, fields_json)) in rows.iter().enumerate() {
            conn.run(
                "INSERT INTO nodes VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?4, ?5, 0, ?6, '{}')",
                rusqlite::params![
                    id,
                    name,
                    content,
                    format!("2024-01-{:02}T00:00:00Z", i + 1),
                    node_type,
                    fields_json
                ],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn finds_nodes_with_overlapping_words() {
        let conn = conn_with_nodes(&[
            ("a", "Rust graph engine", "embedded graph store", "node", "{}"),
            ("b", "Rust graph library", "embedded storage engine", "node", "{}"),
            ("c", "Cooking recipes", "pasta and sauce", "node", "{}"),
        ]);
        let hits = find_similar(&conn, "a", 0.1, 10).unwrap();
        assert!(hits.iter().any(|h| h.node.id == "b"));
        assert!(!hits.iter().any(|h| h.node.id == "c"));
    }

    #[test]
    fn respects_max_results() {
        let conn = conn_with_nodes(&[
            ("a", "alpha beta", "x", "node", "{}"),
            ("b", "alpha beta", "x", "node", "{}"),
            ("c", "alpha beta", "x", "node", "{}"),
        ]);
        let hits = find_similar(&conn, "a", 0.0, 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn unknown_node_returns_empty() {
        let conn = conn_with_nodes(&[]);
        let hits = find_similar(&conn, "missing", 0.0, 10).unwrap();
        assert!(hits.is_empty());
    }
}
