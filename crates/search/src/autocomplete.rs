//! Autocomplete suggestions over node names and tags (spec §4.10
//! "Autocomplete").

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tgdb_core::TgdbResult;
use tgdb_storage::StoreConnection;

/// Minimum prefix length before autocomplete runs (spec §4.10): shorter
/// prefixes match too much of the corpus to be useful.
pub const MIN_PREFIX_LEN: usize = 2;

/// One autocomplete suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// The suggested text — a node name or a `#tag`.
    pub text: String,
    /// `true` if this came from a `#tag`, `false` if from a node name.
    pub is_tag: bool,
    /// Combined ranking score (see [`suggest`]).
    pub score: f64,
}

/// Suggest completions for `prefix` (spec §4.10): node-name prefix
/// matches weighted 0.7, tag-frequency matches weighted 0.3. Returns an
/// empty list if `prefix` is shorter than [`MIN_PREFIX_LEN`].
pub fn suggest(conn: &Arc<StoreConnection>, prefix: &str, limit: usize) -> TgdbResult<Vec<Suggestion>> {
    if prefix.chars().count() < MIN_PREFIX_LEN {
        return Ok(Vec::new());
    }
    let lower_prefix = prefix.to_lowercase();

    let names: Vec<String> = conn.query(
        "SELECT name FROM nodes WHERE lower(name) LIKE ?1 || '%' ORDER BY name LIMIT ?2",
        rusqlite::params![lower_prefix, (limit * 4) as i64],
        |row| row.get(0),
    )?;

    let tag_blobs: Vec<String> = conn.query("SELECT tags FROM nodes_fts", [], |row| row.get(0))?;
    let mut tag_counts: FxHashMap<String, u64> = FxHashMap::default();
    for blob in tag_blobs {
        for tag in blob.split_whitespace() {
            if tag.to_lowercase().starts_with(&lower_prefix) {
                *tag_counts.entry(tag.to_string()).or_insert(0) += 1;
            }
        }
    }
    let max_tag_count = tag_counts.values().copied().max().unwrap_or(1).max(1) as f64;

    let mut suggestions = Vec::new();
    let mut seen_names = std::collections::HashSet::new();
    for name in names {
        if seen_names.insert(name.clone()) {
            suggestions.push(Suggestion { text: name, is_tag: false, score: 0.7 });
        }
    }
    for (tag, count) in tag_counts {
        let score = 0.3 * (count as f64 / max_tag_count);
        suggestions.push(Suggestion { text: format!("#{tag}"), is_tag: true, score });
    }

    suggestions.sort_by(|a, b| {
        b.is_tag
            .cmp(&a.is_tag)
            .reverse()
            .then_with(|| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal))
    });
    suggestions.truncate(limit);
    Ok(suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with(names: &[&str], tag_blobs: &[&str]) -> Arc<StoreConnection> {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run("CREATE TABLE nodes (id TEXT PRIMARY KEY, name TEXT)", []).unwrap();
        conn.run("CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags)", [])
            .unwrap();
        for (i, name) in names.iter().enumerate() {
            conn.run("INSERT INTO nodes VALUES (?1, ?2)", rusqlite::params![format!("n{i}"), name])
                .unwrap();
        }
        for (i, tags) in tag_blobs.iter().enumerate() {
            conn.run(
                "INSERT INTO nodes_fts (id, name, content, tags) VALUES (?1, '', '', ?2)",
                rusqlite::params![format!("f{i}"), tags],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn short_prefix_returns_empty() {
        let conn = conn_with(&["Graph Database"], &[]);
        assert!(suggest(&conn, "g", 10).unwrap().is_empty());
    }

    #[test]
    fn matches_name_prefix_case_insensitively() {
        let conn = conn_with(&["Graph Database", "Graphics Notes", "Cooking"], &[]);
        let hits = suggest(&conn, "Gra", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| !h.is_tag));
    }

    #[test]
    fn includes_tag_suggestions_by_frequency() {
        let conn = conn_with(&[], &["#graph #work", "#graph", "#grass"]);
        let hits = suggest(&conn, "gra", 10).unwrap();
        let graph_hit = hits.iter().find(|h| h.text == "#graph").unwrap();
        let grass_hit = hits.iter().find(|h| h.text == "#grass").unwrap();
        assert!(graph_hit.score > grass_hit.score);
    }

    #[test]
    fn respects_limit() {
        let conn = conn_with(&["grape", "grapefruit", "granite"], &[]);
        let hits = suggest(&conn, "gra", 2).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
