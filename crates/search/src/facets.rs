//! Facet counts over a search result set (spec §4.10 "Faceting").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tgdb_core::TgdbResult;
use tgdb_storage::StoreConnection;

/// A created-date bucket for the `age` facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgeBucket {
    /// Created within the last 7 days.
    LastWeek,
    /// Created within the last 30 days (but not the last week).
    LastMonth,
    /// Created within the last 90 days (but not the last month).
    LastQuarter,
    /// Created within the last 365 days (but not the last quarter).
    LastYear,
    /// Created more than a year ago.
    Older,
}

impl AgeBucket {
    /// Bucket a `created_at` timestamp relative to `now`.
    pub fn classify(created_at: DateTime<Utc>, now: DateTime<Utc>) -> AgeBucket {
        let age = now.signed_duration_since(created_at);
        if age.num_days() < 7 {
            AgeBucket::LastWeek
        } else if age.num_days() < 30 {
            AgeBucket::LastMonth
        } else if age.num_days() < 90 {
            AgeBucket::LastQuarter
        } else if age.num_days() < 365 {
            AgeBucket::LastYear
        } else {
            AgeBucket::Older
        }
    }
}

/// Facet counts over a set of node ids (spec §4.10).
#[derive(Debug, Clone, Default)]
pub struct FacetReport {
    /// Count per `node_type`.
    pub by_node_type: FxHashMap<String, u64>,
    /// Count per `owner_id` (nodes with no owner are omitted).
    pub by_owner: FxHashMap<String, u64>,
    /// Count per `#tag` extracted from node content/fields.
    pub by_tag: FxHashMap<String, u64>,
    /// Count per created-date age bucket.
    pub by_age: FxHashMap<AgeBucket, u64>,
}

/// Compute facets over the given node ids, as of `now`.
///
/// `now` is supplied by the caller (the search crate never reads the
/// system clock directly), so facet output is reproducible in tests.
pub fn compute(conn: &Arc<StoreConnection>, node_ids: &[String], now: DateTime<Utc>) -> TgdbResult<FacetReport> {
    let mut report = FacetReport::default();
    if node_ids.is_empty() {
        return Ok(report);
    }

    for id in node_ids {
        let rows = conn.query(
            "SELECT node_type, owner_id, created_at FROM nodes WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )?;
        let Some((node_type, owner_id, created_at)) = rows.into_iter().next() else {
            continue;
        };

        *report.by_node_type.entry(node_type).or_insert(0) += 1;
        if let Some(owner) = owner_id {
            *report.by_owner.entry(owner).or_insert(0) += 1;
        }
        if let Ok(created_at) = DateTime::parse_from_rfc3339(&created_at) {
            let bucket = AgeBucket::classify(created_at.with_timezone(&Utc), now);
            *report.by_age.entry(bucket).or_insert(0) += 1;
        }

        let tags: Vec<String> = conn.query(
            "SELECT tags FROM nodes_fts WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if let Some(tag_blob) = tags.into_iter().next() {
            for tag in extract_tags(&tag_blob) {
                *report.by_tag.entry(tag).or_insert(0) += 1;
            }
        }
    }

    Ok(report)
}

fn extract_tags(blob: &str) -> Vec<String> {
    blob.split_whitespace()
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn conn_with(rows: &[(&str, &str, Option<&str>, DateTime<Utc>, &str)]) -> Arc<StoreConnection> {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run(
            "CREATE TABLE nodes (id TEXT PRIMARY KEY, node_type TEXT, owner_id TEXT, created_at TEXT)",
            [],
        )
        .unwrap();
        conn.run("CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags)", [])
            .unwrap();
        for (id, node_type, owner, created_at, tags) in rows {
            conn.run(
                "INSERT INTO nodes VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, node_type, owner, created_at.to_rfc3339()],
            )
            .unwrap();
            conn.run(
                "INSERT INTO nodes_fts (id, name, content, tags) VALUES (?1, '', '', ?2)",
                rusqlite::params![id, tags],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn buckets_by_type_owner_and_tag() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let conn = conn_with(&[
            ("a", "node", Some("alice"), now, "#work #urgent"),
            ("b", "node", Some("alice"), now, "#work"),
            ("c", "system", None, now - Duration::days(400), ""),
        ]);
        let report = compute(&conn, &["a".into(), "b".into(), "c".into()], now).unwrap();
        assert_eq!(report.by_node_type["node"], 2);
        assert_eq!(report.by_node_type["system"], 1);
        assert_eq!(report.by_owner["alice"], 2);
        assert_eq!(report.by_tag["work"], 2);
        assert_eq!(report.by_tag["urgent"], 1);
        assert_eq!(report.by_age[&AgeBucket::Older], 1);
    }

    #[test]
    fn classifies_age_buckets() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(AgeBucket::classify(now - Duration::days(1), now), AgeBucket::LastWeek);
        assert_eq!(AgeBucket::classify(now - Duration::days(20), now), AgeBucket::LastMonth);
        assert_eq!(AgeBucket::classify(now - Duration::days(60), now), AgeBucket::LastQuarter);
        assert_eq!(AgeBucket::classify(now - Duration::days(200), now), AgeBucket::LastYear);
        assert_eq!(AgeBucket::classify(now - Duration::days(1000), now), AgeBucket::Older);
    }

    #[test]
    fn empty_input_returns_empty_report() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let conn = conn_with(&[]);
        let report = compute(&conn, &[], now).unwrap();
        assert!(report.by_node_type.is_empty());
    }
}
