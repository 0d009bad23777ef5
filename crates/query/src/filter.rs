//! Node filtering and pagination (spec §4.8 "Filtering").

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tgdb_core::{Node, TgdbError, TgdbResult};
use tgdb_graph::{node_from_row, NODE_COLUMNS};
use tgdb_storage::StoreConnection;

/// Columns `list_nodes` may sort by — an allow-list so caller-supplied
/// sort keys can never reach raw SQL (spec §4.8 "sort_by restricted to
/// an allow-listed column set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    /// `nodes.id`
    Id,
    /// `nodes.name`
    Name,
    /// `nodes.content`
    Content,
    /// `nodes.created_at`
    CreatedAt,
    /// `nodes.updated_at`
    UpdatedAt,
    /// `nodes.node_type`
    NodeType,
}

impl SortColumn {
    fn column(self) -> &'static str {
        match self {
            SortColumn::Id => "id",
            SortColumn::Name => "name",
            SortColumn::Content => "content",
            SortColumn::CreatedAt => "created_at",
            SortColumn::UpdatedAt => "updated_at",
            SortColumn::NodeType => "node_type",
        }
    }
}

/// Sort order for [`NodeFilter`] listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Compound predicate over `list_nodes` (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Restrict to this node type, if set.
    pub node_type: Option<String>,
    /// Restrict to these owner ids, if non-empty.
    pub owner_ids: Vec<String>,
    /// Only nodes created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only nodes created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Restrict on system-node classification, if set.
    pub is_system_node: Option<bool>,
    /// Restrict to nodes that do/don't have at least one hierarchy child.
    pub has_children: Option<bool>,
    /// Restrict to nodes that do/don't have at least one incoming reference.
    pub has_references: Option<bool>,
}

/// Page request (spec §4.8 "Pagination").
#[derive(Debug, Clone)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Rows per page.
    pub page_size: u32,
    /// Sort column (allow-listed).
    pub sort_by: SortColumn,
    /// Sort direction.
    pub sort_direction: SortDirection,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: 1,
            page_size: 50,
            sort_by: SortColumn::CreatedAt,
            sort_direction: SortDirection::Desc,
        }
    }
}

/// A page of [`Node`]s plus pagination metadata (spec §4.8).
#[derive(Debug, Clone)]
pub struct ListNodesResult {
    /// The nodes on this page.
    pub data: Vec<Node>,
    /// The page requested.
    pub page: u32,
    /// The page size requested.
    pub page_size: u32,
    /// Total matching rows across all pages.
    pub total_items: u64,
    /// Total number of pages, `ceil(total_items / page_size)`.
    pub total_pages: u64,
    /// `true` if a page after this one exists.
    pub has_next: bool,
    /// `true` if a page before this one exists.
    pub has_prev: bool,
}

/// List nodes matching `filter`, paginated per `pagination` (spec §4.8).
pub fn list_nodes(
    conn: &Arc<StoreConnection>,
    filter: &NodeFilter,
    pagination: &Pagination,
) -> TgdbResult<ListNodesResult> {
    if pagination.page < 1 {
        return Err(TgdbError::validation(
            "page",
            tgdb_core::LimitRule::IdPattern,
            Some(pagination.page.to_string()),
        ));
    }
    if pagination.page_size < 1 {
        return Err(TgdbError::validation(
            "page_size",
            tgdb_core::LimitRule::IdPattern,
            Some(pagination.page_size.to_string()),
        ));
    }

    let (where_clause, params) = build_where(filter);
    let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

    let count_sql = format!("SELECT COUNT(*) FROM nodes n {where_clause}");
    let total_items: i64 = conn
        .query(&count_sql, params_ref.as_slice(), |row| row.get(0))?
        .into_iter()
        .next()
        .unwrap_or(0);
    let total_items = total_items.max(0) as u64;

    let total_pages = if total_items == 0 {
        0
    } else {
        (total_items + pagination.page_size as u64 - 1) / pagination.page_size as u64
    };

    let offset = (pagination.page as u64 - 1) * pagination.page_size as u64;
    let cols = NODE_COLUMNS
        .split(", ")
        .map(|c| format!("n.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {cols} FROM nodes n {where_clause} \
         ORDER BY n.{} {} LIMIT {} OFFSET {}",
        pagination.sort_by.column(),
        pagination.sort_direction.as_sql(),
        pagination.page_size,
        offset
    );
    let data = conn.query(&sql, params_ref.as_slice(), node_from_row)?;

    Ok(ListNodesResult {
        data,
        page: pagination.page,
        page_size: pagination.page_size,
        total_items,
        total_pages,
        has_next: (pagination.page as u64) < total_pages,
        has_prev: pagination.page > 1,
    })
}

fn build_where(filter: &NodeFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(node_type) = &filter.node_type {
        clauses.push("n.node_type = ?".to_string());
        params.push(Box::new(node_type.clone()));
    }
    if !filter.owner_ids.is_empty() {
        let placeholders = filter.owner_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        clauses.push(format!("n.owner_id IN ({placeholders})"));
        for id in &filter.owner_ids {
            params.push(Box::new(id.clone()));
        }
    }
    if let Some(after) = filter.created_after {
        clauses.push("n.created_at >= ?".to_string());
        params.push(Box::new(after.to_rfc3339()));
    }
    if let Some(before) = filter.created_before {
        clauses.push("n.created_at <= ?".to_string());
        params.push(Box::new(before.to_rfc3339()));
    }
    if let Some(is_system) = filter.is_system_node {
        clauses.push("n.is_system_node = ?".to_string());
        params.push(Box::new(is_system as i64));
    }
    match filter.has_children {
        Some(true) => clauses.push(
            "EXISTS (SELECT 1 FROM hierarchy_edges e WHERE e.parent_id = n.id)".to_string(),
        ),
        Some(false) => clauses.push(
            "NOT EXISTS (SELECT 1 FROM hierarchy_edges e WHERE e.parent_id = n.id)".to_string(),
        ),
        None => {}
    }
    match filter.has_references {
        Some(true) => clauses.push(
            "EXISTS (SELECT 1 FROM node_references r WHERE r.target_id = n.id)".to_string(),
        ),
        Some(false) => clauses.push(
            "NOT EXISTS (SELECT 1 FROM node_references r WHERE r.target_id = n.id)".to_string(),
        ),
        None => {}
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conn_with_schema() -> Arc<StoreConnection> {
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
        conn.run(
            "CREATE TABLE hierarchy_edges (parent_id TEXT, child_id TEXT, position INTEGER)",
            [],
        )
        .unwrap();
        conn.run(
            "CREATE TABLE node_references (source_id TEXT, target_id TEXT, reference_type TEXT, context TEXT)",
            [],
        )
        .unwrap();
        conn
    }

    fn insert_node(conn: &StoreConnection, id: &str, node_type: &str, owner: Option<&str>) {
        conn.run(
            "INSERT INTO nodes VALUES (?1, ?2, '', NULL, ?3, ?4, ?4, ?5, 0, '{}', '{}')",
            rusqlite::params![id, id, owner, "2023-11-14T22:13:20Z", node_type],
        )
        .unwrap();
    }

    #[test]
    fn filters_by_node_type_and_paginates() {
        let conn = conn_with_schema();
        insert_node(&conn, "a", "node", None);
        insert_node(&conn, "b", "field", None);
        insert_node(&conn, "c", "node", None);

        let filter = NodeFilter {
            node_type: Some("node".to_string()),
            ..Default::default()
        };
        let page = Pagination {
            page: 1,
            page_size: 10,
            ..Default::default()
        };
        let result = list_nodes(&conn, &filter, &page).unwrap();
        assert_eq!(result.total_items, 2);
        assert_eq!(result.data.len(), 2);
        assert!(!result.has_next);
        assert!(!result.has_prev);
    }

    #[test]
    fn pagination_reports_next_and_prev() {
        let conn = conn_with_schema();
        for i in 0..5 {
            insert_node(&conn, &format!("n{i}"), "node", None);
        }
        let filter = NodeFilter::default();
        let page1 = Pagination {
            page: 1,
            page_size: 2,
            sort_by: SortColumn::Id,
            sort_direction: SortDirection::Asc,
        };
        let result = list_nodes(&conn, &filter, &page1).unwrap();
        assert_eq!(result.total_pages, 3);
        assert!(result.has_next);
        assert!(!result.has_prev);

        let page2 = Pagination { page: 2, ..page1 };
        let result2 = list_nodes(&conn, &filter, &page2).unwrap();
        assert!(result2.has_next);
        assert!(result2.has_prev);
    }

    #[test]
    fn has_children_filter() {
        let conn = conn_with_schema();
        insert_node(&conn, "parent", "node", None);
        insert_node(&conn, "child", "node", None);
        conn.run(
            "INSERT INTO hierarchy_edges VALUES ('parent','child',0)",
            [],
        )
        .unwrap();

        let filter = NodeFilter {
            has_children: Some(true),
            ..Default::default()
        };
        let result = list_nodes(&conn, &filter, &Pagination::default()).unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].id, "parent");
    }

    #[test]
    fn rejects_zero_page() {
        let conn = conn_with_schema();
        let err = list_nodes(
            &conn,
            &NodeFilter::default(),
            &Pagination { page: 0, ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, TgdbError::Validation { .. }));
    }

    #[test]
    fn created_after_filters() {
        let conn = conn_with_schema();
        insert_node(&conn, "old", "node", None);
        conn.run(
            "UPDATE nodes SET created_at = '2020-01-01T00:00:00Z' WHERE id = 'old'",
            [],
        )
        .unwrap();
        insert_node(&conn, "new", "node", None);

        let filter = NodeFilter {
            created_after: Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let result = list_nodes(&conn, &filter, &Pagination::default()).unwrap();
        assert_eq!(result.data.len(), 1);
        assert_eq!(result.data[0].id, "new");
    }
}
