//! Black-box end-to-end scenarios against the public [`tgdb::TanaStore`]
//! surface, one module per numbered scenario.
//!
//! These exercise the engine the way a caller would: open a store, ingest
//! an export, then query/mutate/traverse it. Internal unit tests for each
//! component live beside their own module; this suite checks the wiring
//! between crates.

use tgdb::TanaStore;
use tgdb_core::{ConstraintKind, ReferenceType, TgdbError};
use tgdb_graph::batch::{BatchOp, BatchOptions};
use tgdb_ingest::IngestOptions;
use tgdb_query::filter::{NodeFilter, Pagination, SortColumn, SortDirection};
use tgdb_query::traversal::PathType;

fn default_pagination() -> Pagination {
    Pagination {
        page: 1,
        page_size: 50,
        sort_by: SortColumn::Name,
        sort_direction: SortDirection::Asc,
    }
}

#[test]
fn minimal_ingest() {
    let store = TanaStore::open_memory().unwrap();
    let input = br#"{"nodes":[{"id":"a","name":"Alpha","created":1700000000}]}"#;
    let mut options = IngestOptions::default();
    options.skip_system_nodes = true;

    let (_, report) = store
        .ingest("export.json", input, options, |_| true, |_| {})
        .unwrap();
    assert_eq!(report.processed, 1);

    let result = store.list_nodes(&NodeFilter::default(), &default_pagination()).unwrap();
    assert_eq!(result.total_items, 1);
    let node = &result.data[0];
    assert_eq!(node.id, "a");
    assert_eq!(node.name, "Alpha");
    assert_eq!(node.created_at.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    assert!(!node.is_system_node);
    assert_eq!(node.node_type.as_str(), "node");
}

#[test]
fn system_node_filtering() {
    let input = br#"{"nodes":[
        {"id":"a","name":"Alpha","created":1700000000},
        {"id":"SYS_1","name":"Internal","created":1700000000}
    ]}"#;

    let store_skip = TanaStore::open_memory().unwrap();
    let mut skip_opts = IngestOptions::default();
    skip_opts.skip_system_nodes = true;
    store_skip.ingest("export.json", input, skip_opts, |_| true, |_| {}).unwrap();
    let skipped = store_skip.list_nodes(&NodeFilter::default(), &default_pagination()).unwrap();
    assert_eq!(skipped.total_items, 1);

    let store_keep = TanaStore::open_memory().unwrap();
    let keep_opts = IngestOptions::default();
    store_keep.ingest("export.json", input, keep_opts, |_| true, |_| {}).unwrap();
    let kept = store_keep.list_nodes(&NodeFilter::default(), &default_pagination()).unwrap();
    assert_eq!(kept.total_items, 2);
    let sys_node = store_keep.repository().get_node("SYS_1").unwrap();
    assert!(sys_node.is_system_node);
}

#[test]
fn reference_extraction_from_name_and_explicit_refs() {
    let store = TanaStore::open_memory().unwrap();
    let input = br#"{"nodes":[{"id":"a","name":"see [[Bob]] and #todo","created":1700000000,"refs":["c"]}]}"#;
    store.ingest("export.json", input, IngestOptions::default(), |_| true, |_| {}).unwrap();

    let refs = store
        .connection()
        .query(
            "SELECT target_id FROM node_references WHERE source_id = 'a' ORDER BY target_id",
            [],
            |row| row.get::<_, String>(0),
        )
        .unwrap();
    let mut targets: Vec<String> = refs;
    targets.sort();
    assert_eq!(targets, vec!["Bob".to_string(), "c".to_string(), "todo".to_string()]);
}

#[test]
fn hierarchy_cycle_is_rejected_and_store_unchanged() {
    let store = TanaStore::open_memory().unwrap();
    for id in ["A", "B", "C"] {
        let mut node = blank_node(id);
        node.name = id.to_string();
        store.repository().create_node(&node).unwrap();
    }
    store.repository().create_edge("A", "B", Some(0)).unwrap();
    store.repository().create_edge("B", "C", Some(0)).unwrap();

    let err = store.repository().create_edge("C", "A", Some(0)).unwrap_err();
    assert!(err.is_constraint(ConstraintKind::Cycle));

    let edges = store
        .connection()
        .query("SELECT parent_id, child_id FROM hierarchy_edges", [], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .unwrap();
    assert_eq!(edges.len(), 2);
}

#[test]
fn cascade_delete_removes_dependents() {
    let store = TanaStore::open_memory().unwrap();
    for id in ["A", "B", "X"] {
        store.repository().create_node(&blank_node(id)).unwrap();
    }
    store.repository().create_edge("A", "B", None).unwrap();
    store
        .repository()
        .create_reference("X", "A", ReferenceType::Mention, None)
        .unwrap();

    let err = store.repository().delete_node("A", false).unwrap_err();
    match err {
        TgdbError::Constraint { kind: ConstraintKind::Dependency, detail } => {
            assert!(detail.contains("children:1"));
            assert!(detail.contains("references:1"));
        }
        other => panic!("expected Dependency constraint, got {other:?}"),
    }

    store.repository().delete_node("A", true).unwrap();
    let missing = store.repository().get_node("A").unwrap_err();
    assert!(matches!(missing, TgdbError::NotFound { .. }));

    let remaining_edges: i64 = store
        .connection()
        .query("SELECT COUNT(*) FROM hierarchy_edges WHERE parent_id = 'A'", [], |row| row.get(0))
        .unwrap()[0];
    assert_eq!(remaining_edges, 0);
    let remaining_refs: i64 = store
        .connection()
        .query("SELECT COUNT(*) FROM node_references WHERE target_id = 'A'", [], |row| row.get(0))
        .unwrap()[0];
    assert_eq!(remaining_refs, 0);
}

#[test]
fn shortest_path_prefers_hierarchy_then_falls_back_to_references() {
    let store = TanaStore::open_memory().unwrap();
    for id in ["A", "B", "C", "D"] {
        store.repository().create_node(&blank_node(id)).unwrap();
    }
    store.repository().create_edge("A", "B", None).unwrap();
    store.repository().create_edge("B", "C", None).unwrap();
    store.repository().create_edge("A", "D", None).unwrap();

    let path = store.traversal().shortest_path("A", "C", false).unwrap().unwrap();
    assert_eq!(path.path, vec!["A".to_string(), "B".to_string(), "C".to_string()]);
    assert_eq!(path.distance, 2);
    assert_eq!(path.path_type, PathType::Hierarchy);

    assert!(store.traversal().shortest_path("D", "C", false).unwrap().is_none());

    store
        .repository()
        .create_reference("D", "C", ReferenceType::Related, None)
        .unwrap();
    let via_reference = store.traversal().shortest_path("D", "C", true).unwrap().unwrap();
    assert_eq!(via_reference.distance, 1);
}

#[test]
fn transactional_batch_is_all_or_nothing_on_duplicate_id() {
    let store = TanaStore::open_memory().unwrap();
    store.repository().create_node(&blank_node("dup")).unwrap();

    let ops = vec![
        BatchOp::CreateNode { node: blank_node("one"), depends_on: vec![] },
        BatchOp::CreateNode { node: blank_node("dup"), depends_on: vec![] },
        BatchOp::CreateNode { node: blank_node("three"), depends_on: vec![] },
    ];
    let mut options = BatchOptions::default();
    options.transactional = true;
    options.continue_on_error = false;

    let result = store.batch_engine().apply(ops, options).unwrap();
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].reason.contains("dup"), "reason was: {}", result.errors[0].reason);

    assert!(store.repository().get_node("one").is_err());
    assert!(store.repository().get_node("three").is_err());
}

fn blank_node(id: &str) -> tgdb_core::Node {
    use chrono::{TimeZone, Utc};
    tgdb_core::Node {
        id: id.to_string(),
        name: id.to_string(),
        content: id.to_string(),
        doc_type: None,
        owner_id: None,
        created_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        node_type: tgdb_core::NodeType::Node,
        is_system_node: false,
        fields: tgdb_core::Value::Object(Default::default()),
        metadata: tgdb_core::Value::Object(Default::default()),
    }
}
