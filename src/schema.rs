//! The concrete schema catalog (spec §3, §6): nodes, hierarchy edges,
//! references, derived stats, the FTS5 index, and the import ledger.
//!
//! Authoring DDL is explicitly this facade's job — `tgdb-storage` only
//! supplies the [`tgdb_core::contract::MigrationRunner`] machinery, and
//! `tgdb-graph` assumes this schema already exists.

use tgdb_core::contract::MigrationRecord;

/// Version 1: the full schema as of this engine's first release. Future
/// schema changes get their own `MigrationRecord` with a higher version,
/// appended to [`catalog`] — version 1 never changes after release.
const V1_SCHEMA: &str = r#"
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
CREATE INDEX idx_nodes_owner ON nodes(owner_id);
CREATE INDEX idx_nodes_type ON nodes(node_type);
CREATE INDEX idx_nodes_created ON nodes(created_at);

CREATE TABLE hierarchy_edges (
    parent_id TEXT NOT NULL,
    child_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (parent_id, child_id)
);
CREATE INDEX idx_hierarchy_child ON hierarchy_edges(child_id);

CREATE TABLE node_references (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    context TEXT,
    PRIMARY KEY (source_id, target_id, reference_type)
);
CREATE INDEX idx_references_target ON node_references(target_id);

CREATE TABLE node_stats (
    node_id TEXT PRIMARY KEY,
    access_count INTEGER NOT NULL,
    incoming_references INTEGER NOT NULL,
    direct_children INTEGER NOT NULL,
    depth INTEGER NOT NULL
);

CREATE VIRTUAL TABLE nodes_fts USING fts5(id UNINDEXED, name, content, tags);

CREATE TABLE import (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    node_count INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL,
    error TEXT,
    metadata_json TEXT NOT NULL
);
CREATE INDEX idx_import_hash ON import(file_hash);
"#;

/// The ordered list of migrations applied to a fresh or existing store.
pub fn catalog() -> Vec<MigrationRecord> {
    vec![MigrationRecord {
        version: 1,
        description: "initial schema: nodes, hierarchy, references, stats, fts, import ledger".to_string(),
        sql: V1_SCHEMA.to_string(),
    }]
}
