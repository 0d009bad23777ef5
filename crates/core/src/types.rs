//! The property graph data model (spec §3): [`Node`], [`HierarchyEdge`],
//! [`Reference`], derived [`NodeStats`], and the lineage ledgers
//! [`SchemaVersion`]/[`Import`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The three node kinds a Tana export distinguishes (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// An ordinary content node.
    Node,
    /// A field definition/value node.
    Field,
    /// A node that exists only to carry a reference.
    Reference,
}

impl NodeType {
    /// Parse from the lower-snake-case wire representation, defaulting to
    /// `Node` for anything unrecognized (spec §4.2 normalization).
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "field" => NodeType::Field,
            "reference" => NodeType::Reference,
            _ => NodeType::Node,
        }
    }

    /// Stable lower-snake-case wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Node => "node",
            NodeType::Field => "field",
            NodeType::Reference => "reference",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single node in the graph (spec §3).
///
/// `id` is immutable once created; `updated_at` advances on every field
/// change other than `id`/`created_at`. Callers receive owned copies —
/// there is no interior mutability here, the repository is the sole writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id, `^[A-Za-z0-9_-]+$`, 1..100 bytes.
    pub id: String,
    /// Display name, ≤ 1000 bytes.
    pub name: String,
    /// Free-form content body, ≤ 1 MiB.
    pub content: String,
    /// Tana's own type tag for this node, if present in the source export.
    pub doc_type: Option<String>,
    /// Owning user/workspace id, if present.
    pub owner_id: Option<String>,
    /// Creation timestamp; never changes after insert.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp; advances on every field mutation.
    pub updated_at: DateTime<Utc>,
    /// Which of the three node kinds this is.
    pub node_type: NodeType,
    /// `true` for Tana system/supertag scaffolding nodes (spec §4.2).
    pub is_system_node: bool,
    /// Arbitrary structured fields from the source record, ≤ 100 KiB.
    pub fields: Value,
    /// Arbitrary structured metadata, ≤ 100 KiB.
    pub metadata: Value,
}

/// An ordered parent→child relation carrying a sibling position (spec §3).
///
/// Invariants enforced by the repository, not by this type: uniqueness on
/// `(parent_id, child_id)`, no self-edge, no directed cycle, both endpoints
/// exist, and per-parent positions form a permutation of `0..N` after every
/// committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyEdge {
    /// Id of the parent node.
    pub parent_id: String,
    /// Id of the child node.
    pub child_id: String,
    /// Zero-based sibling position under `parent_id`.
    pub position: u32,
}

/// A typed directed reference between two nodes (spec §3).
///
/// Unique on `(source_id, target_id, reference_type)`. A reference whose
/// endpoint does not exist is "orphaned" and is reported, not silently
/// dropped, by the integrity checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Id of the node the reference originates from.
    pub source_id: String,
    /// Id of the node the reference points to.
    pub target_id: String,
    /// What kind of relation this reference encodes.
    pub reference_type: ReferenceType,
    /// Surrounding text snippet the reference was extracted from, if any.
    pub context: Option<String>,
}

/// The kinds of reference a node body can carry (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// A bare `[[id]]` style mention.
    Mention,
    /// An explicit hyperlink.
    Link,
    /// A supertag/tag application.
    Tag,
    /// A looser "related" association.
    Related,
}

impl ReferenceType {
    /// Stable lower-snake-case wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Mention => "mention",
            ReferenceType::Link => "link",
            ReferenceType::Tag => "tag",
            ReferenceType::Related => "related",
        }
    }

    /// Parse the lower-snake-case wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mention" => Some(ReferenceType::Mention),
            "link" => Some(ReferenceType::Link),
            "tag" => Some(ReferenceType::Tag),
            "related" => Some(ReferenceType::Related),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, recomputable counters for a node (spec §3).
///
/// Never authoritative — always reconstructible from `nodes`,
/// `hierarchy_edges`, and `references` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeStats {
    /// Number of times the node has been read via a tracked access path.
    pub access_count: u64,
    /// Number of references whose `target_id` is this node.
    pub incoming_references: u64,
    /// Number of hierarchy edges whose `parent_id` is this node.
    pub direct_children: u64,
    /// Distance from the nearest root ancestor (0 for roots).
    pub depth: u32,
}

/// A monotone schema migration record (spec §3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Monotonically increasing migration version.
    pub version: i64,
    /// Checksum of the applied migration's SQL, for drift detection.
    pub checksum: String,
    /// When this migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Lifecycle state of an ingest session recorded in the [`Import`] ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// The ingest pipeline is actively running.
    Running,
    /// The ingest pipeline finished without a fatal error.
    Completed,
    /// The ingest pipeline stopped early due to a fatal error.
    Failed,
}

impl ImportStatus {
    /// Stable lower-snake-case wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Running => "running",
            ImportStatus::Completed => "completed",
            ImportStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the optional ingest-session lineage ledger (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    /// Ledger row id.
    pub id: String,
    /// Source file name as provided by the caller.
    pub filename: String,
    /// Content hash of the source file, for dedup/provenance.
    pub file_hash: String,
    /// Nodes successfully ingested so far.
    pub node_count: u64,
    /// When the ingest session started.
    pub started_at: DateTime<Utc>,
    /// When the ingest session ended, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub status: ImportStatus,
    /// First fatal error message, if the session failed.
    pub error: Option<String>,
    /// Free-form metadata (options used, counts by category, …).
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips() {
        assert_eq!(NodeType::from_str_lenient("field"), NodeType::Field);
        assert_eq!(NodeType::from_str_lenient("reference"), NodeType::Reference);
        assert_eq!(NodeType::from_str_lenient("node"), NodeType::Node);
        assert_eq!(NodeType::from_str_lenient("garbage"), NodeType::Node);
        assert_eq!(NodeType::Field.as_str(), "field");
    }

    #[test]
    fn reference_type_parses_known_values() {
        assert_eq!(ReferenceType::parse("mention"), Some(ReferenceType::Mention));
        assert_eq!(ReferenceType::parse("bogus"), None);
    }

    #[test]
    fn import_status_display() {
        assert_eq!(ImportStatus::Completed.to_string(), "completed");
    }
}
