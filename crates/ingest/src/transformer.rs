//! The record transformer (spec §4.2, C2): parses one record byte-span into
//! a [`RawRecord`] and normalizes it into a [`Node`] plus extracted
//! references, applying the timestamp/content/type/system-classification
//! rules verbatim from spec §4.2.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};

use tgdb_core::limits::{self, LimitRule, MILLIS_THRESHOLD};
use tgdb_core::{Node, NodeType, Reference, ReferenceType, TgdbError, TgdbResult, Value};

/// System node names recognized verbatim (spec §4.2).
const SYSTEM_NAMES: &[&str] = &[
    "System",
    "Templates",
    "Daily notes",
    "Inbox",
    "Home",
    "Library",
    "Schema",
    "Configuration",
    "Settings",
    "Workspace",
    "All pages",
    "Supertags",
    "Fields",
    "Trash",
    "Archive",
];

/// System `type` values recognized verbatim (spec §4.2).
const SYSTEM_TYPES: &[&str] = &["system", "template", "schema", "config", "workspace"];

/// System `doc_type` values, matched case-insensitively (spec §4.2).
const SYSTEM_DOC_TYPES: &[&str] = &[
    "system",
    "template",
    "schema",
    "workspace",
    "supertag",
    "field",
];

/// Property-bag keys whose boolean-true value implies a system node
/// (spec §4.2).
const SYSTEM_PROPERTY_FLAGS: &[&str] = &["isSystem", "systemNode", "template", "schema"];

/// Property-bag keys consulted, in order, when both `content` and `name`
/// are empty (spec §4.2).
const CONTENT_FALLBACK_KEYS: &[&str] = &["content", "text", "body", "description", "value"];

/// A parsed-but-unnormalized record, i.e. the decoded JSON object for one
/// array element (spec §4.2 "RawRecord").
#[derive(Debug, Clone)]
pub struct RawRecord {
    value: Value,
}

impl RawRecord {
    /// Parse one record byte-span into a [`RawRecord`].
    pub fn parse(bytes: &[u8]) -> TgdbResult<Self> {
        let json: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(RawRecord {
            value: Value::from(json),
        })
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// The underlying value tree (used to populate `Node::fields`).
    pub fn as_value(&self) -> &Value {
        &self.value
    }
}

/// Knobs that affect normalization (spec §4.3 pipeline options that reach
/// into the transformer).
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Collapse interior whitespace and strip leading list/heading markers
    /// from derived content.
    pub normalize_content: bool,
    /// Retain the parsed [`RawRecord`] alongside the normalized [`Node`].
    pub preserve_raw: bool,
    /// If set, only these property-bag keys are copied into `Node::fields`.
    pub include_fields: Option<HashSet<String>>,
    /// Property-bag keys excluded from `Node::fields`, applied after
    /// `include_fields`.
    pub exclude_fields: HashSet<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            normalize_content: true,
            preserve_raw: false,
            include_fields: None,
            exclude_fields: HashSet::new(),
        }
    }
}

/// A reference extracted from a record's text or property bag
/// (spec §4.2 "references").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReference {
    /// The id or literal text the reference points at.
    pub target_id: String,
    /// What kind of reference this is.
    pub reference_type: ReferenceType,
}

impl ExtractedReference {
    /// Promote this extraction to a stored [`Reference`] row from `source`.
    pub fn into_reference(self, source_id: &str) -> Reference {
        Reference {
            source_id: source_id.to_string(),
            target_id: self.target_id,
            reference_type: self.reference_type,
            context: None,
        }
    }
}

/// The output of transforming one record: the normalized node, its
/// extracted references, and (optionally) the raw decoded record.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// The normalized, validated node.
    pub node: Node,
    /// References extracted from `refs` and from the node's text/property
    /// bag, deduplicated by `(target_id, reference_type)`.
    pub references: Vec<ExtractedReference>,
    /// The parsed record, retained only when `preserve_raw` is set.
    pub raw: Option<RawRecord>,
}

/// Parse and normalize one record byte-span into a [`Transformed`] result
/// (spec §4.2).
pub fn transform(bytes: &[u8], config: &TransformConfig) -> TgdbResult<Transformed> {
    let raw = RawRecord::parse(bytes)?;
    transform_record(raw, config)
}

fn transform_record(raw: RawRecord, config: &TransformConfig) -> TgdbResult<Transformed> {
    let id = raw
        .get_str("id")
        .ok_or_else(|| TgdbError::validation("id", LimitRule::IdPattern, None))?
        .to_string();
    limits::validate_id(&id).map_err(|rule| TgdbError::validation("id", rule, Some(id.clone())))?;

    let name = raw.get_str("name").unwrap_or("").to_string();
    limits::validate_name(&name)
        .map_err(|rule| TgdbError::validation("name", rule, Some(truncate(&name))))?;

    let content = derive_content(&raw, &name, config);
    limits::validate_content(&content)
        .map_err(|rule| TgdbError::validation("content", rule, Some(truncate(&content))))?;

    let created_at = parse_timestamp(raw.get("created"))?;
    let updated_at = raw
        .get("lastEdited")
        .map(parse_timestamp)
        .transpose()?
        .unwrap_or(created_at);

    let doc_type = raw.get_str("docType").map(str::to_string);
    let owner_id = raw.get_str("ownerId").map(str::to_string);
    let node_type = classify_node_type(&raw);
    let is_system_node = classify_system(&raw, &id, &name, node_type, doc_type.as_deref());

    let fields = filtered_fields(&raw, config);
    let fields_json = serde_json::to_string(&serde_json::Value::from(fields.clone()))
        .unwrap_or_default();
    limits::validate_json_blob(&fields_json)
        .map_err(|rule| TgdbError::validation("fields", rule, None))?;

    let metadata = Value::Object(Default::default());

    let node = Node {
        id: id.clone(),
        name: name.clone(),
        content: content.clone(),
        doc_type,
        owner_id,
        created_at,
        updated_at,
        node_type,
        is_system_node,
        fields,
        metadata,
    };

    let references = extract_references(&raw, &name, &content);

    Ok(Transformed {
        node,
        references,
        raw: if config.preserve_raw { Some(raw) } else { None },
    })
}

fn truncate(s: &str) -> String {
    if s.len() > 80 {
        format!("{}…", &s[..80])
    } else {
        s.to_string()
    }
}

/// Parse an integer/float `created`/`lastEdited` value into a UTC timestamp
/// (spec §4.2): values above `MILLIS_THRESHOLD` are milliseconds, otherwise
/// seconds; non-finite values are rejected.
fn parse_timestamp(value: Option<&Value>) -> TgdbResult<DateTime<Utc>> {
    let raw = value.ok_or_else(|| TgdbError::validation("created", LimitRule::InvalidDate, None))?;
    let seconds_f = match raw {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        Value::Text(s) => s
            .parse::<f64>()
            .map_err(|_| TgdbError::validation("created", LimitRule::InvalidDate, Some(s.clone())))?,
        _ => return Err(TgdbError::validation("created", LimitRule::InvalidDate, None)),
    };
    if !seconds_f.is_finite() {
        return Err(TgdbError::validation(
            "created",
            LimitRule::InvalidDate,
            Some(seconds_f.to_string()),
        ));
    }
    let millis_i = seconds_f as i64;
    let (secs, millis) = if millis_i.abs() > MILLIS_THRESHOLD {
        (millis_i / 1000, millis_i % 1000)
    } else {
        (millis_i, 0)
    };
    Utc.timestamp_opt(secs, (millis.unsigned_abs() as u32) * 1_000_000)
        .single()
        .ok_or_else(|| TgdbError::validation("created", LimitRule::InvalidDate, None))
}

/// Derive `content` per spec §4.2: explicit value wins; else fall back to
/// `name`; else the first present fallback property key; then, if
/// `normalize_content`, collapse whitespace and strip leading markers.
fn derive_content(raw: &RawRecord, name: &str, config: &TransformConfig) -> String {
    let explicit = raw.get_str("content").map(str::to_string);
    let mut content = explicit.unwrap_or_default();
    if content.is_empty() {
        content = name.to_string();
    }
    if content.is_empty() {
        for key in CONTENT_FALLBACK_KEYS {
            if let Some(v) = raw.get(key) {
                let s = v.as_display_string();
                if !s.is_empty() {
                    content = s;
                    break;
                }
            }
        }
    }
    if config.normalize_content {
        content = normalize_content(&content);
    }
    content
}

/// Collapse interior whitespace runs to a single space and strip a leading
/// list marker (`-`, `*`, `+`) or Markdown heading prefix (`#+`).
fn normalize_content(s: &str) -> String {
    let trimmed = s.trim();
    let stripped = strip_leading_markers(trimmed);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_markers(s: &str) -> &str {
    let after_heading = s.trim_start_matches('#');
    let after_heading = if after_heading.len() != s.len() {
        after_heading.trim_start()
    } else {
        s
    };
    if let Some(rest) = after_heading
        .strip_prefix("- ")
        .or_else(|| after_heading.strip_prefix("* "))
        .or_else(|| after_heading.strip_prefix("+ "))
    {
        rest
    } else {
        after_heading
    }
}

/// Classify `node_type` per spec §4.2: explicit `type` wins; else `field`
/// when `dataType` is present; else `node`.
fn classify_node_type(raw: &RawRecord) -> NodeType {
    if let Some(t) = raw.get_str("type") {
        return NodeType::from_str_lenient(t);
    }
    if raw.get("dataType").is_some() {
        return NodeType::Field;
    }
    NodeType::Node
}

/// Classify `is_system_node` per spec §4.2's disjunction of rules.
fn classify_system(
    raw: &RawRecord,
    id: &str,
    name: &str,
    node_type: NodeType,
    doc_type: Option<&str>,
) -> bool {
    if raw.get("sys").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    let sys_prefixes = ["SYS_", "SYSTEM_", "_"];
    if sys_prefixes.iter().any(|p| id.starts_with(p) || name.starts_with(p)) {
        return true;
    }
    if SYSTEM_NAMES.contains(&name) {
        return true;
    }
    if let Some(t) = raw.get_str("type") {
        if SYSTEM_TYPES.contains(&t) {
            return true;
        }
    }
    let _ = node_type;
    if let Some(dt) = doc_type {
        if SYSTEM_DOC_TYPES.contains(&dt.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    for key in SYSTEM_PROPERTY_FLAGS {
        if raw.get(key).and_then(Value::as_bool) == Some(true) {
            return true;
        }
    }
    false
}

/// Record-structural keys excluded from both the property bag
/// (`filtered_fields`) and the property-value reference scan
/// (`extract_references`) — neither treats the record's own envelope
/// fields as arbitrary node-id-shaped properties.
const RESERVED_KEYS: &[&str] = &[
    "id", "name", "content", "created", "lastEdited", "type", "docType", "ownerId", "sys", "refs",
];

/// Build `Node::fields` from the record's property bag, honoring
/// `include_fields`/`exclude_fields` (spec §4.3 knobs applied to the
/// property bag).
fn filtered_fields(raw: &RawRecord, config: &TransformConfig) -> Value {
    let Some(object) = raw.as_value().as_object() else {
        return Value::Object(Default::default());
    };
    let mut out = std::collections::BTreeMap::new();
    for (key, value) in object {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(include) = &config.include_fields {
            if !include.contains(key) {
                continue;
            }
        }
        if config.exclude_fields.contains(key) {
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    Value::Object(out)
}

/// Extract the union of explicit `refs` and references found in `name`'s
/// text and the property bag (spec §4.2 "references").
fn extract_references(raw: &RawRecord, name: &str, content: &str) -> Vec<ExtractedReference> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |target: String, kind: ReferenceType| {
        if seen.insert((target.clone(), kind)) {
            out.push(ExtractedReference {
                target_id: target,
                reference_type: kind,
            });
        }
    };

    if let Some(refs) = raw.get("refs").and_then(Value::as_array) {
        for r in refs {
            if let Some(s) = r.as_str() {
                push(s.to_string(), ReferenceType::Link);
            }
        }
    }

    for text in [name, content] {
        for mention in extract_bracket_mentions(text) {
            push(mention, ReferenceType::Mention);
        }
        for tag in extract_token_refs(text, '#') {
            push(tag, ReferenceType::Tag);
        }
        for at in extract_token_refs(text, '@') {
            push(at, ReferenceType::Mention);
        }
    }

    if let Some(object) = raw.as_value().as_object() {
        for (key, value) in object {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(s) = value.as_str() {
                if limits::is_valid_node_id(s) {
                    push(s.to_string(), ReferenceType::Related);
                }
            }
        }
    }

    out
}

/// Extract `[[Text]]`-style mentions.
fn extract_bracket_mentions(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'[' && bytes[i + 1] == b'[' {
            if let Some(end) = text[i + 2..].find("]]") {
                let inner = &text[i + 2..i + 2 + end];
                if !inner.is_empty() {
                    out.push(inner.to_string());
                }
                i += 2 + end + 2;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Extract `#token`/`@token`-style references for the given sigil.
fn extract_token_refs(text: &str, sigil: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == sigil {
            let rest = &text[i + c.len_utf8()..];
            let end = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '-'))
                .unwrap_or(rest.len());
            let token = &rest[..end];
            if !token.is_empty() {
                out.push(token.to_string());
            }
        }
    }
    out
}
