//! Size and shape limits for the node/edge/reference data model (spec §3).
//!
//! These constants are shared by the ingest transformer, which rejects
//! oversized records before they reach storage, and the graph repository,
//! which re-validates on every write since callers can bypass ingest.

/// Minimum byte length of a `Node::id`.
pub const MIN_ID_LEN: usize = 1;
/// Maximum byte length of a `Node::id`.
pub const MAX_ID_LEN: usize = 100;
/// Maximum byte length of `Node::name`.
pub const MAX_NAME_LEN: usize = 1000;
/// Maximum byte length of `Node::content`.
pub const MAX_CONTENT_LEN: usize = 1024 * 1024;
/// Maximum byte length of `fields_json`/`metadata_json`.
pub const MAX_JSON_LEN: usize = 100 * 1024;

/// Threshold above which an integer `created` timestamp is assumed to be
/// expressed in milliseconds rather than seconds (spec §4.2).
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// `true` iff `id` matches `^[A-Za-z0-9_-]+$` and is within length bounds.
pub fn is_valid_node_id(id: &str) -> bool {
    let len = id.len();
    if !(MIN_ID_LEN..=MAX_ID_LEN).contains(&len) {
        return false;
    }
    id.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Which rule of the `Node` shape validation tripped (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitRule {
    /// `id` is missing, empty, or fails the id pattern.
    IdPattern,
    /// `name` exceeds `MAX_NAME_LEN`.
    NameTooLong,
    /// `content` exceeds `MAX_CONTENT_LEN`.
    ContentTooLong,
    /// `fields_json`/`metadata_json` exceeds `MAX_JSON_LEN`.
    JsonTooLong,
    /// `created_at`/`updated_at` is not a valid date.
    InvalidDate,
}

impl LimitRule {
    /// Stable rule name used in `TgdbError::Validation { rule, .. }`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitRule::IdPattern => "id_pattern",
            LimitRule::NameTooLong => "name_too_long",
            LimitRule::ContentTooLong => "content_too_long",
            LimitRule::JsonTooLong => "json_too_long",
            LimitRule::InvalidDate => "invalid_date",
        }
    }
}

/// Validate a node id against the shape rules in spec §3.
pub fn validate_id(id: &str) -> Result<(), LimitRule> {
    if is_valid_node_id(id) {
        Ok(())
    } else {
        Err(LimitRule::IdPattern)
    }
}

/// Validate a node name against `MAX_NAME_LEN`.
pub fn validate_name(name: &str) -> Result<(), LimitRule> {
    if name.len() <= MAX_NAME_LEN {
        Ok(())
    } else {
        Err(LimitRule::NameTooLong)
    }
}

/// Validate node content against `MAX_CONTENT_LEN`.
pub fn validate_content(content: &str) -> Result<(), LimitRule> {
    if content.len() <= MAX_CONTENT_LEN {
        Ok(())
    } else {
        Err(LimitRule::ContentTooLong)
    }
}

/// Validate a serialized JSON blob (`fields_json`/`metadata_json`) against
/// `MAX_JSON_LEN`.
pub fn validate_json_blob(blob: &str) -> Result<(), LimitRule> {
    if blob.len() <= MAX_JSON_LEN {
        Ok(())
    } else {
        Err(LimitRule::JsonTooLong)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphanumeric_underscore_dash() {
        assert!(is_valid_node_id("abc_123-XYZ"));
    }

    #[test]
    fn rejects_empty() {
        assert!(!is_valid_node_id(""));
    }

    #[test]
    fn rejects_over_max_length() {
        let id = "a".repeat(MAX_ID_LEN + 1);
        assert!(!is_valid_node_id(&id));
    }

    #[test]
    fn accepts_max_length() {
        let id = "a".repeat(MAX_ID_LEN);
        assert!(is_valid_node_id(&id));
    }

    #[test]
    fn rejects_special_characters() {
        assert!(!is_valid_node_id("has space"));
        assert!(!is_valid_node_id("has/slash"));
        assert!(!is_valid_node_id("has.dot"));
        assert!(!is_valid_node_id("emoji🎉"));
    }

    #[test]
    fn validate_id_reports_rule() {
        assert_eq!(validate_id(""), Err(LimitRule::IdPattern));
        assert_eq!(validate_id("ok-id_1"), Ok(()));
    }

    #[test]
    fn validate_name_length() {
        assert_eq!(validate_name(&"a".repeat(MAX_NAME_LEN)), Ok(()));
        assert_eq!(
            validate_name(&"a".repeat(MAX_NAME_LEN + 1)),
            Err(LimitRule::NameTooLong)
        );
    }

    #[test]
    fn validate_content_length() {
        assert_eq!(validate_content(&"a".repeat(MAX_CONTENT_LEN)), Ok(()));
        assert_eq!(
            validate_content(&"a".repeat(MAX_CONTENT_LEN + 1)),
            Err(LimitRule::ContentTooLong)
        );
    }

    #[test]
    fn rule_as_str_is_stable() {
        assert_eq!(LimitRule::IdPattern.as_str(), "id_pattern");
        assert_eq!(LimitRule::InvalidDate.as_str(), "invalid_date");
    }
}
