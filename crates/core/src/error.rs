//! The unified error taxonomy (spec §7).
//!
//! `TgdbError` is the single sum type returned by every public operation in
//! this engine. No substrate-specific error (`rusqlite::Error`, I/O errors)
//! crosses a public boundary unconverted — every crate that talks to
//! `rusqlite` maps its errors into one of the variants below.
//!
//! ```ignore
//! match result {
//!     Err(TgdbError::NotFound { entity, id }) => {
//!         println!("{entity} {id} does not exist");
//!     }
//!     Err(e) if e.is_retryable() => {
//!         // back off and retry
//!     }
//!     Err(e) => return Err(e),
//!     Ok(value) => { /* ... */ }
//! }
//! ```

use thiserror::Error;

use crate::limits::LimitRule;

/// Result type alias used throughout the engine.
pub type TgdbResult<T> = std::result::Result<T, TgdbError>;

/// Which structural invariant a `Constraint` violation concerns (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Duplicate primary key on insert.
    PrimaryKey,
    /// Duplicate unique tuple (e.g. hierarchy edge, reference triple).
    Unique,
    /// A referenced row does not exist.
    ForeignKey,
    /// A `CHECK`-style invariant failed.
    Check,
    /// Delete blocked by dependent children/references (cascade=false).
    Dependency,
    /// The operation would introduce a directed cycle.
    Cycle,
    /// A hierarchy edge or reference has a missing endpoint.
    Orphan,
}

impl ConstraintKind {
    /// Stable lower-snake-case name, used in error messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "primary_key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign_key",
            ConstraintKind::Check => "check",
            ConstraintKind::Dependency => "dependency",
            ConstraintKind::Cycle => "cycle",
            ConstraintKind::Orphan => "orphan",
        }
    }
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine-wide error taxonomy.
///
/// ## Categories
///
/// - **Malformed** — the record scanner found syntactically invalid bytes.
/// - **Validation** — a record failed a transformer/repository rule.
/// - **Constraint** — a structural invariant (§3) was violated.
/// - **NotFound** — a referenced entity does not exist.
/// - **Conflict** — a version/lock conflict survived retries.
/// - **Timeout** — a cooperative suspension-point deadline elapsed.
/// - **MemoryLimit** — the ingest pipeline's memory guard tripped.
/// - **Internal** — substrate or invariant violation that should not occur.
#[derive(Debug, Error)]
pub enum TgdbError {
    /// The scanner encountered syntactically invalid bytes.
    #[error("malformed input at byte offset {offset}")]
    Malformed {
        /// Byte offset at which the scanner detected the problem.
        offset: usize,
    },

    /// A record or node failed shape validation.
    #[error("validation failed on field `{field}` (rule: {rule}){}", value_suffix(value))]
    Validation {
        /// Field name the rule applies to (e.g. `"id"`, `"name"`).
        field: String,
        /// Stable rule identifier (see [`LimitRule::as_str`]).
        rule: String,
        /// Optional offending value, truncated for display.
        value: Option<String>,
    },

    /// A structural invariant from spec §3 was violated.
    #[error("constraint violation ({kind}): {detail}")]
    Constraint {
        /// Which invariant was violated.
        kind: ConstraintKind,
        /// Human-readable detail (e.g. `"children:1, references:1"`).
        detail: String,
    },

    /// The referenced entity does not exist.
    #[error("not found: {entity} `{id}`")]
    NotFound {
        /// Entity kind (`"node"`, `"import"`, …).
        entity: String,
        /// The id that was looked up.
        id: String,
    },

    /// A version/lock conflict survived all configured retries.
    #[error("conflict: {detail}")]
    Conflict {
        /// Human-readable detail.
        detail: String,
    },

    /// A cooperative suspension-point deadline elapsed.
    #[error("timeout in {scope}")]
    Timeout {
        /// Which operation scope timed out (e.g. `"transaction"`, `"batch chunk"`).
        scope: String,
    },

    /// The ingest pipeline's memory guard tripped with `continue_on_error=false`.
    #[error("memory limit exceeded: {current_mb}MB > {limit_mb}MB")]
    MemoryLimit {
        /// Estimated current heap usage in megabytes.
        current_mb: usize,
        /// Configured limit in megabytes.
        limit_mb: usize,
    },

    /// An unexpected internal error — substrate misuse or invariant break.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the unexpected condition.
        message: String,
    },
}

fn value_suffix(value: &Option<String>) -> String {
    match value {
        Some(v) => format!(" [{v}]"),
        None => String::new(),
    }
}

impl TgdbError {
    /// Build a `Validation` error from a [`LimitRule`].
    pub fn validation(field: impl Into<String>, rule: LimitRule, value: Option<String>) -> Self {
        TgdbError::Validation {
            field: field.into(),
            rule: rule.as_str().to_string(),
            value,
        }
    }

    /// Build a `Constraint` error.
    pub fn constraint(kind: ConstraintKind, detail: impl Into<String>) -> Self {
        TgdbError::Constraint {
            kind,
            detail: detail.into(),
        }
    }

    /// Build a `NotFound` error.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        TgdbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Build a `Conflict` error.
    pub fn conflict(detail: impl Into<String>) -> Self {
        TgdbError::Conflict {
            detail: detail.into(),
        }
    }

    /// Build a `Timeout` error.
    pub fn timeout(scope: impl Into<String>) -> Self {
        TgdbError::Timeout {
            scope: scope.into(),
        }
    }

    /// Build an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        TgdbError::Internal {
            message: message.into(),
        }
    }

    /// `true` for errors that may succeed if the caller retries: lock/busy
    /// conflicts and suspension-point timeouts. Constraint violations,
    /// validation failures, and malformed input are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TgdbError::Conflict { .. })
    }

    /// `true` for errors indicating a serious, likely unrecoverable,
    /// condition that should be logged and investigated rather than
    /// silently retried or swallowed.
    pub fn is_serious(&self) -> bool {
        matches!(self, TgdbError::Internal { .. })
    }

    /// `true` if this is a `Constraint` error of the given kind.
    pub fn is_constraint(&self, kind: ConstraintKind) -> bool {
        matches!(self, TgdbError::Constraint { kind: k, .. } if *k == kind)
    }
}

/// Classify a `rusqlite::Error` into the engine taxonomy (§4.5, §7).
///
/// `SQLITE_BUSY`/`SQLITE_LOCKED` map to `Conflict` (retryable); constraint
/// violations map to `Constraint`; everything else is `Internal`.
impl From<rusqlite::Error> for TgdbError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match &e {
            RE::SqliteFailure(se, _) => match se.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    TgdbError::conflict(e.to_string())
                }
                ErrorCode::ConstraintViolation => {
                    TgdbError::constraint(ConstraintKind::Check, e.to_string())
                }
                _ => TgdbError::internal(e.to_string()),
            },
            RE::QueryReturnedNoRows => TgdbError::not_found("row", "<query>"),
            other => TgdbError::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TgdbError {
    fn from(e: serde_json::Error) -> Self {
        TgdbError::validation("json", LimitRule::JsonTooLong, Some(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_retryable() {
        assert!(TgdbError::conflict("busy").is_retryable());
        assert!(!TgdbError::internal("bug").is_retryable());
        assert!(!TgdbError::not_found("node", "a").is_retryable());
    }

    #[test]
    fn internal_is_serious() {
        assert!(TgdbError::internal("bug").is_serious());
        assert!(!TgdbError::conflict("busy").is_serious());
    }

    #[test]
    fn is_constraint_matches_kind() {
        let e = TgdbError::constraint(ConstraintKind::Cycle, "a->b->a");
        assert!(e.is_constraint(ConstraintKind::Cycle));
        assert!(!e.is_constraint(ConstraintKind::Orphan));
    }

    #[test]
    fn display_includes_offset() {
        let e = TgdbError::Malformed { offset: 42 };
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn validation_display_includes_rule_and_value() {
        let e = TgdbError::validation("id", LimitRule::IdPattern, Some("bad id".to_string()));
        let msg = e.to_string();
        assert!(msg.contains("id"));
        assert!(msg.contains("id_pattern"));
        assert!(msg.contains("bad id"));
    }
}
