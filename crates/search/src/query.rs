//! FTS query compilation (spec §4.10 "FTS query compilation").
//!
//! Input is sanitized and compiled into an SQLite FTS5 `MATCH` expression.
//! Control bytes are rejected outright; unbalanced quotes fall back to a
//! best-effort bag of terms rather than failing the whole search.

use tgdb_core::{TgdbError, TgdbResult};

/// A compiled FTS5 `MATCH` expression plus a record of which query
/// operators were recognized, for callers that want to report "did you
/// mean" style feedback.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// The FTS5 `MATCH` expression.
    pub match_expr: String,
    /// `true` if the original input had unbalanced quotes and was
    /// compiled as a best-effort term list instead of honoring phrase
    /// boundaries.
    pub degraded: bool,
}

/// Compile a raw search string into an FTS5 `MATCH` expression
/// (spec §4.10). Recognizes `AND`, `OR`, `NOT`, `"exact phrase"`, a
/// trailing `*` prefix marker, and a trailing `~` fuzzy marker (compiled
/// as a prefix match, since FTS5 has no native edit-distance operator).
pub fn compile(raw: &str) -> TgdbResult<CompiledQuery> {
    if raw.chars().any(|c| c.is_control() && c != '\t') {
        return Err(TgdbError::validation(
            "query",
            tgdb_core::LimitRule::IdPattern,
            Some("control bytes in search query".to_string()),
        ));
    }

    let quote_count = raw.chars().filter(|c| *c == '"').count();
    if quote_count % 2 != 0 {
        // Unbalanced quotes: fall back to a best-effort term list,
        // stripping the stray quote rather than rejecting the query.
        let terms: Vec<String> = raw
            .replace('"', " ")
            .split_whitespace()
            .map(sanitize_term)
            .filter(|t| !t.is_empty())
            .collect();
        return Ok(CompiledQuery {
            match_expr: terms.join(" "),
            degraded: true,
        });
    }

    let mut out = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                for next in chars.by_ref() {
                    if next == '"' {
                        out.push('"');
                        break;
                    }
                    out.push(next);
                }
            }
            '~' => {
                // Fuzzy marker: drop it, FTS5 has no edit-distance operator;
                // the preceding term already matched as a plain token.
            }
            _ => out.push(c),
        }
    }

    let compiled = out
        .split_whitespace()
        .map(|tok| match tok {
            "AND" | "OR" | "NOT" => tok.to_string(),
            t if t.ends_with('*') => t.to_string(),
            t if t.starts_with('"') => t.to_string(),
            t => sanitize_term(t),
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok(CompiledQuery { match_expr: compiled, degraded: false })
}

fn sanitize_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '*' || *c == '"')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_plain_terms() {
        let q = compile("graph database").unwrap();
        assert_eq!(q.match_expr, "graph database");
        assert!(!q.degraded);
    }

    #[test]
    fn preserves_boolean_operators() {
        let q = compile("graph AND database NOT sql").unwrap();
        assert_eq!(q.match_expr, "graph AND database NOT sql");
    }

    #[test]
    fn preserves_phrase_and_prefix() {
        let q = compile(r#""knowledge graph" data*"#).unwrap();
        assert_eq!(q.match_expr, r#""knowledge graph" data*"#);
    }

    #[test]
    fn degrades_on_unbalanced_quotes() {
        let q = compile(r#"graph "unterminated"#).unwrap();
        assert!(q.degraded);
        assert!(q.match_expr.contains("graph"));
    }

    #[test]
    fn rejects_control_bytes() {
        assert!(compile("graph\u{0007}database").is_err());
    }
}
