//! Static rejection of unsafe query text before it reaches a backend.
//!
//! SQL text is checked against a keyword denylist and a set of injection shapes and is
//! either returned trimmed or rejected outright. Text bound for an HTTP backend goes
//! through a different pass that strips markup, traversal sequences and shell
//! metacharacters instead. The two are not interchangeable; callers pick one through
//! [`QuerySanitizer`].

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Keywords that fail a SQL query wherever they appear, comments and literals included.
pub const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "TRUNCATE", "ALTER", "CREATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE",
];

static DESTRUCTIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)\b({})\b", DESTRUCTIVE_KEYWORDS.join("|"));
    Regex::new(&pattern).expect("destructive keyword pattern is valid")
});

static INJECTION_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("stacked statements", r";\s*\S"),
        ("UNION SELECT", r"(?i)\bunion\s+(all\s+)?select\b"),
        ("LOAD_FILE", r"(?i)\bload_file\s*\("),
        ("INTO OUTFILE", r"(?i)\binto\s+(outfile|dumpfile)\b"),
        ("SLEEP", r"(?i)\b(pg_)?sleep\s*\("),
        ("BENCHMARK", r"(?i)\bbenchmark\s*\("),
        ("XP_CMDSHELL", r"(?i)\bxp_cmdshell\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| {
        (
            label,
            Regex::new(pattern).expect("injection pattern is valid"),
        )
    })
    .collect()
});

static SCRIPT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\s*script[^>]*>.*?<\s*/\s*script\s*>").expect("script pattern is valid")
});

static TRAVERSAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\.\.[/\\])|(%2e%2e(%2f|%5c|/|\\))|(\.\.(%2f|%5c))")
        .expect("traversal pattern is valid")
});

/// Returns the first destructive keyword found in `text`, uppercased.
pub fn find_destructive_keyword(text: &str) -> Option<String> {
    DESTRUCTIVE_RE
        .find(text)
        .map(|found| found.as_str().to_uppercase())
}

/// Validates SQL text. Returns the trimmed input unchanged when it is safe.
pub fn sanitize_sql(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::UnsafeQuery("query is empty".to_string()));
    }

    if let Some(keyword) = find_destructive_keyword(trimmed) {
        warn!("Rejected query containing prohibited keyword {}", keyword);
        return Err(EngineError::UnsafeQuery(format!(
            "prohibited keyword '{}'",
            keyword
        )));
    }

    for (label, pattern) in INJECTION_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            warn!("Rejected query matching injection pattern {}", label);
            return Err(EngineError::UnsafeQuery(format!(
                "suspicious pattern '{}'",
                label
            )));
        }
    }

    Ok(trimmed.to_string())
}

/// Cleans text that will be turned into an HTTP request line.
pub fn sanitize_http(text: &str) -> Result<String> {
    let without_scripts = SCRIPT_BLOCK_RE.replace_all(text, "");

    let mut cleaned: String = without_scripts
        .chars()
        // newline survives: it separates the request line from a JSON body
        .filter(|c| !matches!(c, '<' | '>' | ';' | '|' | '`' | '$'))
        .filter(|c| *c == '\n' || !c.is_control())
        .collect();

    // "....//" collapses to "../" after one pass
    loop {
        let next = TRAVERSAL_RE.replace_all(&cleaned, "").into_owned();
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        return Err(EngineError::UnsafeQuery(
            "request is empty after sanitization".to_string(),
        ));
    }

    Ok(cleaned)
}

/// Sanitizer variant, chosen by backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySanitizer {
    Sql,
    Http,
}

impl QuerySanitizer {
    pub fn sanitize(&self, text: &str) -> Result<String> {
        match self {
            QuerySanitizer::Sql => sanitize_sql(text),
            QuerySanitizer::Http => sanitize_http(text),
        }
    }
}
