//! Identifier validation and literal rendering for warehouse statements

use crate::error::{ArchiveError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Dataset, table and column names must match `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn validate_identifier(name: &str) -> Result<&str> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(ArchiveError::InvalidIdentifier(name.to_string()))
    }
}

/// Double-quote an identifier after validating it
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name).map(|n| format!("\"{}\"", n))
}

/// Render a value as an inline SQL literal.
///
/// Strings are single-quoted with embedded quotes doubled; objects and
/// arrays are stored as their JSON text.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        other => quote_string(&other.to_string()),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
