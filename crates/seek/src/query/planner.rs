//! Query planner: expression tree → parameterized WHERE clause.
//!
//! Every comparison is case-insensitive: `=` gets `COLLATE NOCASE`,
//! and SQLite's `LIKE` folds case by default. User text is always
//! bound, never spliced into SQL.

use rusqlite::types::ToSqlOutput;
use rusqlite::ToSql;

use super::date::{parse_date_predicate, DateContext, DatePredicate};
use super::expression::{Expression, QueryKey};
use super::size::{parse_size_predicate, SizeOp};
use super::type_filter::{lookup_type_target, TypeTarget};

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(value) => value.to_sql(),
            Self::Integer(value) => value.to_sql(),
            Self::Real(value) => value.to_sql(),
        }
    }
}

/// A planned query: WHERE clause text plus its bindings in order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub where_clause: String,
    pub bindings: Vec<SqlValue>,
}

pub fn plan(expression: &Expression, context: &DateContext) -> QueryPlan {
    let (where_clause, bindings) = fragment(expression, context);
    QueryPlan {
        where_clause,
        bindings,
    }
}

fn fragment(expression: &Expression, context: &DateContext) -> (String, Vec<SqlValue>) {
    match expression {
        Expression::Term(term) => text_fragment("name", term),
        Expression::KeyValue { key, value } => key_value_fragment(*key, value, context),
        Expression::And(parts) => combine(parts, " AND ", context),
        Expression::Or(parts) => combine(parts, " OR ", context),
        Expression::Not(inner) => {
            let (clause, bindings) = fragment(inner, context);
            (format!("NOT ({clause})"), bindings)
        }
    }
}

fn combine(
    parts: &[Expression],
    separator: &str,
    context: &DateContext,
) -> (String, Vec<SqlValue>) {
    if parts.is_empty() {
        return ("1=1".to_string(), Vec::new());
    }
    let mut clauses = Vec::with_capacity(parts.len());
    let mut bindings = Vec::new();
    for part in parts {
        let (clause, mut part_bindings) = fragment(part, context);
        clauses.push(format!("({clause})"));
        bindings.append(&mut part_bindings);
    }
    (clauses.join(separator), bindings)
}

/// Match-mode dispatch for a text term against `column`:
/// quoted → exact, wildcards → translated LIKE, otherwise substring.
fn text_fragment(column: &str, raw: &str) -> (String, Vec<SqlValue>) {
    if raw.is_empty() {
        return ("1=1".to_string(), Vec::new());
    }
    if let Some(exact) = unquote(raw) {
        return (
            format!("{column} = ? COLLATE NOCASE"),
            vec![SqlValue::Text(exact.to_string())],
        );
    }
    if raw.contains('*') || raw.contains('?') {
        return (
            format!("{column} LIKE ? ESCAPE '\\'"),
            vec![SqlValue::Text(glob_to_like(raw))],
        );
    }
    (
        format!("{column} LIKE ? ESCAPE '\\'"),
        vec![SqlValue::Text(format!("%{}%", escape_like(raw)))],
    )
}

fn key_value_fragment(
    key: QueryKey,
    value: &str,
    context: &DateContext,
) -> (String, Vec<SqlValue>) {
    match key {
        QueryKey::Name => text_fragment("name", value),
        QueryKey::Path => text_fragment("full_path", value),
        QueryKey::Extension => {
            let ext = strip_quotes(value)
                .trim()
                .trim_start_matches('.')
                .to_ascii_lowercase();
            (
                "file_extension = ?".to_string(),
                vec![SqlValue::Text(ext)],
            )
        }
        QueryKey::Size => match parse_size_predicate(strip_quotes(value)) {
            Some((op, bytes)) => {
                let clause = match op {
                    SizeOp::Gt => "size > ?",
                    SizeOp::Lt => "size < ?",
                    SizeOp::Eq => "size = ?",
                };
                (clause.to_string(), vec![SqlValue::Integer(bytes)])
            }
            // Malformed size: substring search on the raw value.
            None => text_fragment("name", value),
        },
        QueryKey::Type => match lookup_type_target(strip_quotes(value).trim()) {
            TypeTarget::Directory => ("is_directory = 1".to_string(), Vec::new()),
            TypeTarget::Extensions(extensions) => {
                let placeholders = vec!["?"; extensions.len()].join(", ");
                (
                    format!("file_extension IN ({placeholders})"),
                    extensions
                        .iter()
                        .map(|ext| SqlValue::Text((*ext).to_string()))
                        .collect(),
                )
            }
            TypeTarget::Literal(ext) => (
                "file_extension = ?".to_string(),
                vec![SqlValue::Text(ext)],
            ),
        },
        // `created:` aliases `modified:` because the schema has no
        // creation column.
        QueryKey::Modified | QueryKey::Created => {
            match parse_date_predicate(strip_quotes(value), context) {
                Some(DatePredicate::Lower(bound)) => (
                    "date_modified >= ?".to_string(),
                    vec![SqlValue::Real(bound)],
                ),
                Some(DatePredicate::Range(start, end)) => (
                    "(date_modified >= ? AND date_modified < ?)".to_string(),
                    vec![SqlValue::Real(start), SqlValue::Real(end)],
                ),
                Some(DatePredicate::Before(bound)) => (
                    "date_modified < ?".to_string(),
                    vec![SqlValue::Real(bound)],
                ),
                None => ("1=0".to_string(), Vec::new()),
            }
        }
    }
}

/// Returns the inner text when `raw` is a quoted phrase.
fn unquote(raw: &str) -> Option<&str> {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

fn strip_quotes(raw: &str) -> &str {
    unquote(raw).unwrap_or(raw)
}

/// Escapes LIKE metacharacters so user text matches literally.
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Translates `*`/`?` wildcards into LIKE syntax, escaping literal
/// LIKE metacharacters.
fn glob_to_like(pattern: &str) -> String {
    let mut output = String::with_capacity(pattern.len() + 8);
    for ch in pattern.chars() {
        match ch {
            '*' => output.push('%'),
            '?' => output.push('_'),
            '%' => output.push_str("\\%"),
            '_' => output.push_str("\\_"),
            '\\' => output.push_str("\\\\"),
            _ => output.push(ch),
        }
    }
    output
}
