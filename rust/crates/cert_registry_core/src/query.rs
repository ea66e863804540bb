//! Filter, sort and projection primitives shared by the entity service and
//! the record store adapters.
//!
//! The service speaks in public field names ([`Condition`]); stores receive
//! the same operators addressed by physical column ([`Predicate`]).

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mapping::key_string;

/// A single comparison. Opaque to the core: it assembles these and the
/// store decides how to execute them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "value")]
pub enum Op {
    /// Exact equality on the stringified value.
    Eq(Value),
    /// Set membership.
    In(Vec<Value>),
    /// Case-insensitive substring match.
    Contains(String),
    /// Year part of a stored date equals the given year.
    Year(i32),
    /// `IS TRUE` when `true`, `IS NOT TRUE` when `false` (null counts as not true).
    Is(bool),
}

impl Op {
    /// Evaluate against an in-memory value. Stores without a query engine
    /// use this; SQL stores render the operator instead.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Op::Eq(expected) => match (value.and_then(key_string), key_string(expected)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            Op::In(candidates) => {
                let Some(actual) = value.and_then(key_string) else {
                    return false;
                };
                candidates
                    .iter()
                    .filter_map(key_string)
                    .any(|c| c == actual)
            }
            Op::Contains(needle) => value
                .and_then(key_string)
                .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
            Op::Year(year) => value
                .and_then(Value::as_str)
                .and_then(year_of)
                .map(|y| y == *year)
                .unwrap_or(false),
            Op::Is(expected) => {
                let is_true = matches!(value, Some(Value::Bool(true)));
                is_true == *expected
            }
        }
    }
}

/// Extract the calendar year from an ISO date or timestamp string.
pub fn year_of(s: &str) -> Option<i32> {
    use chrono::Datelike;

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.year());
    }
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .map(|d| d.year())
}

/// Predicate addressed by public field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    #[serde(flatten)]
    pub op: Op,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Op) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }
}

/// Predicate addressed by physical column.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: Op,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: Op) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    /// Parse `name` / `-name` sort syntax.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: raw.to_string(),
                descending: false,
            },
        }
    }
}

/// A store-level read request. Everything is addressed by column.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Vec<Predicate>,
    /// Columns to project; empty means every column.
    pub columns: Vec<String>,
    /// Sort keys, with `field` holding the column name.
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}
