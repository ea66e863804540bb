//! Mapping reducer: reshape an ordered record sequence into a keyed
//! mapping (one value per key) or a keyed grouping (ordered list per key).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Record;

/// Stringified form of a scalar used as a mapping key. Null has no key.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingOptions {
    /// Append to an ordered list per key instead of overwriting.
    #[serde(default)]
    pub multi: bool,
    /// Store `record[value_field]` instead of the whole record.
    #[serde(default)]
    pub value_field: Option<String>,
}

/// Caller-facing reshape request, available on every list-returning
/// operation (`mapping`, `mappingMulti`, `mappingField` parameters).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRequest {
    pub key_field: String,
    #[serde(flatten)]
    pub options: MappingOptions,
}

/// Result of a reshape: either the untouched sequence or a keyed object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reshaped {
    List(Vec<Record>),
    Keyed(Map<String, Value>),
}

impl Reshaped {
    pub fn into_value(self) -> Value {
        match self {
            Reshaped::List(rows) => Value::Array(rows.into_iter().map(Value::Object).collect()),
            Reshaped::Keyed(map) => Value::Object(map),
        }
    }

    pub fn as_list(&self) -> Option<&[Record]> {
        match self {
            Reshaped::List(rows) => Some(rows),
            Reshaped::Keyed(_) => None,
        }
    }

    pub fn as_keyed(&self) -> Option<&Map<String, Value>> {
        match self {
            Reshaped::Keyed(map) => Some(map),
            Reshaped::List(_) => None,
        }
    }
}

/// Reshape `records` keyed by `key_field`.
///
/// An empty key leaves the sequence as it is. Records whose key is null or
/// missing are left out of a keyed result.
pub fn reduce(records: Vec<Record>, key_field: &str, options: &MappingOptions) -> Reshaped {
    if key_field.is_empty() {
        return Reshaped::List(records);
    }

    let mut out = Map::new();
    for record in records {
        let Some(key) = record.get(key_field).and_then(key_string) else {
            continue;
        };

        let value = match &options.value_field {
            Some(field) => record.get(field).cloned().unwrap_or(Value::Null),
            None => Value::Object(record),
        };

        if options.multi {
            match out
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                Value::Array(items) => items.push(value),
                slot => *slot = Value::Array(vec![value]),
            }
        } else {
            out.insert(key, value);
        }
    }

    Reshaped::Keyed(out)
}

/// Group whole records by the stringified value of `key_field`, keeping
/// input order inside each group.
pub fn group_by(records: Vec<Record>, key_field: &str) -> HashMap<String, Vec<Record>> {
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        if let Some(key) = record.get(key_field).and_then(key_string) {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

/// Index whole records by the stringified value of `key_field`; the last
/// record wins on duplicate keys.
pub fn index_by(records: Vec<Record>, key_field: &str) -> HashMap<String, Record> {
    records
        .into_iter()
        .filter_map(|r| r.get(key_field).and_then(key_string).map(|k| (k, r)))
        .collect()
}
