//! Value-level normalisation applied when reading and writing fields.
//!
//! Legacy fixed-width `character(n)` columns come back space padded and
//! occasionally carry stray control bytes from the import pipeline.

use serde_json::Value;

use crate::descriptor::FieldType;

/// C0 controls other than tab, LF and CR, plus DEL. C1 code points are
/// left alone; mis-decoded legacy text carries letters there.
fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
}

/// Strip control bytes and surrounding whitespace from a string value.
/// Any other value (including null) passes through unchanged.
pub fn trim(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(trim_str(&s)),
        other => other,
    }
}

pub fn trim_str(s: &str) -> String {
    let cleaned: String = s.chars().filter(|c| !is_stripped_control(*c)).collect();
    cleaned.trim().to_string()
}

/// Convert loosely typed input (query strings, fixture files) into the
/// shape declared by the field. Values that do not parse are left alone.
pub fn coerce(field_type: FieldType, value: Value) -> Value {
    let Value::String(s) = value else {
        return value;
    };

    if s == "NULL" {
        return Value::Null;
    }

    match field_type {
        FieldType::Number => {
            let t = s.trim();
            if let Ok(i) = t.parse::<i64>() {
                Value::from(i)
            } else if let Some(n) = t.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                Value::Number(n)
            } else {
                Value::String(s)
            }
        }
        FieldType::Boolean => match s.trim() {
            "true" | "True" | "1" => Value::Bool(true),
            "false" | "False" | "0" => Value::Bool(false),
            _ => Value::String(s),
        },
        FieldType::Object | FieldType::Array => {
            serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s))
        }
        FieldType::String | FieldType::Date => Value::String(s),
    }
}
