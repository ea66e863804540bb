//! Declared single-result search actions.
//!
//! Criteria arrive as loose strings. They are validated and turned into
//! conditions before the store is touched; the store result must then
//! contain exactly one record.

use std::collections::HashMap;

use crate::error::{RegistryError, Result};
use crate::query::{Condition, Op};
use crate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Case-insensitive substring match.
    Contains,
    /// Stringified equality.
    Exact,
    /// Input is a 4-digit year matched against the year of a date field.
    Year,
}

#[derive(Debug, Clone)]
pub struct SearchParam {
    /// Criteria key as supplied by the caller.
    pub param: String,
    /// Public field the condition applies to.
    pub field: String,
    pub kind: MatchKind,
    /// Minimum trimmed length; `0` disables the check.
    pub min_len: usize,
}

impl SearchParam {
    pub fn new(param: &str, field: &str, kind: MatchKind) -> Self {
        Self {
            param: param.to_string(),
            field: field.to_string(),
            kind,
            min_len: 0,
        }
    }

    pub fn min_len(mut self, min_len: usize) -> Self {
        self.min_len = min_len;
        self
    }

    fn condition(&self, raw: &str) -> Result<Condition> {
        if raw.chars().count() < self.min_len {
            return Err(RegistryError::Validation(format!(
                "{} must be at least {} characters",
                self.param, self.min_len
            )));
        }

        let op = match self.kind {
            MatchKind::Contains => Op::Contains(raw.to_string()),
            MatchKind::Exact => Op::Eq(raw.into()),
            MatchKind::Year => Op::Year(parse_year(raw).ok_or_else(|| {
                RegistryError::Validation(format!("{} must be a 4-digit year", self.param))
            })?),
        };
        Ok(Condition::new(self.field.clone(), op))
    }
}

fn parse_year(raw: &str) -> Option<i32> {
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[derive(Debug, Clone)]
pub struct SearchSpec {
    /// Always required.
    pub primary: SearchParam,
    /// Included only when the caller supplies a non-empty value.
    pub filters: Vec<SearchParam>,
    /// Fields populated on the single match.
    pub populate: Vec<String>,
    pub not_found_message: String,
    pub ambiguous_message: String,
}

impl SearchSpec {
    pub fn new(primary: SearchParam) -> Self {
        Self {
            primary,
            filters: Vec::new(),
            populate: Vec::new(),
            not_found_message: "Record not found.".to_string(),
            ambiguous_message: "More than 1 record with same params.".to_string(),
        }
    }

    pub fn filter(mut self, param: SearchParam) -> Self {
        self.filters.push(param);
        self
    }

    pub fn populate(mut self, fields: &[&str]) -> Self {
        self.populate = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn messages(mut self, not_found: &str, ambiguous: &str) -> Self {
        self.not_found_message = not_found.to_string();
        self.ambiguous_message = ambiguous.to_string();
        self
    }

    /// Validate `criteria` and build the search conditions. Never does I/O.
    pub fn build_conditions(&self, criteria: &HashMap<String, String>) -> Result<Vec<Condition>> {
        let primary = criteria
            .get(&self.primary.param)
            .map(|v| v.trim())
            .unwrap_or_default();
        if primary.is_empty() {
            return Err(RegistryError::Validation(format!(
                "{} is required",
                self.primary.param
            )));
        }

        let mut conditions = vec![self.primary.condition(primary)?];
        for param in &self.filters {
            match criteria.get(&param.param).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => conditions.push(param.condition(value)?),
                _ => {}
            }
        }
        Ok(conditions)
    }

    /// Enforce the single-result contract on a store result.
    pub fn select_single(&self, mut rows: Vec<Record>) -> Result<Record> {
        match rows.len() {
            0 => Err(RegistryError::NotFound(self.not_found_message.clone())),
            1 => Ok(rows.remove(0)),
            _ => Err(RegistryError::Ambiguous(self.ambiguous_message.clone())),
        }
    }
}
