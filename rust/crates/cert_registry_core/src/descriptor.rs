//! Entity descriptors: the per-entity field table mapping public names to
//! physical columns, types, read transforms and population rules.
//!
//! Descriptors are plain immutable data built once at start-up. A single
//! generic pipeline in [`crate::service`] interprets them; there is no
//! per-entity behaviour beyond what is declared here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::ports::CallParams;
use crate::query::Condition;
use crate::search::SearchSpec;
use crate::trim::{coerce, trim};
use crate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

/// Pure old-value → new-value function applied when a field is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Trim,
}

impl Transform {
    pub fn apply(self, value: Value) -> Value {
        match self {
            Transform::Trim => trim(value),
        }
    }
}

/// What to do when a caller names a field the descriptor does not have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Drop unknown names and carry on.
    #[default]
    Ignore,
    /// Fail the request with a validation error.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveAction {
    /// Batched lookup by primary key returning an id → record mapping.
    Resolve,
    /// Batched lookup of rows whose `query_key` points back at the ids.
    PopulateByProp { query_key: String },
}

#[derive(Debug, Clone)]
pub struct PopulateRule {
    /// Entity whose resolution action is called.
    pub entity: String,
    pub action: ResolveAction,
    /// Static parameters forwarded with every call.
    pub params: CallParams,
    /// Nested populate list used unless `inherit_populate` is set.
    pub populate: Vec<String>,
    /// Forward the caller's own populate list instead of `populate`.
    pub inherit_populate: bool,
    /// Field of this record holding the lookup value. Defaults to the field
    /// itself for forward rules and the primary key for reverse rules.
    pub key_field: Option<String>,
}

impl PopulateRule {
    pub fn resolve(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            action: ResolveAction::Resolve,
            params: CallParams::default(),
            populate: Vec::new(),
            inherit_populate: false,
            key_field: None,
        }
    }

    pub fn by_property(entity: &str, query_key: &str) -> Self {
        Self {
            action: ResolveAction::PopulateByProp {
                query_key: query_key.to_string(),
            },
            ..Self::resolve(entity)
        }
    }

    pub fn populate(mut self, fields: &[&str]) -> Self {
        self.populate = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn inherit_populate(mut self) -> Self {
        self.inherit_populate = true;
        self
    }

    /// Restrict the related records to these fields.
    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.params.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Extra condition the related records must satisfy.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.params.query.push(condition);
        self
    }

    /// Resolve related records without their default scope.
    pub fn unscoped(mut self) -> Self {
        self.params.scope = Some(false);
        self
    }

    pub fn key_field(mut self, field: &str) -> Self {
        self.key_field = Some(field.to_string());
        self
    }
}

pub type VirtualFn = fn(&Record) -> Value;

#[derive(Debug, Clone)]
pub enum FieldKind {
    Plain,
    /// No column; computed from the full record after reading.
    Virtual(VirtualFn),
    /// This record holds the key (many-to-one).
    Forward(PopulateRule),
    /// Other records hold a key pointing here (one-to-many). No column.
    Reverse(PopulateRule),
}

#[derive(Debug, Clone)]
pub enum DefaultValue {
    Value(Value),
    Fn(fn() -> Value),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Value(v) => v.clone(),
            DefaultValue::Fn(f) => f(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub transform: Option<Transform>,
    pub default: Option<DefaultValue>,
    pub kind: FieldKind,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            column: name.to_string(),
            field_type,
            transform: None,
            default: None,
            kind: FieldKind::Plain,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, FieldType::Date)
    }

    pub fn column(mut self, column: &str) -> Self {
        self.column = column.to_string();
        self
    }

    pub fn trim(mut self) -> Self {
        self.transform = Some(Transform::Trim);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Value(value));
        self
    }

    pub fn default_fn(mut self, f: fn() -> Value) -> Self {
        self.default = Some(DefaultValue::Fn(f));
        self
    }

    pub fn computed(mut self, f: VirtualFn) -> Self {
        self.kind = FieldKind::Virtual(f);
        self
    }

    pub fn populate(mut self, rule: PopulateRule) -> Self {
        self.kind = FieldKind::Forward(rule);
        self
    }

    pub fn reverse(mut self, rule: PopulateRule) -> Self {
        self.kind = FieldKind::Reverse(rule);
        self
    }

    /// Virtual fields have no physical column.
    pub fn is_virtual(&self) -> bool {
        matches!(self.kind, FieldKind::Virtual(_) | FieldKind::Reverse(_))
    }

    pub fn populate_rule(&self) -> Option<&PopulateRule> {
        match &self.kind {
            FieldKind::Forward(rule) | FieldKind::Reverse(rule) => Some(rule),
            FieldKind::Plain | FieldKind::Virtual(_) => None,
        }
    }
}

/// One entry of a resolved projection.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec<'a> {
    pub public: &'a str,
    /// `None` for virtual fields, which are post-processed only.
    pub column: Option<&'a str>,
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    /// Public name of the primary key field.
    pub primary_key: String,
    pub fields: Vec<FieldDef>,
    /// Conditions applied to every read unless the caller disables scopes.
    pub default_scope: Vec<Condition>,
    pub search: Option<SearchSpec>,
}

impl EntityDescriptor {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            default_scope: Vec::new(),
            search: None,
        }
    }

    pub fn primary_key(mut self, field: &str) -> Self {
        self.primary_key = field.to_string();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn scope(mut self, condition: Condition) -> Self {
        self.default_scope.push(condition);
        self
    }

    pub fn search(mut self, spec: SearchSpec) -> Self {
        self.search = Some(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Physical column of the primary key.
    pub fn pk_column(&self) -> &str {
        self.column_of(&self.primary_key)
            .unwrap_or(&self.primary_key)
    }

    /// Check the static invariants of a descriptor.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RegistryError::Validation(format!("{}: {msg}", self.name)));

        if self.fields.is_empty() {
            return invalid("descriptor has no fields".into());
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return invalid(format!("duplicate field '{}'", field.name));
            }
            if !field.is_virtual() && !columns.insert(field.column.as_str()) {
                return invalid(format!("column '{}' mapped twice", field.column));
            }
        }

        match self.get(&self.primary_key) {
            Some(pk) if !pk.is_virtual() => {}
            _ => return invalid(format!("primary key '{}' missing", self.primary_key)),
        }

        for field in &self.fields {
            if let Some(key) = field.populate_rule().and_then(|r| r.key_field.as_deref()) {
                if !matches!(self.get(key), Some(f) if !f.is_virtual()) {
                    return invalid(format!("'{}' keys on unknown field '{key}'", field.name));
                }
            }
        }

        for condition in &self.default_scope {
            if !matches!(self.get(&condition.field), Some(f) if !f.is_virtual()) {
                return invalid(format!("scope uses unknown field '{}'", condition.field));
            }
        }

        Ok(())
    }

    /// Resolve a requested field list into an ordered projection.
    ///
    /// With no list every field is returned in declaration order. Unknown
    /// names follow `policy`.
    pub fn resolve_columns<'a>(
        &'a self,
        requested: Option<&[String]>,
        policy: FieldPolicy,
    ) -> Result<Vec<ColumnSpec<'a>>> {
        let selected: Vec<&FieldDef> = match requested {
            None => self.fields.iter().collect(),
            Some(names) => {
                self.check_known(names, policy)?;
                self.fields
                    .iter()
                    .filter(|f| names.iter().any(|n| n == &f.name))
                    .collect()
            }
        };

        Ok(selected
            .into_iter()
            .map(|f| ColumnSpec {
                public: &f.name,
                column: (!f.is_virtual()).then_some(f.column.as_str()),
                transform: f.transform,
            })
            .collect())
    }

    /// Apply `policy` to a list of public names.
    pub fn check_known(&self, names: &[String], policy: FieldPolicy) -> Result<()> {
        if policy == FieldPolicy::Reject {
            if let Some(unknown) = names.iter().find(|n| self.get(n).is_none()) {
                return Err(RegistryError::Validation(format!(
                    "unknown field '{unknown}' on {}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Physical column for a public field that has one.
    pub fn column_of(&self, name: &str) -> Option<&str> {
        self.get(name)
            .filter(|f| !f.is_virtual())
            .map(|f| f.column.as_str())
    }

    /// Rename a store row (column keyed) to a public-keyed record.
    pub fn from_row(&self, mut row: Record) -> Record {
        let mut out = Record::new();
        for field in self.fields.iter().filter(|f| !f.is_virtual()) {
            if let Some(value) = row.remove(&field.column) {
                out.insert(field.name.clone(), value);
            }
        }
        out
    }

    /// Build a store row from a public-keyed record for insertion.
    ///
    /// Unknown and virtual fields are rejected; defaults fill missing
    /// values and loosely typed input is coerced to the declared type.
    pub fn to_row(&self, record: Record) -> Result<Record> {
        for key in record.keys() {
            match self.get(key) {
                Some(f) if !f.is_virtual() => {}
                Some(_) => {
                    return Err(RegistryError::Validation(format!(
                        "field '{key}' on {} is virtual",
                        self.name
                    )))
                }
                None => {
                    return Err(RegistryError::Validation(format!(
                        "unknown field '{key}' on {}",
                        self.name
                    )))
                }
            }
        }

        let mut row = Record::new();
        for field in self.fields.iter().filter(|f| !f.is_virtual()) {
            let value = match record.get(&field.name) {
                Some(v) => coerce(field.field_type, v.clone()),
                None => match &field.default {
                    Some(default) => default.produce(),
                    None => continue,
                },
            };
            row.insert(field.column.clone(), value);
        }
        Ok(row)
    }
}
