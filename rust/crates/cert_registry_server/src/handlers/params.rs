//! Request parameter shapes shared by the entity routes.
//!
//! List-valued parameters (`fields`, `populate`, `sort`) are comma separated
//! in query strings and may be a string or an array in JSON bodies. `query`
//! is either a list of conditions or a `{ field: value }` object where an
//! array value means membership.

use cert_registry_core::query::{Condition, Op, SortKey};
use cert_registry_core::service::FindParams;
use cert_registry_core::{MappingOptions, MappingRequest, RegistryError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    Many(Vec<String>),
    One(String),
}

impl StringList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringList::Many(items) => items,
            StringList::One(raw) => split_list(&raw),
        }
    }
}

/// One id or many.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdSet {
    Many(Vec<Value>),
    One(Value),
}

impl IdSet {
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            IdSet::Many(ids) => ids,
            IdSet::One(Value::Null) => Vec::new(),
            IdSet::One(id) => vec![id],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryInput {
    Conditions(Vec<Condition>),
    Fields(Map<String, Value>),
}

impl QueryInput {
    pub fn into_conditions(self) -> Vec<Condition> {
        match self {
            QueryInput::Conditions(conditions) => conditions,
            QueryInput::Fields(fields) => fields
                .into_iter()
                .map(|(field, value)| match value {
                    Value::Array(values) => Condition::new(field, Op::In(values)),
                    value => Condition::new(field, Op::Eq(value)),
                })
                .collect(),
        }
    }
}

/// Decode the JSON carried by a `query` query-string parameter.
pub fn parse_query(raw: Option<&str>) -> Result<Vec<Condition>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str::<QueryInput>(raw)
            .map(QueryInput::into_conditions)
            .map_err(|e| RegistryError::Validation(format!("query is not valid: {e}"))),
    }
}

fn mapping_options(multi: Option<bool>, value_field: Option<String>) -> MappingOptions {
    MappingOptions {
        multi: multi.unwrap_or(false),
        value_field: value_field.filter(|f| !f.is_empty()),
    }
}

/// Query string of the read routes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadQuery {
    pub query: Option<String>,
    pub fields: Option<String>,
    pub populate: Option<String>,
    pub sort: Option<String>,
    pub scope: Option<bool>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    /// Field to key the whole result by.
    pub mapping: Option<String>,
    pub mapping_multi: Option<bool>,
    pub mapping_field: Option<String>,
}

impl ReadQuery {
    pub fn populate(&self) -> Vec<String> {
        self.populate.as_deref().map(split_list).unwrap_or_default()
    }

    pub fn fields(&self) -> Option<Vec<String>> {
        self.fields.as_deref().map(split_list)
    }

    pub fn into_find(self) -> Result<FindParams> {
        let query = parse_query(self.query.as_deref())?;
        let mapping = self
            .mapping
            .clone()
            .filter(|key| !key.is_empty())
            .map(|key_field| MappingRequest {
                key_field,
                options: mapping_options(self.mapping_multi, self.mapping_field.clone()),
            });
        let sort = self
            .sort
            .as_deref()
            .map(split_list)
            .unwrap_or_default()
            .iter()
            .map(|key| SortKey::parse(key))
            .collect();

        Ok(FindParams {
            query,
            fields: self.fields(),
            sort,
            limit: self.limit,
            offset: self.offset,
            populate: self.populate(),
            scope: self.scope,
            mapping,
        })
    }
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveBody {
    #[serde(alias = "id")]
    pub ids: IdSet,
    #[serde(default)]
    pub fields: Option<StringList>,
    #[serde(default)]
    pub populate: Option<StringList>,
    /// `populate` was forwarded by a calling registry.
    #[serde(default)]
    pub inherited_populate: bool,
    #[serde(default)]
    pub query: Option<QueryInput>,
    #[serde(default)]
    pub scope: Option<bool>,
    #[serde(default = "yes")]
    pub mapping: bool,
    #[serde(default)]
    pub throw_if_not_exist: bool,
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateByPropBody {
    #[serde(alias = "id")]
    pub ids: IdSet,
    pub query_key: String,
    #[serde(default)]
    pub fields: Option<StringList>,
    #[serde(default)]
    pub populate: Option<StringList>,
    /// `populate` was forwarded by a calling registry.
    #[serde(default)]
    pub inherited_populate: bool,
    #[serde(default)]
    pub query: Option<QueryInput>,
    #[serde(default)]
    pub scope: Option<bool>,
    /// Key the rows by `queryKey`.
    #[serde(default)]
    pub mapping: bool,
    #[serde(default)]
    pub mapping_multi: Option<bool>,
    #[serde(default)]
    pub mapping_field: Option<String>,
    #[serde(default)]
    pub depth: u32,
}

impl PopulateByPropBody {
    pub fn mapping_options(&self) -> Option<MappingOptions> {
        self.mapping
            .then(|| mapping_options(self.mapping_multi, self.mapping_field.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_accepts_conditions_or_field_object() {
        let conditions = parse_query(Some(
            r#"[{"field": "certificateNumber", "op": "contains", "value": "A1"}]"#,
        ))
        .unwrap();
        assert_eq!(
            conditions,
            vec![Condition::new("certificateNumber", Op::Contains("A1".into()))]
        );

        let shorthand = parse_query(Some(r#"{"country": "LT", "id": [1, 2]}"#)).unwrap();
        assert_eq!(
            shorthand,
            vec![
                Condition::new("country", Op::Eq(json!("LT"))),
                Condition::new("id", Op::In(vec![json!(1), json!(2)])),
            ]
        );

        assert!(parse_query(None).unwrap().is_empty());
        assert!(parse_query(Some("  ")).unwrap().is_empty());
        assert!(matches!(
            parse_query(Some("[1, 2")),
            Err(RegistryError::Validation(_))
        ));
    }

    #[test]
    fn read_query_builds_find_params() {
        let query = ReadQuery {
            fields: Some("id, name".into()),
            populate: Some("country".into()),
            sort: Some("-id,name".into()),
            mapping: Some("country".into()),
            mapping_multi: Some(true),
            mapping_field: Some("name".into()),
            scope: Some(false),
            ..Default::default()
        };
        let find = query.into_find().unwrap();
        assert_eq!(find.fields, Some(vec!["id".to_string(), "name".to_string()]));
        assert_eq!(find.populate, vec!["country".to_string()]);
        assert_eq!(find.sort, vec![SortKey::parse("-id"), SortKey::parse("name")]);
        assert_eq!(find.scope, Some(false));
        let mapping = find.mapping.unwrap();
        assert_eq!(mapping.key_field, "country");
        assert!(mapping.options.multi);
        assert_eq!(mapping.options.value_field.as_deref(), Some("name"));
    }

    #[test]
    fn bodies_accept_single_ids_and_string_lists() {
        let body: ResolveBody =
            serde_json::from_value(json!({"id": 5, "populate": "country,post"})).unwrap();
        assert_eq!(body.ids.into_vec(), vec![json!(5)]);
        assert_eq!(
            body.populate.unwrap().into_vec(),
            vec!["country".to_string(), "post".to_string()]
        );
        assert!(body.mapping);
        assert!(!body.throw_if_not_exist);
        assert!(!body.inherited_populate);

        let body: PopulateByPropBody = serde_json::from_value(json!({
            "ids": [1, 2],
            "queryKey": "certificate",
            "populate": ["type"],
            "mapping": true,
            "mappingMulti": true
        }))
        .unwrap();
        assert_eq!(
            body.mapping_options(),
            Some(MappingOptions {
                multi: true,
                value_field: None
            })
        );
        assert_eq!(body.ids.into_vec().len(), 2);
    }
}
