//! Population resolver.
//!
//! For every requested field with a population rule, the distinct key
//! values across the whole record set go out in a single batched call.
//! Sibling fields are resolved concurrently and assigned once all calls
//! have returned. A dangling key becomes `null` (forward) or `[]`
//! (reverse); only a failing call is an error.

use std::collections::{HashMap, HashSet};

use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::descriptor::{EntityDescriptor, FieldDef, FieldKind, PopulateRule, ResolveAction};
use crate::error::{RegistryError, Result};
use crate::mapping::{group_by, key_string};
use crate::ports::{PopulateByPropOptions, RemoteResolver, ResolveOptions};
use crate::Record;

/// Field of the owning record whose value drives the lookup.
pub fn source_key<'d>(descriptor: &'d EntityDescriptor, field: &'d FieldDef) -> Option<&'d str> {
    let rule = field.populate_rule()?;
    Some(match (&rule.key_field, &field.kind) {
        (Some(key), _) => key.as_str(),
        (None, FieldKind::Reverse(_)) => descriptor.primary_key.as_str(),
        (None, _) => field.name.as_str(),
    })
}

/// Distinct non-null values of `key` in first-seen order.
pub fn distinct_values(records: &[Record], key: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| r.get(key))
        .filter(|v| key_string(v).is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

enum Resolved {
    Forward(Map<String, Value>),
    Reverse(HashMap<String, Vec<Record>>),
}

struct Job<'d> {
    field: &'d FieldDef,
    rule: &'d PopulateRule,
    key: &'d str,
    ids: Vec<Value>,
}

/// Replace the values of `fields` on every record with their related
/// records.
///
/// Names that are unknown or carry no population rule are skipped.
/// `caller_populate` is forwarded to rules marked `inherit_populate`;
/// `depth` is the nesting level of `records` and nested calls get
/// `depth + 1`.
pub async fn populate(
    resolver: &dyn RemoteResolver,
    descriptor: &EntityDescriptor,
    mut records: Vec<Record>,
    fields: &[String],
    caller_populate: &[String],
    depth: u32,
) -> Result<Vec<Record>> {
    let mut requested = HashSet::new();
    let mut jobs = Vec::new();
    for name in fields {
        if !requested.insert(name.as_str()) {
            continue;
        }
        let Some(field) = descriptor.get(name) else {
            continue;
        };
        let (Some(rule), Some(key)) = (field.populate_rule(), source_key(descriptor, field)) else {
            continue;
        };

        let ids = distinct_values(&records, key);
        if ids.is_empty() {
            tracing::trace!(entity = %descriptor.name, field = %field.name, "no keys to populate");
            continue;
        }
        jobs.push(Job {
            field,
            rule,
            key,
            ids,
        });
    }

    if jobs.is_empty() {
        return Ok(records);
    }

    let resolved = try_join_all(jobs.iter().map(|job| async move {
        let populate = if job.rule.inherit_populate {
            caller_populate.to_vec()
        } else {
            job.rule.populate.clone()
        };

        tracing::debug!(
            entity = %descriptor.name,
            field = %job.field.name,
            target = %job.rule.entity,
            ids = job.ids.len(),
            depth,
            "populating field"
        );

        match &job.rule.action {
            ResolveAction::Resolve => {
                let options = ResolveOptions {
                    populate,
                    inherited_populate: job.rule.inherit_populate,
                    throw_if_not_exist: false,
                    params: job.rule.params.clone(),
                    depth: depth + 1,
                };
                resolver
                    .resolve(&job.rule.entity, &job.ids, &options)
                    .await
                    .map(Resolved::Forward)
            }
            ResolveAction::PopulateByProp { query_key } => {
                let options = PopulateByPropOptions {
                    query_key: query_key.clone(),
                    populate,
                    inherited_populate: job.rule.inherit_populate,
                    params: job.rule.params.clone(),
                    depth: depth + 1,
                };
                let rows = resolver
                    .populate_by_prop(&job.rule.entity, &job.ids, &options)
                    .await?;
                Ok::<_, RegistryError>(Resolved::Reverse(group_by(rows, query_key)))
            }
        }
    }))
    .await?;

    for (job, resolved) in jobs.iter().zip(resolved) {
        for record in &mut records {
            let key = record.get(job.key).and_then(key_string);
            let value = match (&resolved, key) {
                (Resolved::Forward(mapping), Some(key)) => {
                    mapping.get(&key).cloned().unwrap_or(Value::Null)
                }
                (Resolved::Forward(_), None) => Value::Null,
                (Resolved::Reverse(groups), Some(key)) => Value::Array(
                    groups
                        .get(&key)
                        .map(|rows| rows.iter().cloned().map(Value::Object).collect())
                        .unwrap_or_default(),
                ),
                (Resolved::Reverse(_), None) => Value::Array(Vec::new()),
            };
            record.insert(job.field.name.clone(), value);
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDef, FieldType, PopulateRule};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        entity: String,
        ids: Vec<Value>,
        populate: Vec<String>,
        depth: u32,
    }

    /// Serves fixed rows per entity and records every call it receives.
    #[derive(Default)]
    struct RecordingResolver {
        rows: HashMap<String, Vec<Record>>,
        calls: Mutex<Vec<Call>>,
        failing: Option<String>,
    }

    impl RecordingResolver {
        fn with(mut self, entity: &str, rows: Value) -> Self {
            let rows = rows
                .as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().unwrap().clone())
                .collect();
            self.rows.insert(entity.to_string(), rows);
            self
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, entity: &str, ids: &[Value], populate: &[String], depth: u32) -> Result<()> {
            self.calls.lock().unwrap().push(Call {
                entity: entity.to_string(),
                ids: ids.to_vec(),
                populate: populate.to_vec(),
                depth,
            });
            if self.failing.as_deref() == Some(entity) {
                return Err(RegistryError::Upstream(anyhow::anyhow!("{entity} is down")));
            }
            Ok(())
        }

        fn matching(&self, entity: &str, key: &str, ids: &[Value]) -> Vec<Record> {
            let wanted: HashSet<_> = ids.iter().filter_map(key_string).collect();
            self.rows
                .get(entity)
                .into_iter()
                .flatten()
                .filter(|r| r.get(key).and_then(key_string).is_some_and(|k| wanted.contains(&k)))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl RemoteResolver for RecordingResolver {
        async fn resolve(
            &self,
            entity: &str,
            ids: &[Value],
            options: &ResolveOptions,
        ) -> Result<Map<String, Value>> {
            self.record(entity, ids, &options.populate, options.depth)?;
            Ok(self
                .matching(entity, "id", ids)
                .into_iter()
                .filter_map(|r| key_string(&r["id"]).map(|k| (k, Value::Object(r))))
                .collect())
        }

        async fn populate_by_prop(
            &self,
            entity: &str,
            ids: &[Value],
            options: &PopulateByPropOptions,
        ) -> Result<Vec<Record>> {
            self.record(entity, ids, &options.populate, options.depth)?;
            Ok(self.matching(entity, &options.query_key, ids))
        }
    }

    fn certificates() -> EntityDescriptor {
        EntityDescriptor::new("certificates", "sertifikatai")
            .field(FieldDef::number("id"))
            .field(FieldDef::number("exporter").populate(PopulateRule::resolve("activityLocations")))
            .field(
                FieldDef::string("importCountry")
                    .populate(PopulateRule::resolve("countries").inherit_populate()),
            )
            .field(
                FieldDef::new("loads", FieldType::Array).reverse(
                    PopulateRule::by_property("loads", "certificate").populate(&["type"]),
                ),
            )
    }

    fn records(v: Value) -> Vec<Record> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn one_batched_call_per_field() {
        let resolver = RecordingResolver::default().with(
            "activityLocations",
            json!([{"id": 1, "name": "UAB Pienas"}, {"id": 2, "name": "AB Grudai"}]),
        );
        let input = records(json!([
            {"id": 10, "exporter": 1},
            {"id": 11, "exporter": 2},
            {"id": 12, "exporter": 1},
        ]));

        let out = populate(&resolver, &certificates(), input, &names(&["exporter"]), &[], 0)
            .await
            .unwrap();

        let calls = resolver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].ids, vec![json!(1), json!(2)]);
        assert_eq!(calls[0].depth, 1);
        assert_eq!(out[2]["exporter"]["name"], json!("UAB Pienas"));
    }

    #[tokio::test]
    async fn null_keys_make_no_call() {
        let resolver = RecordingResolver::default();
        let input = records(json!([{"id": 10, "exporter": null}, {"id": 11}]));

        let out = populate(&resolver, &certificates(), input.clone(), &names(&["exporter"]), &[], 0)
            .await
            .unwrap();

        assert!(resolver.calls().is_empty());
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn dangling_forward_key_becomes_null() {
        let resolver = RecordingResolver::default()
            .with("activityLocations", json!([{"id": 1, "name": "UAB Pienas"}]));
        let input = records(json!([{"id": 10, "exporter": 1}, {"id": 11, "exporter": 99}]));

        let out = populate(&resolver, &certificates(), input, &names(&["exporter"]), &[], 0)
            .await
            .unwrap();

        assert_eq!(out[1]["exporter"], Value::Null);
        assert_eq!(out[0]["exporter"]["id"], json!(1));
    }

    #[tokio::test]
    async fn reverse_groups_children_and_defaults_to_empty() {
        let resolver = RecordingResolver::default().with(
            "loads",
            json!([
                {"id": 1, "certificate": 10, "number": "LT-1"},
                {"id": 2, "certificate": 10, "number": "LT-2"},
            ]),
        );
        let input = records(json!([{"id": 10}, {"id": 11}]));

        let out = populate(&resolver, &certificates(), input, &names(&["loads"]), &[], 0)
            .await
            .unwrap();

        assert_eq!(out[0]["loads"].as_array().unwrap().len(), 2);
        assert_eq!(out[1]["loads"], json!([]));
        let calls = resolver.calls();
        assert_eq!(calls[0].ids, vec![json!(10), json!(11)]);
        assert_eq!(calls[0].populate, names(&["type"]));
    }

    #[tokio::test]
    async fn inherit_forwards_the_caller_list() {
        let resolver = RecordingResolver::default()
            .with("countries", json!([{"id": "LT", "name": "Lietuva"}]));
        let input = records(json!([{"id": 10, "importCountry": "LT", "exporter": null}]));
        let caller = names(&["importCountry", "exporter"]);

        populate(&resolver, &certificates(), input, &caller, &caller, 2)
            .await
            .unwrap();

        let calls = resolver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].populate, caller);
        assert_eq!(calls[0].depth, 3);
    }

    #[tokio::test]
    async fn sibling_fields_each_get_one_call() {
        let resolver = RecordingResolver::default()
            .with("activityLocations", json!([{"id": 1}]))
            .with("loads", json!([]));
        let input = records(json!([{"id": 10, "exporter": 1}]));

        let out = populate(
            &resolver,
            &certificates(),
            input,
            &names(&["exporter", "loads", "exporter", "unknown", "id"]),
            &[],
            0,
        )
        .await
        .unwrap();

        let mut entities: Vec<_> = resolver.calls().into_iter().map(|c| c.entity).collect();
        entities.sort();
        assert_eq!(entities, vec!["activityLocations", "loads"]);
        assert_eq!(out[0]["loads"], json!([]));
    }

    #[tokio::test]
    async fn resolver_failure_propagates() {
        let resolver = RecordingResolver {
            failing: Some("activityLocations".into()),
            ..Default::default()
        };
        let input = records(json!([{"id": 10, "exporter": 1}]));

        let err = populate(&resolver, &certificates(), input, &names(&["exporter"]), &[], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Upstream(_)));
    }

    #[test]
    fn distinct_values_keep_first_seen_order() {
        let rows = records(json!([{"k": 2}, {"k": "2"}, {"k": null}, {"k": 1}, {}]));
        assert_eq!(distinct_values(&rows, "k"), vec![json!(2), json!(1)]);
    }
}
