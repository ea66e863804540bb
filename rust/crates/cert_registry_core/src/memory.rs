//! In-memory `RecordStore`.
//!
//! Backs the server when no database is configured and every test in the
//! workspace. Predicates are evaluated with [`Op::matches`], so filter
//! semantics line up with the SQL adapter's stringified comparisons.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::mapping::key_string;
use crate::ports::RecordStore;
use crate::query::{FindQuery, Predicate, SortKey};
use crate::Record;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a table, creating it if needed.
    pub async fn insert(&self, table: &str, rows: Vec<Record>) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, Vec::len)
    }
}

fn matches_all(row: &Record, filter: &[Predicate]) -> bool {
    filter.iter().all(|p| p.op.matches(row.get(&p.column)))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => a.and_then(key_string).cmp(&b.and_then(key_string)),
    }
}

fn sort_rows(rows: &mut [Record], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        sort.iter()
            .map(|key| {
                let ord = compare(a.get(&key.field), b.get(&key.field));
                if key.descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

fn project(mut row: Record, columns: &[String]) -> Record {
    if !columns.is_empty() {
        row.retain(|k, _| columns.iter().any(|c| c == k));
    }
    row
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(&self, table: &str, query: &FindQuery) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Record> = tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|row| matches_all(row, &query.filter))
            .cloned()
            .collect();
        drop(tables);

        sort_rows(&mut rows, &query.sort);

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }

    async fn count(&self, table: &str, filter: &[Predicate]) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .map_or(0, |rows| rows.iter().filter(|r| matches_all(r, filter)).count()) as u64)
    }

    async fn create_many(&self, table: &str, rows: Vec<Record>) -> Result<Vec<Record>> {
        self.insert(table, rows.clone()).await;
        Ok(rows)
    }
}
