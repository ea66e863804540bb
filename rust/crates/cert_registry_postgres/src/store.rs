//! `RecordStore` over Postgres.
//!
//! Rows travel as JSON: reads wrap the projected subquery in `to_jsonb`,
//! inserts expand a JSON array with `jsonb_populate_recordset`. Comparisons
//! go through `::text` so they match the stringified-key semantics of the
//! core (and strip `character(n)` padding on the way).

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use cert_registry_core::error::{RegistryError, Result};
use cert_registry_core::mapping::key_string;
use cert_registry_core::ports::RecordStore;
use cert_registry_core::query::{FindQuery, Op, Predicate};
use cert_registry_core::Record;

// ── SQL building ──────────────────────────────────────────────

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &Predicate) {
    let col = quote_ident(&predicate.column);
    match &predicate.op {
        Op::Eq(value) => match key_string(value) {
            Some(key) => {
                qb.push(format!("{col}::text = ")).push_bind(key);
            }
            None => {
                qb.push(format!("{col} IS NULL"));
            }
        },
        Op::In(values) => {
            let keys: Vec<String> = values.iter().filter_map(key_string).collect();
            if keys.is_empty() {
                qb.push("FALSE");
            } else {
                qb.push(format!("{col}::text = ANY("))
                    .push_bind(keys)
                    .push(")");
            }
        }
        Op::Contains(needle) => {
            qb.push(format!("{col}::text ILIKE "))
                .push_bind(format!("%{}%", escape_like(needle)));
        }
        Op::Year(year) => {
            qb.push(format!("EXTRACT(YEAR FROM {col}::date)::int = "))
                .push_bind(*year);
        }
        Op::Is(true) => {
            qb.push(format!("{col} IS TRUE"));
        }
        Op::Is(false) => {
            qb.push(format!("{col} IS NOT TRUE"));
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'static, Postgres>, filter: &[Predicate]) {
    for (i, predicate) in filter.iter().enumerate() {
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        push_predicate(qb, predicate);
    }
}

pub(crate) fn select_query(
    schema: &str,
    table: &str,
    query: &FindQuery,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT to_jsonb(t) FROM (SELECT ");
    if query.columns.is_empty() {
        qb.push("*");
    } else {
        let columns: Vec<String> = query.columns.iter().map(|c| quote_ident(c)).collect();
        qb.push(columns.join(", "));
    }
    qb.push(" FROM ").push(qualified(schema, table));

    push_where(&mut qb, &query.filter);

    if !query.sort.is_empty() {
        let keys: Vec<String> = query
            .sort
            .iter()
            .map(|k| {
                let dir = if k.descending { "DESC" } else { "ASC" };
                format!("{} {dir}", quote_ident(&k.field))
            })
            .collect();
        qb.push(" ORDER BY ").push(keys.join(", "));
    }
    // Saturate rather than wrap; the registry rejects larger windows first.
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if let Some(offset) = query.offset {
        qb.push(" OFFSET ").push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    }
    qb.push(") t");
    qb
}

pub(crate) fn count_query(
    schema: &str,
    table: &str,
    filter: &[Predicate],
) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM ");
    qb.push(qualified(schema, table));
    push_where(&mut qb, filter);
    qb
}

/// Insert only the columns that appear in `rows`, so omitted columns keep
/// their database defaults.
pub(crate) fn insert_query(
    schema: &str,
    table: &str,
    rows: Vec<Record>,
) -> QueryBuilder<'static, Postgres> {
    let mut columns: Vec<&str> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }
    let columns = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let target = qualified(schema, table);

    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {target} AS t ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{target}, "
    ));
    qb.push_bind(Value::Array(rows.into_iter().map(Value::Object).collect()))
        .push(") RETURNING to_jsonb(t)");
    qb
}

fn into_record(value: Value) -> Result<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RegistryError::Upstream(anyhow!(
            "expected a JSON object row, got {other}"
        ))),
    }
}

// ── PgRecordStore ─────────────────────────────────────────────

/// Postgres-backed record store for the tables of one schema.
pub struct PgRecordStore {
    pool: PgPool,
    schema: String,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(&self, table: &str, query: &FindQuery) -> Result<Vec<Record>> {
        let mut qb = select_query(&self.schema, table, query);
        let rows: Vec<Value> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("select from {table}"))?;
        rows.into_iter().map(into_record).collect()
    }

    async fn count(&self, table: &str, filter: &[Predicate]) -> Result<u64> {
        let mut qb = count_query(&self.schema, table, filter);
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("count {table}"))?;
        Ok(count.max(0) as u64)
    }

    async fn create_many(&self, table: &str, rows: Vec<Record>) -> Result<Vec<Record>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let count = rows.len();
        let mut qb = insert_query(&self.schema, table, rows);
        let inserted: Vec<Value> = qb
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("insert {count} rows into {table}"))?;
        tracing::debug!(table, rows = inserted.len(), "inserted rows");
        inserted.into_iter().map(into_record).collect()
    }
}
