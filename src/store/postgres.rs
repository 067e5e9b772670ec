//! Postgres-backed primary store adapter.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::debug;

use super::{FieldMeta, PrimaryQueryError, PrimaryStore, QueryOutput, SqlParam};

/// [`PrimaryStore`] over a sqlx Postgres pool.
///
/// Rows are marshalled into a JSON array of column-name/value objects so the
/// proxy can treat the payload as opaque text. Column metadata is taken from
/// the first returned row; an empty result carries no field descriptors.
#[derive(Clone)]
pub struct PostgresPrimary {
    pool: PgPool,
}

impl PostgresPrimary {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait]
impl PrimaryStore for PostgresPrimary {
    async fn query(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<QueryOutput, PrimaryQueryError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlParam::Null => query.bind(Option::<String>::None),
                SqlParam::Bool(value) => query.bind(*value),
                SqlParam::Int(value) => query.bind(*value),
                SqlParam::Float(value) => query.bind(*value),
                SqlParam::Text(value) => query.bind(value.clone()),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| PrimaryQueryError::new(err.to_string()))?;

        let fields = rows.first().map(field_meta).unwrap_or_default();
        let mut marshalled = Vec::with_capacity(rows.len());
        for row in &rows {
            marshalled.push(row_to_json(row)?);
        }

        Ok(QueryOutput {
            rows: Value::Array(marshalled),
            fields,
        })
    }
}

fn field_meta(row: &PgRow) -> Vec<FieldMeta> {
    row.columns()
        .iter()
        .map(|column| FieldMeta {
            name: column.name().to_string(),
            type_name: column.type_info().name().to_string(),
        })
        .collect()
}

fn row_to_json(row: &PgRow) -> Result<Value, PrimaryQueryError> {
    let mut object = Map::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, PrimaryQueryError> {
    match type_name {
        "BOOL" => mapped(row.try_get::<Option<bool>, _>(idx)),
        "INT2" => mapped(row.try_get::<Option<i16>, _>(idx)),
        "INT4" => mapped(row.try_get::<Option<i32>, _>(idx)),
        "INT8" => mapped(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => mapped(row.try_get::<Option<f32>, _>(idx)),
        "FLOAT8" => mapped(row.try_get::<Option<f64>, _>(idx)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => mapped(row.try_get::<Option<String>, _>(idx)),
        "JSON" | "JSONB" => mapped(row.try_get::<Option<Value>, _>(idx)),
        other => Ok(fallback_text(row, idx, other)),
    }
}

fn mapped<T: Into<Value>>(result: Result<Option<T>, sqlx::Error>) -> Result<Value, PrimaryQueryError> {
    result
        .map(|value| value.map(Into::into).unwrap_or(Value::Null))
        .map_err(|err| PrimaryQueryError::new(err.to_string()))
}

/// Last resort for column types without a dedicated decode arm: try a text
/// decode, otherwise marshal as null rather than failing the whole query.
fn fallback_text(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(value) => value.map(Value::String).unwrap_or(Value::Null),
        Err(err) => {
            debug!(
                column = idx,
                column_type = type_name,
                error = %err,
                "column type has no JSON mapping; marshalled as null"
            );
            Value::Null
        }
    }
}
