//! Query executor
//!
//! External collaborator boundary: runs accepted SQL against the database
//! and reports rows/columns or a structured failure. The pipeline never
//! depends on the concrete engine, only on the capability.

use crate::error::{CoderError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}

/// PostgreSQL executor over a sqlx pool, bounded by a hard timeout.
pub struct PgExecutor {
    pool: PgPool,
    timeout: Duration,
}

impl PgExecutor {
    pub async fn connect(database_url: &str, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| CoderError::Execution(format!("cannot connect to database: {}", e)))?;
        Ok(Self { pool, timeout })
    }

    pub fn from_pool(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        let rows = tokio::time::timeout(self.timeout, sqlx::query(sql).fetch_all(&self.pool))
            .await
            .map_err(|_| {
                CoderError::Execution(format!("query exceeded {}s timeout", self.timeout.as_secs()))
            })?
            .map_err(|e| CoderError::Execution(e.to_string()))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows.iter().map(decode_row).collect();
        Ok(QueryResult { columns, rows })
    }
}

/// Decode a row into JSON values by column type name. Types outside the
/// supported set decode to null instead of failing the whole result.
fn decode_row(row: &PgRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| match col.type_info().name() {
            "INT2" => json_opt(row.try_get::<Option<i16>, _>(i)),
            "INT4" => json_opt(row.try_get::<Option<i32>, _>(i)),
            "INT8" => json_opt(row.try_get::<Option<i64>, _>(i)),
            "FLOAT4" => json_opt(row.try_get::<Option<f32>, _>(i)),
            "FLOAT8" => json_opt(row.try_get::<Option<f64>, _>(i)),
            "BOOL" => json_opt(row.try_get::<Option<bool>, _>(i)),
            "TIMESTAMP" => json_opt(
                row.try_get::<Option<chrono::NaiveDateTime>, _>(i)
                    .map(|v| v.map(|d| d.to_string())),
            ),
            "TIMESTAMPTZ" => json_opt(
                row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                    .map(|v| v.map(|d| d.to_rfc3339())),
            ),
            "DATE" => json_opt(
                row.try_get::<Option<chrono::NaiveDate>, _>(i)
                    .map(|v| v.map(|d| d.to_string())),
            ),
            _ => json_opt(row.try_get::<Option<String>, _>(i)),
        })
        .collect()
}

fn json_opt<T: Into<Value>>(value: sqlx::Result<Option<T>>) -> Value {
    match value {
        Ok(Some(v)) => v.into(),
        _ => Value::Null,
    }
}
