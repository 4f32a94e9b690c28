//! Relational store connection.
//!
//! The indexer talks to the source database through the [`RelationalStore`]
//! trait. [`SqlStore`] implements it on top of sqlx's `Any` driver so the
//! same code runs against MySQL in production and SQLite in tests. The pool
//! is capped at a single connection: one indexing run is one sequential
//! reader.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row as _};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::models::Row;
use crate::query::{Dialect, Param, Statement};

/// Source of entity rows.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Dialect the statements must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Run a statement and return its rows as column alias → scalar maps.
    async fn fetch_rows(&self, stmt: &Statement) -> Result<Vec<Row>>;

    /// Run a statement and return the first column of its first row.
    async fn fetch_i64(&self, stmt: &Statement) -> Result<Option<i64>>;
}

/// sqlx-backed [`RelationalStore`].
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Open a connection to the given database URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        let dialect = Dialect::from_url(url)?;
        sqlx::any::install_default_drivers();

        info!(?dialect, "connecting to relational store");
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(url)
            .await?;

        Ok(Self { pool, dialect })
    }

    /// Open the database configured in `[database]`.
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_url(&config.database.url).await
    }

    /// Underlying pool, for schema setup in tools and tests.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn bind<'q>(stmt: &'q Statement) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = match param {
                Param::Int(v) => query.bind(*v),
                Param::Text(v) => query.bind(v.as_str()),
            };
        }
        query
    }
}

#[async_trait]
impl RelationalStore for SqlStore {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch_rows(&self, stmt: &Statement) -> Result<Vec<Row>> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "fetching rows");
        let rows = Self::bind(stmt).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn fetch_i64(&self, stmt: &Statement) -> Result<Option<i64>> {
        debug!(sql = %stmt.sql, "fetching scalar");
        let row = Self::bind(stmt).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|r| match scalar_at(&r, 0) {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }))
    }
}

fn convert_row(row: &AnyRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), scalar_at(row, i));
    }
    out
}

/// Decode one column into a JSON scalar, whatever its storage type.
fn scalar_at(row: &AnyRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null);
    }
    Value::Null
}
