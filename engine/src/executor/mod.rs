//! SQLite SQL executor
//!
//! Bundled `SqlExecutor` over a read-only sqlx pool, plus schema
//! introspection that turns the database catalogue into retrievable
//! snippets (one per table, one per foreign-key join).

use ace_sdk::errors::ExecutionError;
use ace_sdk::{Rows, Snippet, SqlExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, ConnectOptions, Executor, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Rows returned to the pipeline per statement
pub const FETCH_LIMIT: usize = 100;

pub struct SqliteSqlExecutor {
    pool: SqlitePool,
    fetch_limit: usize,
}

impl SqliteSqlExecutor {
    /// Open an existing database read-only
    pub async fn open(db_path: &Path) -> Result<Self> {
        info!("Opening query database at: {}", db_path.display());

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .read_only(true)
            .create_if_missing(false)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open query database {}", db_path.display()))?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            fetch_limit: FETCH_LIMIT,
        }
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Describe every user table and foreign-key relationship as snippets
    pub async fn describe_schema(&self) -> Result<Vec<Snippet>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tables")?;

        let mut snippets = Vec::new();
        let mut joins: BTreeMap<String, Snippet> = BTreeMap::new();

        for table in &tables {
            let columns: Vec<(String, String, i64)> =
                sqlx::query_as("SELECT name, type, pk FROM pragma_table_info(?) ORDER BY cid")
                    .bind(table)
                    .fetch_all(&self.pool)
                    .await
                    .with_context(|| format!("Failed to read columns of {}", table))?;

            let primary_key: Vec<&str> = columns
                .iter()
                .filter(|(_, _, pk)| *pk > 0)
                .map(|(name, _, _)| name.as_str())
                .collect();
            let described: Vec<String> = columns
                .iter()
                .map(|(name, ty, pk)| {
                    let ty = if ty.is_empty() { "ANY" } else { ty.as_str() };
                    if *pk > 0 {
                        format!("{} ({} PK)", name, ty)
                    } else {
                        format!("{} ({})", name, ty)
                    }
                })
                .collect();

            snippets.push(Snippet::new(
                format!("table_{}", table),
                format!(
                    "Table: {}\nColumns: {}\nPrimary Key: {}",
                    table,
                    described.join(", "),
                    if primary_key.is_empty() {
                        "None".to_string()
                    } else {
                        primary_key.join(", ")
                    }
                ),
            ));

            let foreign_keys: Vec<(String, String, Option<String>)> = sqlx::query_as(
                r#"SELECT "table", "from", "to" FROM pragma_foreign_key_list(?) ORDER BY id, seq"#,
            )
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read foreign keys of {}", table))?;

            for (target, from, to) in foreign_keys {
                let key = format!("join_{}_{}", table, target);
                // First key wins for a table pair
                if joins.contains_key(&key) {
                    continue;
                }
                let to = to.unwrap_or_else(|| from.clone());
                let content = format!(
                    "JOIN Pattern: {table} → {target}\nRelationship: {table}.{from} = {target}.{to}\nSQL Example: JOIN {target} ON {table}.{from} = {target}.{to}"
                );
                joins.insert(key.clone(), Snippet::new(key, content));
            }
        }

        debug!(tables = tables.len(), joins = joins.len(), "Schema described");
        snippets.extend(joins.into_values());
        Ok(snippets)
    }
}

#[async_trait]
impl SqlExecutor for SqliteSqlExecutor {
    async fn execute(&self, sql: &str) -> std::result::Result<Rows, ExecutionError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExecutionError(database_message(&e)))?;

        let columns = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            // No rows to read names from; ask the statement itself
            None => match (&self.pool).describe(sql).await {
                Ok(described) => described
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect(),
                Err(_) => Vec::new(),
            },
        };

        let row_count = rows.len() as u64;
        let rows = rows
            .iter()
            .take(self.fetch_limit)
            .map(|row| (0..row.len()).map(|i| cell(row, i)).collect())
            .collect();

        Ok(Rows {
            columns,
            rows,
            row_count,
        })
    }
}

/// Decode one cell into JSON, trying the SQLite storage classes in turn
fn cell(row: &SqliteRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v.map(|b| Value::from(hex::encode(b))).unwrap_or(Value::Null);
    }
    Value::Null
}

/// The database's own message, without sqlx's wrapping
fn database_message(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    }
}
