//! Schema introspection and column-set aware statement building
//!
//! Deployments drift: a column one database has may be missing from another.
//! Writers here never hard-code a column list. They ask the live schema which
//! columns exist (`PRAGMA table_info`), cache the answer for a while, and build
//! their INSERT/UPDATE from the intersection of what they want to write and
//! what the table actually has.
//!
//! # Usage
//!
//! ```rust,ignore
//! let cache = ColumnCache::new(Duration::from_secs(300));
//! let columns = cache.get(&pool, "ops_event_log").await?;
//!
//! let stmt = InsertBuilder::new("ops_event_log")
//!     .value("source", "autoplan")
//!     .value_any(&["payload", "payload_json"], SqlValue::Json(payload))
//!     .build(&columns)?;
//! stmt.execute(&pool).await?;
//! ```

use crate::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Schema introspection - read actual database schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from database table using PRAGMA table_info
    ///
    /// Returns columns in database order (by cid). A missing table yields an empty list.
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        validate_identifier(table_name)?;
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Check if a table or view exists
    pub async fn relation_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type IN ('table', 'view') AND name = ?
            )
            "#,
        )
        .bind(name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Names from `wanted` that are neither tables nor views
    pub async fn missing_relations(pool: &SqlitePool, wanted: &[&str]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for name in wanted {
            if !Self::relation_exists(pool, name).await? {
                missing.push(name.to_string());
            }
        }
        Ok(missing)
    }
}

/// Reject anything that is not a plain SQL identifier before it is interpolated
fn validate_identifier(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("Invalid SQL identifier: {:?}", name)))
    }
}

/// The set of columns a table has right now
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    columns: BTreeSet<String>,
}

impl ColumnSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_actual(columns: &[ActualColumn]) -> Self {
        Self::new(columns.iter().map(|c| c.name.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// An empty set means the table does not exist
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// First of `candidates` present in the table
    pub fn first_of<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates.iter().copied().find(|c| self.contains(c))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }
}

/// Per-table column sets cached with a TTL
pub struct ColumnCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (ColumnSet, Instant)>>,
}

impl ColumnCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached column set, introspecting when absent or older than the TTL
    pub async fn get(&self, pool: &SqlitePool, table: &str) -> Result<ColumnSet> {
        {
            let entries = self
                .entries
                .lock()
                .map_err(|e| Error::Internal(format!("Column cache poisoned: {}", e)))?;
            if let Some((set, at)) = entries.get(table) {
                if at.elapsed() < self.ttl {
                    return Ok(set.clone());
                }
            }
        }
        self.refresh(pool, table).await
    }

    /// Re-read the column set regardless of age
    pub async fn refresh(&self, pool: &SqlitePool, table: &str) -> Result<ColumnSet> {
        let actual = SchemaIntrospector::introspect_table(pool, table).await?;
        let set = ColumnSet::from_actual(&actual);
        debug!(table, columns = set.len(), "Column set refreshed");

        let mut entries = self
            .entries
            .lock()
            .map_err(|e| Error::Internal(format!("Column cache poisoned: {}", e)))?;
        entries.insert(table.to_string(), (set.clone(), Instant::now()));
        Ok(set)
    }

    /// Drop a cached entry so the next `get` introspects
    pub fn invalidate(&self, table: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(table);
        }
    }
}

/// A typed value bound into a built statement
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Json(serde_json::Value),
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Bind values in order onto a query
pub fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<SqlValue>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Int(i) => query.bind(i),
            SqlValue::Real(f) => query.bind(f),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Json(v) => query.bind(v.to_string()),
        };
    }
    query
}

/// A statement built against a column set
#[derive(Debug, Clone)]
pub struct BuiltStatement {
    pub sql: String,
    pub values: Vec<SqlValue>,
    /// Requested fields dropped because no candidate column exists
    pub skipped: Vec<String>,
}

impl BuiltStatement {
    /// Execute on any SQLite executor (pool, connection, or transaction)
    pub async fn execute<'c, E>(self, executor: E) -> Result<sqlx::sqlite::SqliteQueryResult>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let BuiltStatement { sql, values, .. } = self;
        let query = bind_values(sqlx::query(&sql), values);
        Ok(query.execute(executor).await?)
    }

    /// Execute and return the new row id
    pub async fn insert_returning_id<'c, E>(self, executor: E) -> Result<i64>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        Ok(self.execute(executor).await?.last_insert_rowid())
    }
}

/// One requested field: candidate column names (first existing wins) and a value
#[derive(Debug, Clone)]
struct Field {
    candidates: Vec<String>,
    value: SqlValue,
}

impl Field {
    fn resolve<'a>(&'a self, columns: &ColumnSet) -> Option<&'a str> {
        self.candidates
            .iter()
            .map(String::as_str)
            .find(|c| columns.contains(c))
    }

    fn label(&self) -> String {
        self.candidates.join("|")
    }
}

/// Builds an INSERT limited to the columns that exist
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    table: String,
    fields: Vec<Field>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Write `value` into `column` if the column exists
    pub fn value(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.fields.push(Field {
            candidates: vec![column.to_string()],
            value: value.into(),
        });
        self
    }

    /// Write `value` into the first existing column among `candidates`
    pub fn value_any(mut self, candidates: &[&str], value: impl Into<SqlValue>) -> Self {
        self.fields.push(Field {
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            value: value.into(),
        });
        self
    }

    /// Build the statement. Fails when the table is missing or no field fits.
    pub fn build(self, columns: &ColumnSet) -> Result<BuiltStatement> {
        validate_identifier(&self.table)?;
        if columns.is_empty() {
            return Err(Error::NotFound(format!("Table '{}' has no columns", self.table)));
        }

        let mut names = Vec::new();
        let mut values = Vec::new();
        let mut skipped = Vec::new();

        for field in &self.fields {
            match field.resolve(columns) {
                Some(col) if !names.iter().any(|n: &String| n == col) => {
                    names.push(col.to_string());
                    values.push(field.value.clone());
                }
                Some(_) => skipped.push(field.label()),
                None => skipped.push(field.label()),
            }
        }

        if names.is_empty() {
            return Err(Error::InvalidInput(format!(
                "No writable columns for insert into '{}'",
                self.table
            )));
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders
        );

        Ok(BuiltStatement { sql, values, skipped })
    }
}

/// Builds an UPDATE limited to the columns that exist
///
/// Key columns in the WHERE clause are mandatory: a missing key column is an
/// error rather than an unfiltered update.
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    sets: Vec<Field>,
    keys: Vec<(String, SqlValue)>,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            keys: Vec::new(),
        }
    }

    pub fn set(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.sets.push(Field {
            candidates: vec![column.to_string()],
            value: value.into(),
        });
        self
    }

    pub fn where_eq(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.keys.push((column.to_string(), value.into()));
        self
    }

    pub fn build(self, columns: &ColumnSet) -> Result<BuiltStatement> {
        validate_identifier(&self.table)?;
        if self.keys.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Refusing unfiltered update of '{}'",
                self.table
            )));
        }
        for (key, _) in &self.keys {
            if !columns.contains(key) {
                return Err(Error::InvalidInput(format!(
                    "Key column '{}.{}' does not exist",
                    self.table, key
                )));
            }
        }

        let mut assignments = Vec::new();
        let mut values = Vec::new();
        let mut skipped = Vec::new();
        for field in &self.sets {
            match field.resolve(columns) {
                Some(col) => {
                    assignments.push(format!("{} = ?", col));
                    values.push(field.value.clone());
                }
                None => skipped.push(field.label()),
            }
        }

        if assignments.is_empty() {
            return Err(Error::InvalidInput(format!(
                "No writable columns for update of '{}'",
                self.table
            )));
        }

        let conditions: Vec<String> = self.keys.iter().map(|(k, _)| format!("{} = ?", k)).collect();
        values.extend(self.keys.into_iter().map(|(_, v)| v));

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            assignments.join(", "),
            conditions.join(" AND ")
        );

        Ok(BuiltStatement { sql, values, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_introspect_table() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE test_table (id INTEGER PRIMARY KEY, name TEXT NOT NULL, value REAL)")
            .execute(&pool)
            .await
            .unwrap();

        let columns = SchemaIntrospector::introspect_table(&pool, "test_table")
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert!(columns[0].pk);
        assert_eq!(columns[1].name, "name");
        assert!(columns[1].not_null);
        assert_eq!(columns[2].type_name, "REAL");
    }

    #[tokio::test]
    async fn test_missing_table_is_empty_set() {
        let pool = setup_test_db().await;
        let columns = SchemaIntrospector::introspect_table(&pool, "nope").await.unwrap();
        assert!(columns.is_empty());
        assert!(!SchemaIntrospector::table_exists(&pool, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_relation_exists_sees_views() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await.unwrap();
        sqlx::query("CREATE VIEW v AS SELECT id FROM t").execute(&pool).await.unwrap();

        assert!(SchemaIntrospector::relation_exists(&pool, "v").await.unwrap());
        assert!(!SchemaIntrospector::table_exists(&pool, "v").await.unwrap());
        let missing = SchemaIntrospector::missing_relations(&pool, &["t", "v", "w"])
            .await
            .unwrap();
        assert_eq!(missing, vec!["w".to_string()]);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("ops_event_log").is_ok());
        assert!(validate_identifier("x; DROP TABLE y").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_insert_builder_skips_missing_columns() {
        let columns = ColumnSet::new(["source", "payload_json"]);
        let stmt = InsertBuilder::new("ops_event_log")
            .value("source", "autoplan")
            .value("severity", "info")
            .value_any(&["payload", "payload_json"], SqlValue::Json(serde_json::json!({"a": 1})))
            .build(&columns)
            .unwrap();

        assert_eq!(stmt.sql, "INSERT INTO ops_event_log (source, payload_json) VALUES (?, ?)");
        assert_eq!(stmt.values.len(), 2);
        assert_eq!(stmt.skipped, vec!["severity".to_string()]);
    }

    #[test]
    fn test_insert_builder_requires_table() {
        let err = InsertBuilder::new("missing")
            .value("a", 1i64)
            .build(&ColumnSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_update_builder_requires_key_column() {
        let columns = ColumnSet::new(["road_km"]);
        let err = UpdateBuilder::new("trip_segments")
            .set("road_km", 12.5)
            .where_eq("id", 1i64)
            .build(&columns)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_update_builder_optional_columns() {
        let columns = ColumnSet::new(["id", "road_km", "drive_sec"]);
        let stmt = UpdateBuilder::new("trip_segments")
            .set("road_km", 12.5)
            .set("drive_sec", 900i64)
            .set("route_source", "osrm")
            .where_eq("id", 7i64)
            .build(&columns)
            .unwrap();

        assert_eq!(stmt.sql, "UPDATE trip_segments SET road_km = ?, drive_sec = ? WHERE id = ?");
        assert_eq!(stmt.values.last(), Some(&SqlValue::Int(7)));
        assert_eq!(stmt.skipped, vec!["route_source".to_string()]);
    }

    #[tokio::test]
    async fn test_column_cache_refresh_sees_new_column() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE t (id INTEGER)").execute(&pool).await.unwrap();

        let cache = ColumnCache::new(Duration::from_secs(300));
        let first = cache.get(&pool, "t").await.unwrap();
        assert!(!first.contains("extra"));

        sqlx::query("ALTER TABLE t ADD COLUMN extra TEXT").execute(&pool).await.unwrap();

        // Still cached
        assert!(!cache.get(&pool, "t").await.unwrap().contains("extra"));
        // Forced refresh
        assert!(cache.refresh(&pool, "t").await.unwrap().contains("extra"));
    }

    #[tokio::test]
    async fn test_built_insert_executes() {
        let pool = setup_test_db().await;
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT, meta TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        let columns = ColumnCache::new(Duration::from_secs(1)).get(&pool, "t").await.unwrap();

        let id = InsertBuilder::new("t")
            .value("label", "x")
            .value("meta", SqlValue::Json(serde_json::json!({"k": "v"})))
            .build(&columns)
            .unwrap()
            .insert_returning_id(&pool)
            .await
            .unwrap();

        let meta: String = sqlx::query_scalar("SELECT meta FROM t WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(meta, r#"{"k":"v"}"#);
    }
}
