//! `sqlite` collection: parameterised query and execute against one database.
//!
//! All database work runs through `tokio::task::spawn_blocking` so the async
//! runtime is never blocked by rusqlite.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

use super::{str_arg, Function, RunnerHandle};
use crate::error::FragsError;
use crate::schema::Schema;

/// Thread-safe handle to the SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file; `:memory:` opens an in-memory database.
    pub fn open(db_path: &str) -> Result<Self, FragsError> {
        let opened = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(db_path).parent() {
                std::fs::create_dir_all(parent).ok();
            }
            Connection::open(db_path)
        };
        let conn = opened
            .map_err(|e| FragsError::Config(format!("Failed to open database '{}': {}", db_path, e)))?;

        tracing::info!("[Sqlite] database opened at: {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a closure with access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, FragsError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| FragsError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| FragsError::tool(format!("SQLite: {}", e)))
    }

    /// Async-friendly variant of [`Database::with_conn`].
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, FragsError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| FragsError::Internal(format!("Task join error: {}", e)))?
    }
}

pub fn functions(params: &Map<String, Value>) -> Result<Vec<(String, Arc<dyn Function>)>, FragsError> {
    let path = params.get("path").and_then(Value::as_str).unwrap_or(":memory:");
    let db = Database::open(path)?;

    Ok(vec![
        ("query".to_string(), Arc::new(SqlFunction::new(false, db.clone())?) as Arc<dyn Function>),
        ("execute".to_string(), Arc::new(SqlFunction::new(true, db)?)),
    ])
}

struct SqlFunction {
    execute: bool,
    db: Database,
    schema: Schema,
}

impl SqlFunction {
    fn new(execute: bool, db: Database) -> Result<Self, FragsError> {
        let schema = Schema::from_yaml(
            "type: object\nrequired: [sql]\nproperties:\n  sql: { type: string }\n  params: { type: array }\n",
        )
        .map_err(FragsError::Internal)?;
        Ok(Self { execute, db, schema })
    }
}

#[async_trait]
impl Function for SqlFunction {
    fn description(&self) -> &str {
        if self.execute {
            "Execute a SQL statement with positional parameters; returns rowsAffected"
        } else {
            "Run a SQL query with positional parameters; returns rows as objects"
        }
    }

    fn input_schema(&self) -> &Schema {
        &self.schema
    }

    async fn invoke(
        &self,
        args: Map<String, Value>,
        _runner: &RunnerHandle,
    ) -> Result<Map<String, Value>, FragsError> {
        let sql = str_arg(&args, "sql")?.to_string();
        let params: Vec<SqlValue> = args
            .get("params")
            .and_then(Value::as_array)
            .map(|values| values.iter().map(to_sql).collect())
            .unwrap_or_default();

        if self.execute {
            let affected = self
                .db
                .with_conn_async(move |conn| {
                    conn.execute(&sql, rusqlite::params_from_iter(params.iter()))
                })
                .await?;
            return Ok(super::as_result_map(json!({ "rowsAffected": affected })));
        }

        let rows = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut record = Map::new();
                    for (i, column) in columns.iter().enumerate() {
                        record.insert(column.clone(), from_sql(row.get_ref(i)?));
                    }
                    out.push(Value::Object(record));
                }
                Ok(out)
            })
            .await?;
        Ok(super::as_result_map(json!({ "rows": rows })))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use tokio_util::sync::CancellationToken;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_execute_then_query() {
        let fns = functions(&Map::new()).unwrap();
        let (query, execute) = (&fns[0].1, &fns[1].1);
        let handle = RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new());

        execute
            .invoke(args(json!({"sql": "CREATE TABLE notes (id INTEGER, body TEXT)"})), &handle)
            .await
            .unwrap();
        let out = execute
            .invoke(
                args(json!({"sql": "INSERT INTO notes VALUES (?1, ?2), (?3, ?4)", "params": [1, "a", 2, "b"]})),
                &handle,
            )
            .await
            .unwrap();
        assert_eq!(out["rowsAffected"], 2);

        let out = query
            .invoke(
                args(json!({"sql": "SELECT id, body FROM notes WHERE id > ?1 ORDER BY id", "params": [0]})),
                &handle,
            )
            .await
            .unwrap();
        assert_eq!(out["rows"], json!([{"id": 1, "body": "a"}, {"id": 2, "body": "b"}]));
    }

    #[tokio::test]
    async fn test_sql_errors_are_tool_errors() {
        let fns = functions(&Map::new()).unwrap();
        let handle = RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new());
        let err = fns[0]
            .1
            .invoke(args(json!({"sql": "SELECT * FROM missing"})), &handle)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool");
    }
}
