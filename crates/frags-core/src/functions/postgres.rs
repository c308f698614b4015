//! `postgres` collection: parameterised query and execute against one server.
//!
//! Same contract as the `sqlite` collection (`sql` plus positional `params`,
//! `rows` / `rowsAffected` replies). The connection opens on first use and is
//! shared by both functions for the rest of the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

use super::{str_arg, Function, RunnerHandle};
use crate::error::FragsError;
use crate::schema::Schema;

type Param = Box<dyn ToSql + Sync + Send>;

/// Lazily connected client for one connection string.
pub struct PgDatabase {
    url: String,
    client: OnceCell<Client>,
}

impl PgDatabase {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client, FragsError> {
        self.client
            .get_or_try_init(|| async {
                let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
                    .await
                    .map_err(|e| FragsError::tool(format!("Postgres: connect failed: {}", e)))?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::warn!("[Postgres] connection closed: {}", e);
                    }
                });
                tracing::info!("[Postgres] connected");
                Ok(client)
            })
            .await
    }
}

pub fn functions(params: &Map<String, Value>) -> Result<Vec<(String, Arc<dyn Function>)>, FragsError> {
    let url = params
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| FragsError::Config("postgres collection needs a 'url' param".to_string()))?;
    let db = Arc::new(PgDatabase::new(url));

    Ok(vec![
        ("query".to_string(), Arc::new(PgFunction::new(false, db.clone())?) as Arc<dyn Function>),
        ("execute".to_string(), Arc::new(PgFunction::new(true, db)?)),
    ])
}

struct PgFunction {
    execute: bool,
    db: Arc<PgDatabase>,
    schema: Schema,
}

impl PgFunction {
    fn new(execute: bool, db: Arc<PgDatabase>) -> Result<Self, FragsError> {
        let schema = Schema::from_yaml(
            "type: object\nrequired: [sql]\nproperties:\n  sql: { type: string }\n  params: { type: array }\n",
        )
        .map_err(FragsError::Internal)?;
        Ok(Self { execute, db, schema })
    }
}

#[async_trait]
impl Function for PgFunction {
    fn description(&self) -> &str {
        if self.execute {
            "Execute a SQL statement with $1..$n parameters; returns rowsAffected"
        } else {
            "Run a SQL query with $1..$n parameters; returns rows as objects"
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
        let sql = str_arg(&args, "sql")?;
        let values = args
            .get("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let client = self.db.client().await?;
        let statement = client.prepare(sql).await.map_err(pg_error)?;
        if statement.params().len() != values.len() {
            return Err(FragsError::tool(format!(
                "Postgres: statement takes {} parameters, got {}",
                statement.params().len(),
                values.len()
            )));
        }
        let params = values
            .iter()
            .zip(statement.params())
            .map(|(value, ty)| to_param(value, ty))
            .collect::<Result<Vec<Param>, FragsError>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        if self.execute {
            let affected = client.execute(&statement, &refs).await.map_err(pg_error)?;
            return Ok(super::as_result_map(json!({ "rowsAffected": affected })));
        }

        let rows = client.query(&statement, &refs).await.map_err(pg_error)?;
        let rows: Vec<Value> = rows.iter().map(|row| Value::Object(row_to_json(row))).collect();
        Ok(super::as_result_map(json!({ "rows": rows })))
    }
}

fn pg_error(e: tokio_postgres::Error) -> FragsError {
    FragsError::tool(format!("Postgres: {}", e))
}

/// Bind a JSON value as the type the server inferred for its placeholder.
fn to_param(value: &Value, ty: &Type) -> Result<Param, FragsError> {
    let mismatch = || FragsError::tool(format!("Postgres: cannot bind {} as {}", value, ty.name()));
    let null = value.is_null();
    let param: Param = match ty.name() {
        "bool" if null => Box::new(None::<bool>),
        "bool" => Box::new(value.as_bool().ok_or_else(mismatch)?),
        "int2" if null => Box::new(None::<i16>),
        "int2" => Box::new(
            value
                .as_i64()
                .and_then(|i| i16::try_from(i).ok())
                .ok_or_else(mismatch)?,
        ),
        "int4" if null => Box::new(None::<i32>),
        "int4" => Box::new(
            value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(mismatch)?,
        ),
        "int8" if null => Box::new(None::<i64>),
        "int8" => Box::new(value.as_i64().ok_or_else(mismatch)?),
        "float4" if null => Box::new(None::<f32>),
        "float4" => Box::new(value.as_f64().ok_or_else(mismatch)? as f32),
        "float8" if null => Box::new(None::<f64>),
        "float8" => Box::new(value.as_f64().ok_or_else(mismatch)?),
        "json" | "jsonb" => Box::new(value.clone()),
        _ if null => Box::new(None::<String>),
        _ => Box::new(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
    };
    Ok(param)
}

fn row_to_json(row: &Row) -> Map<String, Value> {
    let mut record = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), column_value(row, i, column.type_()));
    }
    record
}

fn column_value(row: &Row, i: usize, ty: &Type) -> Value {
    let value = match ty.name() {
        "bool" => row.try_get::<_, Option<bool>>(i).map(|v| json!(v)),
        "int2" => row.try_get::<_, Option<i16>>(i).map(|v| json!(v)),
        "int4" => row.try_get::<_, Option<i32>>(i).map(|v| json!(v)),
        "int8" => row.try_get::<_, Option<i64>>(i).map(|v| json!(v)),
        "float4" => row.try_get::<_, Option<f32>>(i).map(|v| json!(v)),
        "float8" => row.try_get::<_, Option<f64>>(i).map(|v| json!(v)),
        "json" | "jsonb" => row
            .try_get::<_, Option<Value>>(i)
            .map(|v| v.unwrap_or(Value::Null)),
        _ => row.try_get::<_, Option<String>>(i).map(|v| json!(v)),
    };
    value.unwrap_or_else(|e| {
        tracing::debug!("[Postgres] column {} ({}) not representable: {}", i, ty.name(), e);
        Value::Null
    })
}
