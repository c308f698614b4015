//! `fs` collection: read, write and list files below a root directory.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{str_arg, Function, RunnerHandle};
use crate::error::FragsError;
use crate::schema::Schema;

pub fn functions(params: &Map<String, Value>) -> Result<Vec<(String, Arc<dyn Function>)>, FragsError> {
    let root = match params.get("root").and_then(Value::as_str) {
        Some(root) => PathBuf::from(root),
        None => std::env::current_dir()
            .map_err(|e| FragsError::Config(format!("fs collection: no working directory: {}", e)))?,
    };
    let root = Arc::new(root);

    Ok(vec![
        ("read_file".to_string(), Arc::new(FsFunction::new(FsOp::Read, root.clone())?) as Arc<dyn Function>),
        ("write_file".to_string(), Arc::new(FsFunction::new(FsOp::Write, root.clone())?)),
        ("list_dir".to_string(), Arc::new(FsFunction::new(FsOp::List, root)?)),
    ])
}

#[derive(Debug, Clone, Copy)]
enum FsOp {
    Read,
    Write,
    List,
}

struct FsFunction {
    op: FsOp,
    root: Arc<PathBuf>,
    schema: Schema,
}

impl FsFunction {
    fn new(op: FsOp, root: Arc<PathBuf>) -> Result<Self, FragsError> {
        let schema_yaml = match op {
            FsOp::Read | FsOp::List => {
                "type: object\nrequired: [path]\nproperties:\n  path: { type: string, description: Path relative to the collection root }\n"
            }
            FsOp::Write => {
                "type: object\nrequired: [path, content]\nproperties:\n  path: { type: string, description: Path relative to the collection root }\n  content: { type: string }\n"
            }
        };
        let schema = Schema::from_yaml(schema_yaml).map_err(FragsError::Internal)?;
        Ok(Self { op, root, schema })
    }

    /// Join `relative` onto the root, refusing anything that would leave it.
    fn confine(&self, relative: &str) -> Result<PathBuf, FragsError> {
        let mut path = self.root.as_ref().clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if path == *self.root {
                        return Err(FragsError::tool(format!("Path '{}' escapes the collection root", relative)));
                    }
                    path.pop();
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(FragsError::tool(format!("Absolute path '{}' is not allowed", relative)));
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl Function for FsFunction {
    fn description(&self) -> &str {
        match self.op {
            FsOp::Read => "Read a UTF-8 text file",
            FsOp::Write => "Write a UTF-8 text file, creating parent directories",
            FsOp::List => "List the entries of a directory",
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
        let relative = str_arg(&args, "path")?;
        let path = self.confine(relative)?;
        let io_err = |e: std::io::Error| FragsError::tool(format!("{}: {}", relative, e));

        let result = match self.op {
            FsOp::Read => {
                let content = tokio::fs::read_to_string(&path).await.map_err(io_err)?;
                json!({ "content": content })
            }
            FsOp::Write => {
                let content = str_arg(&args, "content")?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
                }
                tokio::fs::write(&path, content).await.map_err(io_err)?;
                json!({ "written": content.len() })
            }
            FsOp::List => {
                let mut dir = tokio::fs::read_dir(&path).await.map_err(io_err)?;
                let mut entries = Vec::new();
                while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    entries.push((entry.file_name().to_string_lossy().to_string(), is_dir));
                }
                entries.sort();
                let entries: Vec<Value> = entries
                    .into_iter()
                    .map(|(name, is_dir)| json!({ "name": name, "isDir": is_dir }))
                    .collect();
                json!({ "entries": entries })
            }
        };
        Ok(super::as_result_map(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use tokio_util::sync::CancellationToken;

    fn handle() -> RunnerHandle {
        RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new())
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = Map::new();
        params.insert("root".into(), json!(dir.path().to_string_lossy()));
        let fns = functions(&params).unwrap();
        let (read, write, list) = (&fns[0].1, &fns[1].1, &fns[2].1);

        write
            .invoke(args(json!({"path": "notes/a.txt", "content": "hello"})), &handle())
            .await
            .unwrap();
        let out = read.invoke(args(json!({"path": "notes/a.txt"})), &handle()).await.unwrap();
        assert_eq!(out["content"], "hello");

        let out = list.invoke(args(json!({"path": "."})), &handle()).await.unwrap();
        assert_eq!(out["entries"], json!([{"name": "notes", "isDir": true}]));
    }

    #[tokio::test]
    async fn test_paths_are_confined_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = Map::new();
        params.insert("root".into(), json!(dir.path().to_string_lossy()));
        let fns = functions(&params).unwrap();
        let read = &fns[0].1;

        for path in ["../secret", "/etc/passwd", "a/../../b"] {
            let err = read.invoke(args(json!({"path": path})), &handle()).await.unwrap_err();
            assert_eq!(err.kind(), "tool", "path {}", path);
        }
    }
}
