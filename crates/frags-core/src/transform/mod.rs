//! Post-generation transformers.
//!
//! A session declares an ordered list; each one reads the session's slice of the
//! progress map (or one `field` of it) and writes its result back (to `target`
//! when set). Transformers with a `phase` run right after that phase, the rest
//! after the last phase.
//!
//! ```yaml
//! transformers:
//!   - regex: "\\s+"
//!     replace: " "
//!     field: summary
//!   - expr: "args.items | length"
//!     target: itemCount
//!   - jsonata: '{ "first": items[0] }'
//!     target: summaryStats
//!   - script: |
//!       const tags = runFunction("normalize_tags", { tags: args.tags });
//!       return { ...args, tags: tags.tags };
//! ```
//!
//! `regex`, `expr` and `jsonata` are evaluated in-process; `script` goes through
//! the runner's [`ScriptEngine`] (JavaScript by default).

pub mod javascript;
pub mod jsonata;
pub mod script;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::FragsError;
use crate::functions::RunnerHandle;
use crate::template::Evaluator;

pub use script::{NoopScriptEngine, ScriptEngine, StandardScriptEngine, TemplateScriptEngine};

/// One transformer declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transformer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: TransformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<i64>,
    /// Dot path inside the slice to read (and, without `target`, to write).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Dot path inside the slice receiving the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransformKind {
    Script {
        script: String,
        #[serde(default = "default_engine")]
        engine: String,
    },
    Regex {
        regex: String,
        #[serde(default)]
        replace: String,
    },
    Expr {
        expr: String,
    },
    Jsonata {
        jsonata: String,
    },
}

fn default_engine() -> String {
    "javascript".to_string()
}

impl Transformer {
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.kind {
            TransformKind::Script { engine, .. } => format!("script:{}", engine),
            TransformKind::Regex { .. } => "regex".to_string(),
            TransformKind::Expr { .. } => "expr".to_string(),
            TransformKind::Jsonata { .. } => "jsonata".to_string(),
        }
    }

    /// Compile-time checks that need no input (regex syntax).
    pub fn check(&self) -> Result<(), FragsError> {
        if let TransformKind::Regex { regex, .. } = &self.kind {
            regex::Regex::new(regex).map_err(|e| {
                FragsError::PlanParse(format!("Transformer '{}': invalid regex: {}", self.label(), e))
            })?;
        }
        Ok(())
    }

    /// Apply to `slice` in place.
    pub async fn apply(
        &self,
        slice: &mut Map<String, Value>,
        engine: &dyn ScriptEngine,
        runner: &RunnerHandle,
    ) -> Result<(), FragsError> {
        let input = match &self.field {
            Some(path) => get_path(slice, path).cloned().unwrap_or(Value::Null),
            None => Value::Object(slice.clone()),
        };

        let output = match &self.kind {
            TransformKind::Regex { regex, replace } => {
                let re = regex::Regex::new(regex).map_err(|e| {
                    FragsError::PlanParse(format!("Transformer '{}': invalid regex: {}", self.label(), e))
                })?;
                replace_strings(input, &re, replace)
            }
            TransformKind::Expr { expr } => {
                Evaluator::strict().eval_expression(expr, &json!({ "args": input }))?
            }
            TransformKind::Script { script, engine: name } => {
                engine.run(name, script, input, runner).await?
            }
            TransformKind::Jsonata { jsonata: expr } => jsonata::evaluate(expr, &input)?,
        };

        match (&self.target, &self.field) {
            (Some(target), _) | (None, Some(target)) => set_path(slice, target, output),
            (None, None) => match output {
                Value::Object(map) => {
                    *slice = map;
                    Ok(())
                }
                other => Err(FragsError::Internal(format!(
                    "Transformer '{}' must produce an object, got {}",
                    self.label(),
                    other
                ))),
            },
        }
    }
}

/// Run transformers in declaration order.
pub async fn apply_all<'a>(
    transformers: impl IntoIterator<Item = &'a Transformer>,
    slice: &mut Map<String, Value>,
    engine: &dyn ScriptEngine,
    runner: &RunnerHandle,
) -> Result<(), FragsError> {
    for transformer in transformers {
        tracing::debug!("[Transform] applying {}", transformer.label());
        transformer.apply(slice, engine, runner).await?;
    }
    Ok(())
}

fn replace_strings(value: Value, re: &regex::Regex, replace: &str) -> Value {
    match value {
        Value::String(s) => Value::String(re.replace_all(&s, replace).into_owned()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_strings(item, re, replace))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, replace_strings(v, re, replace)))
                .collect(),
        ),
        other => other,
    }
}

fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = map.get(parts.next()?)?;
    parts.try_fold(first, |current, part| match current {
        Value::Object(inner) => inner.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), FragsError> {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return Err(FragsError::Internal("empty transformer path".to_string()));
    };
    let mut current = map;
    for part in parents {
        let entry = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(inner) => inner,
            _ => {
                return Err(FragsError::Internal(format!(
                    "Cannot write '{}': '{}' is not an object",
                    path, part
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}
