//! Template evaluation for prompts, vars and output rendering.
//!
//! Templates are written in Go-template style (`{{ .params.topic }}`) and executed
//! by minijinja after translation. Four namespaces are visible: `params`, `vars`,
//! `progress` and `env`.

pub mod translate;

use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::FragsError;

/// How lookups of missing keys behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedMode {
    /// Missing values render as empty.
    Lenient,
    /// Missing values fail the render.
    Strict,
}

/// Values a template can see.
#[derive(Debug, Clone, Serialize)]
pub struct EvalScope {
    pub params: Value,
    pub vars: Value,
    pub progress: Value,
    pub env: Value,
}

impl Default for EvalScope {
    fn default() -> Self {
        Self {
            params: Value::Object(Map::new()),
            vars: Value::Object(Map::new()),
            progress: Value::Object(Map::new()),
            env: Value::Object(Map::new()),
        }
    }
}

impl EvalScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_vars(mut self, vars: Value) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_progress(mut self, progress: Value) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_env(mut self, env: Value) -> Self {
        self.env = env;
        self
    }
}

/// Renders templates and evaluates single expressions.
pub struct Evaluator {
    env: Environment<'static>,
}

impl Evaluator {
    pub fn new(mode: UndefinedMode) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(match mode {
            UndefinedMode::Lenient => UndefinedBehavior::Chainable,
            UndefinedMode::Strict => UndefinedBehavior::Strict,
        });
        env.set_keep_trailing_newline(true);
        env.add_filter("yaml", yaml_filter);
        env.add_filter(translate::RANGE_FILTER, range_values);
        Self { env }
    }

    /// Evaluator used for prompts.
    pub fn lenient() -> Self {
        Self::new(UndefinedMode::Lenient)
    }

    /// Evaluator used for schemas and vars.
    pub fn strict() -> Self {
        Self::new(UndefinedMode::Strict)
    }

    /// Render a template against any serializable context.
    pub fn render<S: Serialize>(&self, template: &str, ctx: &S) -> Result<String, FragsError> {
        let source = translate::translate(template)?;
        self.env
            .render_str(&source, ctx)
            .map_err(|e| render_error(template, e))
    }

    /// Render a template against a scope.
    pub fn render_scope(&self, template: &str, scope: &EvalScope) -> Result<String, FragsError> {
        self.render(template, scope)
    }

    /// Evaluate a bare minijinja expression (no `{{ }}`) to a JSON value.
    pub fn eval_expression<S: Serialize>(&self, expr: &str, ctx: &S) -> Result<Value, FragsError> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| render_error(expr, e))?;
        let result = compiled.eval(ctx).map_err(|e| render_error(expr, e))?;
        Ok(serde_json::to_value(&result)?)
    }

    /// Evaluate one value.
    ///
    /// A string made of exactly one `{{ … }}` action keeps the typed result of the
    /// expression; other strings are rendered; non-strings are returned unchanged.
    pub fn evaluate_value(&self, value: &Value, scope: &EvalScope) -> Result<Value, FragsError> {
        match value {
            Value::String(s) => {
                if let Some(expr) = translate::single_expression(s)? {
                    return self.eval_expression(&expr, scope);
                }
                if !s.contains("{{") && !s.contains("{%") {
                    return Ok(value.clone());
                }
                Ok(Value::String(self.render_scope(s, scope)?))
            }
            other => Ok(other.clone()),
        }
    }

    /// Render every string leaf of `map`, recursing into objects and arrays.
    ///
    /// Values see the scope only, never sibling keys of the same map.
    pub fn evaluate_map_values(
        &self,
        map: &Map<String, Value>,
        scope: &EvalScope,
    ) -> Result<Map<String, Value>, FragsError> {
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.evaluate_tree(v, scope)?)))
            .collect()
    }

    fn evaluate_tree(&self, value: &Value, scope: &EvalScope) -> Result<Value, FragsError> {
        match value {
            Value::Object(map) => Ok(Value::Object(self.evaluate_map_values(map, scope)?)),
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate_tree(item, scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => self.evaluate_value(other, scope),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::lenient()
    }
}

fn render_error(source: &str, e: minijinja::Error) -> FragsError {
    let snippet: String = source.chars().take(80).collect();
    FragsError::PlanParse(format!("template error in '{}': {:#}", snippet, e))
}

fn yaml_filter(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_yaml::to_string(&value)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

fn range_values(value: minijinja::Value) -> Result<minijinja::Value, minijinja::Error> {
    if value.kind() != ValueKind::Map {
        return Ok(value);
    }
    let mut values = Vec::new();
    for key in value.try_iter()? {
        values.push(value.get_item(&key)?);
    }
    Ok(minijinja::Value::from(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> EvalScope {
        EvalScope::new()
            .with_params(json!({"topic": "rust", "count": 3, "tags": ["a", "b"]}))
            .with_vars(json!({"mode": "short"}))
            .with_progress(json!({"A": {"topic": "ownership", "items": {"x": 1, "y": 2}}}))
    }

    #[test]
    fn test_render_namespaces() {
        let out = Evaluator::lenient()
            .render_scope("Write about {{ .progress.A.topic }} in {{ .vars.mode }} form.", &scope())
            .unwrap();
        assert_eq!(out, "Write about ownership in short form.");
    }

    #[test]
    fn test_lenient_vs_strict_undefined() {
        let tpl = "[{{ .params.missing.deep }}]";
        assert_eq!(Evaluator::lenient().render_scope(tpl, &scope()).unwrap(), "[]");
        let err = Evaluator::strict().render_scope(tpl, &scope()).unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
    }

    #[test]
    fn test_malformed_comment_is_an_error_not_a_panic() {
        let err = Evaluator::lenient().render("a {{/*/}} b", &scope()).unwrap_err();
        assert_eq!(err.kind(), "plan-parse");
    }

    #[test]
    fn test_conditionals_and_range() {
        let tpl = "{{ if gt .params.count 2 }}many{{ else }}few{{ end }}:{{ range .params.tags }}{{ . | upper }}{{ end }}";
        let out = Evaluator::lenient().render_scope(tpl, &scope()).unwrap();
        assert_eq!(out, "many:AB");
    }

    #[test]
    fn test_range_over_map_yields_values() {
        let tpl = "{{ range .progress.A.items }}{{ . }},{{ end }}";
        let out = Evaluator::lenient().render_scope(tpl, &scope()).unwrap();
        assert_eq!(out, "1,2,");
    }

    #[test]
    fn test_evaluate_value_keeps_types() {
        let eval = Evaluator::strict();
        assert_eq!(eval.evaluate_value(&json!("{{ .params.count }}"), &scope()).unwrap(), json!(3));
        assert_eq!(
            eval.evaluate_value(&json!("{{ .params.tags }}"), &scope()).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            eval.evaluate_value(&json!("n={{ .params.count }}"), &scope()).unwrap(),
            json!("n=3")
        );
        assert_eq!(eval.evaluate_value(&json!(7), &scope()).unwrap(), json!(7));
    }

    #[test]
    fn test_evaluate_map_values_recurses() {
        let map = json!({
            "title": "About {{ .params.topic }}",
            "nested": {"list": ["{{ .vars.mode }}", 1]},
            "flag": true
        });
        let out = Evaluator::strict()
            .evaluate_map_values(map.as_object().unwrap(), &scope())
            .unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"title": "About rust", "nested": {"list": ["short", 1]}, "flag": true})
        );
    }

    #[test]
    fn test_yaml_and_json_filters() {
        let out = Evaluator::lenient()
            .render_scope("{{ .params.tags | json }}|{{ yaml .vars }}", &scope())
            .unwrap();
        assert_eq!(out, "[\"a\",\"b\"]|mode: short");
    }
}
