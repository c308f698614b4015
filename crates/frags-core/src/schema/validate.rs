//! Strict and loose validation of JSON values against a [`Schema`].

use serde::Serialize;
use serde_json::Value;

use super::{Schema, SchemaType};
use crate::error::FragsError;

/// First violation found while walking a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {reason}", display_path(.path))]
pub struct ValidationError {
    /// Dotted location, e.g. `a.b[2].c`; empty for the root.
    pub path: String,
    pub reason: String,
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Let strings stand in for numbers and booleans when they parse.
    pub soft_validation: bool,
}

impl ValidateOptions {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn soft() -> Self {
        Self {
            soft_validation: true,
        }
    }
}

impl Schema {
    /// Validate `data`, stopping at the first violation.
    pub fn validate(&self, data: &Value, opts: ValidateOptions) -> Result<(), ValidationError> {
        check(self, data, "", opts)
    }

    /// Validate any serializable record.
    pub fn validate_serialize<T: Serialize>(
        &self,
        data: &T,
        opts: ValidateOptions,
    ) -> Result<(), FragsError> {
        let value = serde_json::to_value(data)?;
        self.validate(&value, opts).map_err(FragsError::from)
    }

    /// Convert strings sitting in numeric or boolean positions to typed values and
    /// fill absent object properties from their `default`.
    ///
    /// Intended to run after a successful soft validation of caller parameters.
    pub fn coerce_loose(&self, value: &mut Value) {
        if !self.any_of.is_empty() {
            return;
        }
        match self.schema_type {
            Some(SchemaType::Object) | None => {
                if let (Value::Object(map), Some(props)) = (&mut *value, self.properties.as_ref()) {
                    for (name, prop) in props {
                        match map.get_mut(name) {
                            Some(child) => prop.coerce_loose(child),
                            None => {
                                if let Some(default) = &prop.default {
                                    map.insert(name.clone(), default.clone());
                                }
                            }
                        }
                    }
                }
            }
            Some(SchemaType::Array) => {
                if let (Value::Array(items), Some(item_schema)) = (&mut *value, self.items.as_deref()) {
                    for item in items.iter_mut() {
                        item_schema.coerce_loose(item);
                    }
                }
            }
            Some(scalar) => {
                let coerced = value.as_str().and_then(|s| match scalar {
                    SchemaType::Integer => parse_integer(s).map(Value::from),
                    SchemaType::Number => parse_number(s)
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number),
                    SchemaType::Boolean => parse_bool(s).map(Value::Bool),
                    _ => None,
                });
                if let Some(coerced) = coerced {
                    *value = coerced;
                }
            }
        }
    }
}

fn check(schema: &Schema, value: &Value, path: &str, opts: ValidateOptions) -> Result<(), ValidationError> {
    // A ref left in place by cycle protection.
    if schema.reference.is_some() && schema.schema_type.is_none() && !schema.has_properties() {
        return Ok(());
    }

    if !schema.any_of.is_empty() {
        if schema
            .any_of
            .iter()
            .any(|branch| check(branch, value, path, opts).is_ok())
        {
            return Ok(());
        }
        return Err(fail(
            path,
            format!("value does not match any of {} alternatives", schema.any_of.len()),
        ));
    }

    if value.is_null() {
        if schema.is_nullable() || schema.schema_type == Some(SchemaType::Null) {
            return Ok(());
        }
        return Err(fail(path, "null is not allowed"));
    }

    if !schema.enum_values.is_empty() && !enum_contains(&schema.enum_values, value, opts) {
        return Err(fail(
            path,
            format!("value {} is not one of {}", value, Value::from(schema.enum_values.clone())),
        ));
    }

    let schema_type = match schema.schema_type {
        Some(t) => t,
        None => match infer_type(value) {
            Some(t) => t,
            None => return Ok(()),
        },
    };

    match schema_type {
        SchemaType::Null => Err(fail(path, format!("expected null, got {}", type_name(value)))),
        SchemaType::Object => check_object(schema, value, path, opts),
        SchemaType::Array => check_array(schema, value, path, opts),
        SchemaType::String => check_string(schema, value, path),
        SchemaType::Number => {
            let n = number_value(value, opts)
                .ok_or_else(|| fail(path, format!("expected number, got {}", type_name(value))))?;
            check_bounds(schema, n, path)
        }
        SchemaType::Integer => {
            let n = number_value(value, opts)
                .ok_or_else(|| fail(path, format!("expected integer, got {}", type_name(value))))?;
            if n.fract() != 0.0 {
                return Err(fail(path, format!("expected integer, got {}", n)));
            }
            check_bounds(schema, n, path)
        }
        SchemaType::Boolean => {
            let ok = match value {
                Value::Bool(_) => true,
                Value::String(s) if opts.soft_validation => parse_bool(s).is_some(),
                _ => false,
            };
            if ok {
                Ok(())
            } else {
                Err(fail(path, format!("expected boolean, got {}", type_name(value))))
            }
        }
    }
}

fn check_object(schema: &Schema, value: &Value, path: &str, opts: ValidateOptions) -> Result<(), ValidationError> {
    let map = value
        .as_object()
        .ok_or_else(|| fail(path, format!("expected object, got {}", type_name(value))))?;

    for name in &schema.required {
        if !map.contains_key(name) {
            return Err(fail(&child_path(path, name), "required property is missing"));
        }
    }
    if let Some(min) = schema.min_properties {
        if (map.len() as u64) < min {
            return Err(fail(path, format!("expected at least {} properties, got {}", min, map.len())));
        }
    }
    if let Some(max) = schema.max_properties {
        if (map.len() as u64) > max {
            return Err(fail(path, format!("expected at most {} properties, got {}", max, map.len())));
        }
    }
    if let Some(props) = schema.properties.as_ref() {
        for (name, prop) in props {
            if let Some(child) = map.get(name) {
                check(prop, child, &child_path(path, name), opts)?;
            }
        }
    }
    Ok(())
}

fn check_array(schema: &Schema, value: &Value, path: &str, opts: ValidateOptions) -> Result<(), ValidationError> {
    let items = value
        .as_array()
        .ok_or_else(|| fail(path, format!("expected array, got {}", type_name(value))))?;

    if let Some(min) = schema.min_items {
        if (items.len() as u64) < min {
            return Err(fail(path, format!("expected at least {} items, got {}", min, items.len())));
        }
    }
    if let Some(max) = schema.max_items {
        if (items.len() as u64) > max {
            return Err(fail(path, format!("expected at most {} items, got {}", max, items.len())));
        }
    }
    if let Some(item_schema) = schema.items.as_deref() {
        for (i, item) in items.iter().enumerate() {
            check(item_schema, item, &format!("{}[{}]", path, i), opts)?;
        }
    }
    Ok(())
}

fn check_string(schema: &Schema, value: &Value, path: &str) -> Result<(), ValidationError> {
    let s = value
        .as_str()
        .ok_or_else(|| fail(path, format!("expected string, got {}", type_name(value))))?;

    let len = s.chars().count() as u64;
    if let Some(min) = schema.min_length {
        if len < min {
            return Err(fail(path, format!("expected at least {} characters, got {}", min, len)));
        }
    }
    if let Some(max) = schema.max_length {
        if len > max {
            return Err(fail(path, format!("expected at most {} characters, got {}", max, len)));
        }
    }
    if let Some(pattern) = &schema.pattern {
        let re = regex::Regex::new(pattern)
            .map_err(|e| fail(path, format!("invalid pattern '{}': {}", pattern, e)))?;
        if !re.is_match(s) {
            return Err(fail(path, format!("'{}' does not match pattern '{}'", s, pattern)));
        }
    }
    Ok(())
}

fn check_bounds(schema: &Schema, n: f64, path: &str) -> Result<(), ValidationError> {
    if let Some(min) = schema.minimum {
        if n < min {
            return Err(fail(path, format!("{} is less than minimum {}", n, min)));
        }
    }
    if let Some(max) = schema.maximum {
        if n > max {
            return Err(fail(path, format!("{} is greater than maximum {}", n, max)));
        }
    }
    Ok(())
}

fn enum_contains(allowed: &[Value], value: &Value, opts: ValidateOptions) -> bool {
    if allowed.contains(value) {
        return true;
    }
    // "3" matches an enum of 3 in soft mode.
    opts.soft_validation
        && value
            .as_str()
            .is_some_and(|s| allowed.iter().any(|a| !a.is_string() && a.to_string() == s))
}

fn number_value(value: &Value, opts: ValidateOptions) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if opts.soft_validation => parse_number(s),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        parse_number(trimmed)
            .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
            .map(|n| n as i64)
    })
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn infer_type(value: &Value) -> Option<SchemaType> {
    match value {
        Value::Object(_) => Some(SchemaType::Object),
        Value::Array(_) => Some(SchemaType::Array),
        Value::String(_) => Some(SchemaType::String),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(SchemaType::Integer),
        Value::Number(_) => Some(SchemaType::Number),
        Value::Bool(_) => Some(SchemaType::Boolean),
        Value::Null => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null => "null",
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn fail(path: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError {
        path: path.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count_schema() -> Schema {
        Schema::from_yaml(
            r#"
type: object
required: [count]
properties:
  count: { type: integer }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_loose_integer() {
        let schema = count_schema();
        assert!(schema.validate(&json!({"count": "42"}), ValidateOptions::soft()).is_ok());
        assert!(schema.validate(&json!({"count": "42"}), ValidateOptions::strict()).is_err());
        assert!(schema.validate(&json!({"count": "abc"}), ValidateOptions::soft()).is_err());
        assert!(schema.validate(&json!({"count": 42}), ValidateOptions::strict()).is_ok());
        assert!(schema.validate(&json!({"count": 4.5}), ValidateOptions::strict()).is_err());
    }

    #[test]
    fn test_loose_boolean() {
        let schema = Schema::of_type(SchemaType::Boolean);
        for accepted in ["TRUE", "false", "1", "0"] {
            assert!(schema.validate(&json!(accepted), ValidateOptions::soft()).is_ok());
        }
        assert!(schema.validate(&json!("yes"), ValidateOptions::soft()).is_err());
        assert!(schema.validate(&json!("true"), ValidateOptions::strict()).is_err());
    }

    #[test]
    fn test_error_path_is_dotted() {
        let schema = Schema::from_yaml(
            r#"
type: object
properties:
  a:
    type: object
    properties:
      b:
        type: array
        items:
          type: object
          required: [c]
          properties:
            c: { type: string, minLength: 2 }
"#,
        )
        .unwrap();

        let err = schema
            .validate(&json!({"a": {"b": [{"c": "ok"}, {"c": "ok"}, {"c": "x"}]}}), ValidateOptions::strict())
            .unwrap_err();
        assert_eq!(err.path, "a.b[2].c");
        assert!(err.to_string().starts_with("a.b[2].c: "));
    }

    #[test]
    fn test_missing_required_and_root_display() {
        let err = count_schema().validate(&json!({}), ValidateOptions::strict()).unwrap_err();
        assert_eq!(err.path, "count");

        let err = Schema::of_type(SchemaType::Object)
            .validate(&json!([1]), ValidateOptions::strict())
            .unwrap_err();
        assert!(err.to_string().starts_with("<root>: expected object"));
    }

    #[test]
    fn test_nullable_any_of_and_enum() {
        let schema = Schema::from_yaml(
            r#"
type: object
properties:
  note: { type: string, nullable: true }
  id:
    anyOf:
      - { type: integer }
      - { type: string, pattern: "^id-" }
  color: { type: string, enum: [red, green] }
"#,
        )
        .unwrap();

        let strict = ValidateOptions::strict();
        assert!(schema.validate(&json!({"note": null, "id": 3}), strict).is_ok());
        assert!(schema.validate(&json!({"id": "id-7"}), strict).is_ok());
        assert!(schema.validate(&json!({"id": "x-7"}), strict).is_err());
        assert!(schema.validate(&json!({"color": "blue"}), strict).is_err());
        assert!(Schema::of_type(SchemaType::String).validate(&Value::Null, strict).is_err());
    }

    #[test]
    fn test_string_length_counts_characters() {
        let schema = Schema {
            max_length: Some(3),
            ..Schema::of_type(SchemaType::String)
        };
        assert!(schema.validate(&json!("héé"), ValidateOptions::strict()).is_ok());
        assert!(schema.validate(&json!("héée"), ValidateOptions::strict()).is_err());
    }

    #[test]
    fn test_validate_serialize_accepts_records() {
        #[derive(Serialize)]
        struct Record {
            count: u32,
        }
        assert!(count_schema()
            .validate_serialize(&Record { count: 2 }, ValidateOptions::strict())
            .is_ok());
    }

    #[test]
    fn test_coerce_loose_and_defaults() {
        let schema = Schema::from_yaml(
            r#"
type: object
properties:
  count: { type: integer }
  ratio: { type: number }
  verbose: { type: boolean, default: false }
  topic: { type: string, default: rust }
"#,
        )
        .unwrap();

        let mut params = json!({"count": "3", "ratio": "0.5", "topic": "go"});
        schema.coerce_loose(&mut params);
        assert_eq!(params, json!({"count": 3, "ratio": 0.5, "topic": "go", "verbose": false}));
    }
}
