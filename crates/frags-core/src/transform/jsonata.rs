//! `jsonata` transformers: a JSONata expression over the transformer input.
//!
//! ```yaml
//! transformers:
//!   - jsonata: '{ "total": $sum(items.price), "names": items.name }'
//! ```

use bumpalo::Bump;
use jsonata_rs::JsonAta;
use serde_json::Value;

use crate::error::FragsError;

/// Evaluate `expr` against `input`. An undefined result is `null`.
pub fn evaluate(expr: &str, input: &Value) -> Result<Value, FragsError> {
    let arena = Bump::new();
    let compiled = JsonAta::new(expr, &arena)
        .map_err(|e| FragsError::PlanParse(format!("Invalid JSONata expression '{}': {}", expr, e)))?;
    let input = input.to_string();
    let result = compiled
        .evaluate(Some(input.as_str()), None)
        .map_err(|e| FragsError::tool(format!("jsonata: {}", e)))?;

    let text = result.serialize(false);
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    let value = serde_json::from_str(&text)
        .map_err(|e| FragsError::tool(format!("jsonata: result is not JSON ({})", e)))?;
    Ok(integral_numbers(value))
}

/// JSONata numbers are doubles; whole ones come back as integers, as in JavaScript.
fn integral_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(integral_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, integral_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}
