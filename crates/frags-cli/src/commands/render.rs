//! `frags render`: Render a saved output file through a template.

use std::path::Path;

use frags_core::output::{self, OutputFormat};
use serde_json::{Map, Value};

use super::read_file;

/// `data` is YAML or JSON holding a progress map.
pub fn render(data: &Path, template: &Path) -> Result<String, String> {
    let text = read_file(data)?;
    let value: Value = serde_yaml::from_str(&text)
        .map_err(|e| format!("Failed to parse {}: {}", data.display(), e))?;
    let progress: Map<String, Value> = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(format!("{} must hold a mapping", data.display())),
    };
    let template = read_file(template)?;
    output::render(&progress, OutputFormat::Template, Some(&template)).map_err(|e| e.to_string())
}
