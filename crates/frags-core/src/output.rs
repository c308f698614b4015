//! Rendering a finished progress map.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::FragsError;
use crate::template::Evaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
    Template,
}

impl FromStr for OutputFormat {
    type Err = FragsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            "template" | "tpl" => Ok(OutputFormat::Template),
            other => Err(FragsError::Config(format!(
                "Unknown output format '{}' (expected yaml, json or template)",
                other
            ))),
        }
    }
}

/// Render `progress` in `format`. `template` is required for [`OutputFormat::Template`];
/// sessions are visible both at the root and under `.progress`.
pub fn render(
    progress: &Map<String, Value>,
    format: OutputFormat,
    template: Option<&str>,
) -> Result<String, FragsError> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(progress)
            .map_err(|e| FragsError::Internal(format!("Failed to encode YAML: {}", e))),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(progress)?),
        OutputFormat::Template => {
            let template = template.ok_or_else(|| {
                FragsError::Config("Output format 'template' needs a template".to_string())
            })?;
            let mut ctx = progress.clone();
            ctx.insert("progress".to_string(), Value::Object(progress.clone()));
            Evaluator::lenient().render(template, &ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn progress() -> Map<String, Value> {
        json!({"writer": {"title": "Hello", "tags": ["a", "b"]}})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_yaml_and_json() {
        let yaml = render(&progress(), OutputFormat::Yaml, None).unwrap();
        assert!(yaml.contains("title: Hello"));
        let json = render(&progress(), OutputFormat::Json, None).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap()["writer"]["tags"][1], "b");
    }

    #[test]
    fn test_template_sees_root_and_progress() {
        let out = render(
            &progress(),
            OutputFormat::Template,
            Some("# {{ .writer.title }}\n{{ range .progress.writer.tags }}- {{ . }}\n{{ end }}"),
        )
        .unwrap();
        assert_eq!(out, "# Hello\n- a\n- b\n");
    }

    #[test]
    fn test_template_requires_text() {
        assert!(render(&progress(), OutputFormat::Template, None).is_err());
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
