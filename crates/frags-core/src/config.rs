//! Settings loaded from a `.env`-style file and overlaid by the process environment.
//!
//! Only `FRAGS_`-prefixed keys are read. The file is parsed with
//! `dotenvy::from_path_iter`, so loading never mutates the process environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::ai::{OpenAiConfig, DEFAULT_MAX_TOOL_ROUNDS};
use crate::error::FragsError;

pub const ENV_PREFIX: &str = "FRAGS_";
pub const DEFAULT_CONFIG_FILE: &str = ".env";
pub const DEFAULT_LOG_FILTER: &str = "frags_core=warn,frags_server=info,frags_cli=info";

/// Written when the settings file does not exist.
pub const CONFIG_TEMPLATE: &str = "\
# frags settings
#
# Model endpoint (any OpenAI-compatible /chat/completions server)
FRAGS_MODEL=gpt-4o-mini
FRAGS_BASE_URL=https://api.openai.com/v1
# FRAGS_API_KEY=

# Sampling
# FRAGS_TEMPERATURE=0.2
# FRAGS_TOP_P=1.0
# FRAGS_MAX_TOKENS=4096

# Runner
FRAGS_PARALLEL_WORKERS=1
FRAGS_TIMEOUT_SECS=900
FRAGS_MAX_TOOL_ROUNDS=16

# Web server
# FRAGS_WEB_API_KEY=
FRAGS_PLANS_DIR=plans

# Logging (tracing EnvFilter syntax)
# FRAGS_LOG=frags_core=debug
";

#[derive(Debug, Clone)]
pub struct Settings {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub parallel_workers: usize,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub timeout: Duration,
    pub max_tool_rounds: usize,
    pub web_api_key: Option<String>,
    pub plans_dir: PathBuf,
    pub log_filter: String,
    /// Every `FRAGS_` entry seen, file first then environment.
    values: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            parallel_workers: 1,
            temperature: None,
            top_p: None,
            max_tokens: None,
            timeout: Duration::from_secs(900),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            web_api_key: None,
            plans_dir: PathBuf::from("plans"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            values: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load from `path`, overlaid by the process environment.
    ///
    /// When the file is missing a commented template is written there and a
    /// config error is returned.
    pub fn load(path: &Path) -> Result<Self, FragsError> {
        if !path.exists() {
            std::fs::write(path, CONFIG_TEMPLATE).map_err(|e| {
                FragsError::Config(format!(
                    "Config file {} not found and a template could not be written: {}",
                    path.display(),
                    e
                ))
            })?;
            return Err(FragsError::Config(format!(
                "Config file not found; a template was written to {}. Edit it and run again",
                path.display()
            )));
        }

        let mut values = HashMap::new();
        let entries = dotenvy::from_path_iter(path)
            .map_err(|e| FragsError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        for entry in entries {
            let (key, value) = entry
                .map_err(|e| FragsError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
            if key.starts_with(ENV_PREFIX) {
                values.insert(key, value);
            }
        }
        values.extend(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)));

        tracing::debug!("[Config] loaded {} keys from {}", values.len(), path.display());
        Self::from_map(values)
    }

    /// Settings from the process environment only.
    pub fn from_env() -> Result<Self, FragsError> {
        Self::from_map(std::env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)).collect())
    }

    pub fn from_map(values: HashMap<String, String>) -> Result<Self, FragsError> {
        let defaults = Settings::default();
        let get = |key: &str| {
            values
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            model: get("FRAGS_MODEL").unwrap_or(defaults.model),
            base_url: get("FRAGS_BASE_URL").unwrap_or(defaults.base_url),
            api_key: get("FRAGS_API_KEY"),
            parallel_workers: parse_or("FRAGS_PARALLEL_WORKERS", get("FRAGS_PARALLEL_WORKERS"), 1)?,
            temperature: parse_opt("FRAGS_TEMPERATURE", get("FRAGS_TEMPERATURE"))?,
            top_p: parse_opt("FRAGS_TOP_P", get("FRAGS_TOP_P"))?,
            max_tokens: parse_opt("FRAGS_MAX_TOKENS", get("FRAGS_MAX_TOKENS"))?,
            timeout: Duration::from_secs(parse_or("FRAGS_TIMEOUT_SECS", get("FRAGS_TIMEOUT_SECS"), 900)?),
            max_tool_rounds: parse_or(
                "FRAGS_MAX_TOOL_ROUNDS",
                get("FRAGS_MAX_TOOL_ROUNDS"),
                DEFAULT_MAX_TOOL_ROUNDS,
            )?,
            web_api_key: get("FRAGS_WEB_API_KEY"),
            plans_dir: get("FRAGS_PLANS_DIR").map(PathBuf::from).unwrap_or(defaults.plans_dir),
            log_filter: get("FRAGS_LOG").unwrap_or(defaults.log_filter),
            values,
        })
    }

    /// Environment visible to plan vars: `FRAGS_` keys, minus anything holding an API key.
    pub fn plan_env(&self) -> Map<String, Value> {
        let mut keys: Vec<&String> = self
            .values
            .keys()
            .filter(|k| k.starts_with(ENV_PREFIX) && !k.contains("API_KEY"))
            .collect();
        keys.sort();
        keys.into_iter()
            .map(|k| (k.clone(), Value::String(self.values[k].clone())))
            .collect()
    }

    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            timeout: self.timeout,
        }
    }
}

fn parse_opt<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, FragsError> {
    raw.map(|v| {
        v.parse::<T>()
            .map_err(|_| FragsError::Config(format!("{} has an invalid value '{}'", key, v)))
    })
    .transpose()
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, FragsError> {
    Ok(parse_opt(key, raw)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_map(HashMap::new()).unwrap();
        assert_eq!(settings.model, "gpt-4o-mini");
        assert_eq!(settings.parallel_workers, 1);
        assert_eq!(settings.timeout, Duration::from_secs(900));
        assert_eq!(settings.max_tool_rounds, 16);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_parse_values_and_errors() {
        let settings = Settings::from_map(map(&[
            ("FRAGS_PARALLEL_WORKERS", "4"),
            ("FRAGS_TEMPERATURE", "0.3"),
            ("FRAGS_API_KEY", ""),
        ]))
        .unwrap();
        assert_eq!(settings.parallel_workers, 4);
        assert_eq!(settings.temperature, Some(0.3));
        assert!(settings.api_key.is_none());

        let err = Settings::from_map(map(&[("FRAGS_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_plan_env_hides_api_keys() {
        let settings = Settings::from_map(map(&[
            ("FRAGS_API_KEY", "sk-1"),
            ("FRAGS_WEB_API_KEY", "k"),
            ("FRAGS_REGION", "eu"),
        ]))
        .unwrap();
        let env = settings.plan_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env["FRAGS_REGION"], "eu");
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let err = Settings::load(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(std::fs::read_to_string(&path).unwrap().contains("FRAGS_MODEL"));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frags.env");
        std::fs::write(&path, "FRAGS_MODEL=llama3\nOTHER=x\nFRAGS_PLANS_DIR=/srv/plans\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.plans_dir, PathBuf::from("/srv/plans"));
        assert!(!settings.plan_env().contains_key("OTHER"));
    }
}
