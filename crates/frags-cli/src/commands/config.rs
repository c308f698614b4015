//! `frags config`: Show the resolved settings.

use std::path::Path;

use frags_core::Settings;

/// One `key: value` line per setting. Secrets are reported as set or unset.
pub fn describe(path: &Path, settings: &Settings) -> String {
    let secret = |value: &Option<String>| if value.is_some() { "<set>" } else { "<unset>" };
    let optional = |value: Option<String>| value.unwrap_or_else(|| "<unset>".to_string());

    let lines = [
        format!("config file: {}", path.display()),
        format!("model: {}", settings.model),
        format!("base_url: {}", settings.base_url),
        format!("api_key: {}", secret(&settings.api_key)),
        format!("parallel_workers: {}", settings.parallel_workers),
        format!("temperature: {}", optional(settings.temperature.map(|v| v.to_string()))),
        format!("top_p: {}", optional(settings.top_p.map(|v| v.to_string()))),
        format!("max_tokens: {}", optional(settings.max_tokens.map(|v| v.to_string()))),
        format!("timeout_secs: {}", settings.timeout.as_secs()),
        format!("max_tool_rounds: {}", settings.max_tool_rounds),
        format!("web_api_key: {}", secret(&settings.web_api_key)),
        format!("plans_dir: {}", settings.plans_dir.display()),
        format!("log: {}", settings.log_filter),
    ];
    lines.join("\n")
}

pub fn show(path: &Path, settings: &Settings) -> Result<(), String> {
    println!("{}", describe(path, settings));
    Ok(())
}
