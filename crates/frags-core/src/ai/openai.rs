//! OpenAI-compatible `/chat/completions` backend (OpenAI, Ollama, vLLM, ...).
//!
//! POST {base_url}/chat/completions
//! Headers:
//!   authorization: Bearer {api_key}   (omitted when no key is configured)
//!   content-type: application/json

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{ChatBackend, ChatRequest, FunctionCall, Message, ModelTurn};
use crate::error::FragsError;
use crate::resources::Resource;

/// Connection and sampling settings.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct OpenAiBackend {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self, FragsError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FragsError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Request body for one call.
    pub fn build_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for message in request.messages {
            messages.push(encode_message(message));
        }

        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
        });

        if let Some(temp) = self.config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(top_p) = self.config.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.input_schema.to_upstream(),
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(schema) = request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "output",
                    "schema": schema.to_upstream(),
                    "strict": false,
                }
            });
        }

        if request.internet_search {
            body["web_search_options"] = json!({});
        }
        body
    }
}

fn encode_message(message: &Message) -> Value {
    match message {
        Message::User { text, resources } if resources.is_empty() => {
            json!({ "role": "user", "content": text })
        }
        Message::User { text, resources } => {
            let mut parts = vec![json!({ "type": "text", "text": text })];
            parts.extend(resources.iter().map(encode_resource));
            json!({ "role": "user", "content": parts })
        }
        Message::Assistant {
            text,
            function_calls,
        } => {
            let mut out = json!({
                "role": "assistant",
                "content": if text.is_empty() { Value::Null } else { json!(text) },
            });
            if !function_calls.is_empty() {
                out["tool_calls"] = function_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(call.args.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
            }
            out
        }
        Message::FunctionResult {
            call_id, result, ..
        } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": result.to_string(),
        }),
    }
}

fn encode_resource(resource: &Resource) -> Value {
    if resource.is_text() {
        if let Some(text) = resource.as_text() {
            return json!({
                "type": "text",
                "text": format!("<resource name=\"{}\">\n{}\n</resource>", resource.identifier, text),
            });
        }
    }
    let Some(url) = resource.data_url() else {
        return json!({ "type": "text", "text": format!("(resource {} has no content)", resource.identifier) });
    };
    if resource.media_type().starts_with("image/") {
        json!({ "type": "image_url", "image_url": { "url": url } })
    } else {
        json!({ "type": "file", "file": { "filename": resource.identifier, "file_data": url } })
    }
}

/// Extract text and tool calls from a completion response.
pub fn parse_response(json: &Value) -> Result<ModelTurn, FragsError> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| FragsError::Ai(format!("Response has no choices: {}", json)))?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let function_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    let name = function.get("name")?.as_str()?.to_string();
                    let args = match function.get("arguments") {
                        Some(Value::String(raw)) => serde_json::from_str::<Map<String, Value>>(raw).unwrap_or_default(),
                        Some(Value::Object(map)) => map.clone(),
                        _ => Map::new(),
                    };
                    Some(FunctionCall {
                        id: call
                            .get("id")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                        name,
                        args,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ModelTurn {
        text,
        function_calls,
    })
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<ModelTurn, FragsError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.build_body(&request);

        tracing::debug!(
            "[OpenAi] calling {} (model: {}, {} messages, {} functions)",
            url,
            self.config.model,
            request.messages.len(),
            request.functions.len()
        );

        let mut http = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| FragsError::Ai(format!("HTTP request failed: {}", e)))?;
        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| FragsError::Ai(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(FragsError::Ai(format!("API returned {}: {}", status, response_text)));
        }

        let json: Value = serde_json::from_str(&response_text)
            .map_err(|e| FragsError::Ai(format!("Failed to parse response JSON: {}", e)))?;
        if let Some(usage) = json.get("usage") {
            tracing::debug!(
                "[OpenAi] usage: prompt={} completion={}",
                usage["prompt_tokens"].as_u64().unwrap_or(0),
                usage["completion_tokens"].as_u64().unwrap_or(0)
            );
        }
        parse_response(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionSpec;
    use crate::schema::Schema;

    #[test]
    fn test_body_strips_extensions_and_maps_tools() {
        let backend = OpenAiBackend::new(OpenAiConfig {
            temperature: Some(0.2),
            ..Default::default()
        })
        .unwrap();
        let schema = Schema::from_yaml(
            "type: object\nproperties:\n  title: { type: string, x-session: writer, x-phase: 0 }\n",
        )
        .unwrap();
        let functions = vec![FunctionSpec {
            name: "fs__read_file".into(),
            description: "Read".into(),
            input_schema: Schema::from_yaml("type: object\nproperties:\n  path: { type: string }\n").unwrap(),
        }];
        let messages = vec![Message::User {
            text: "hello".into(),
            resources: vec![Resource::with_bytes("notes.txt", b"some notes".to_vec())],
        }];
        let request = ChatRequest {
            system_prompt: Some("be brief"),
            messages: &messages,
            schema: Some(&schema),
            functions: &functions,
            internet_search: true,
        };

        let body = backend.build_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][1]["type"], "text");
        assert!(body["messages"][1]["content"][1]["text"]
            .as_str()
            .unwrap()
            .contains("some notes"));
        assert_eq!(body["tools"][0]["function"]["name"], "fs__read_file");
        assert!(!body["response_format"].to_string().contains("x-session"));
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("web_search_options").is_some());
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let json = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "roll_die", "arguments": "{\"sides\": 6}" }
                    }]
                }
            }]
        });
        let turn = parse_response(&json).unwrap();
        assert_eq!(turn.text, "");
        assert_eq!(turn.function_calls[0].name, "roll_die");
        assert_eq!(turn.function_calls[0].args["sides"], 6);

        assert_eq!(parse_response(&json!({})).unwrap_err().kind(), "ai");
    }
}
