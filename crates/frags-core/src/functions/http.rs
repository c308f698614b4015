//! `http` collection: GET and POST with an optional host allowlist.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{str_arg, Function, RunnerHandle};
use crate::error::FragsError;
use crate::schema::Schema;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub fn functions(params: &Map<String, Value>) -> Result<Vec<(String, Arc<dyn Function>)>, FragsError> {
    let allowed_hosts: Option<Vec<String>> = match params.get("allowedHosts") {
        None | Some(Value::Null) => None,
        Some(Value::Array(hosts)) => Some(
            hosts
                .iter()
                .filter_map(Value::as_str)
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        ),
        Some(other) => {
            return Err(FragsError::Config(format!(
                "http collection: allowedHosts must be a list, got {}",
                other
            )))
        }
    };

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| FragsError::Config(format!("http collection: {}", e)))?;
    let shared = Arc::new(HttpShared {
        client,
        allowed_hosts,
    });

    Ok(vec![
        ("get".to_string(), Arc::new(HttpFunction::new(false, shared.clone())?) as Arc<dyn Function>),
        ("post".to_string(), Arc::new(HttpFunction::new(true, shared)?)),
    ])
}

struct HttpShared {
    client: reqwest::Client,
    allowed_hosts: Option<Vec<String>>,
}

impl HttpShared {
    fn check_host(&self, url: &reqwest::Url) -> Result<(), FragsError> {
        let Some(allowed) = &self.allowed_hosts else {
            return Ok(());
        };
        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        if allowed.iter().any(|a| *a == host) {
            Ok(())
        } else {
            Err(FragsError::tool(format!("Host '{}' is not in allowedHosts", host)))
        }
    }
}

struct HttpFunction {
    post: bool,
    shared: Arc<HttpShared>,
    schema: Schema,
}

impl HttpFunction {
    fn new(post: bool, shared: Arc<HttpShared>) -> Result<Self, FragsError> {
        let yaml = if post {
            "type: object\nrequired: [url, body]\nproperties:\n  url: { type: string }\n  body: {}\n  headers: { type: object }\n"
        } else {
            "type: object\nrequired: [url]\nproperties:\n  url: { type: string }\n  headers: { type: object }\n"
        };
        let schema = Schema::from_yaml(yaml).map_err(FragsError::Internal)?;
        Ok(Self { post, shared, schema })
    }
}

#[async_trait]
impl Function for HttpFunction {
    fn description(&self) -> &str {
        if self.post {
            "POST a JSON (or string) body to a URL and return the response"
        } else {
            "GET a URL and return the response"
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
        let url = reqwest::Url::parse(str_arg(&args, "url")?)
            .map_err(|e| FragsError::tool(format!("Invalid url: {}", e)))?;
        self.shared.check_host(&url)?;

        let mut request = if self.post {
            let builder = self.shared.client.post(url.clone());
            match args.get("body") {
                Some(Value::String(text)) => builder.body(text.clone()),
                Some(body) => builder.json(body),
                None => builder,
            }
        } else {
            self.shared.client.get(url.clone())
        };
        if let Some(Value::Object(headers)) = args.get("headers") {
            for (name, value) in headers {
                let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                request = request.header(name.as_str(), value);
            }
        }

        tracing::debug!("[Http] {} {}", if self.post { "POST" } else { "GET" }, url);
        let response = request
            .send()
            .await
            .map_err(|e| FragsError::tool(format!("Request to {} failed: {}", url, e)))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| FragsError::tool(format!("Reading response from {} failed: {}", url, e)))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        Ok(super::as_result_map(json!({ "status": status, "body": body })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_allowed_hosts_are_enforced() {
        let mut params = Map::new();
        params.insert("allowedHosts".into(), json!(["api.example.com"]));
        let fns = functions(&params).unwrap();
        let get = &fns[0].1;

        let handle = RunnerHandle::new(Arc::new(FunctionRegistry::new()), CancellationToken::new());
        let args = json!({"url": "http://other.example.org/x"}).as_object().cloned().unwrap();
        let err = get.invoke(args, &handle).await.unwrap_err();
        assert!(err.to_string().contains("allowedHosts"));
    }

    #[test]
    fn test_allowed_hosts_must_be_a_list() {
        let mut params = Map::new();
        params.insert("allowedHosts".into(), json!("api.example.com"));
        assert_eq!(functions(&params).err().map(|e| e.kind()), Some("config"));
    }
}
