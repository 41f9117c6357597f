//! HTTP API collaborator.
//!
//! Sources of kind `api` and the `api` action fetch a JSON document
//! through an [`ApiClient`]. The default client is a blocking `ureq` agent.

use crate::value::{Map, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An HTTP request descriptor, as written in a job file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// JSON body for POST requests.
    #[serde(default)]
    pub body: Option<Value>,
}

/// HTTP method subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set paging.
    pub fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn method(&self) -> Result<Method, ApiError> {
        match self.method.as_deref().map(|m| m.trim().to_uppercase()).as_deref() {
            None | Some("GET") => Ok(Method::Get),
            Some("POST") => Ok(Method::Post),
            Some(other) => Err(ApiError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Headers sent with the request, including content negotiation and
    /// authorization.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        headers.extend(self.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }

    /// Query string parameters (paging).
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset", offset.to_string()));
        }
        pairs
    }

    /// Apply overrides from action parameters.
    ///
    /// Recognised keys: `url`, `method`, `token`, `limit`, `offset`,
    /// `body`, `headers`.
    pub fn with_overrides(mut self, params: &Map) -> Self {
        if let Some(url) = params.get("url").and_then(Value::as_str) {
            self.url = url.to_string();
        }
        if let Some(method) = params.get("method").and_then(Value::as_str) {
            self.method = Some(method.to_string());
        }
        if let Some(token) = params.get("token").and_then(Value::as_str) {
            self.token = Some(token.to_string());
        }
        if let Some(limit) = params.get("limit").and_then(as_u64) {
            self.limit = Some(limit);
        }
        if let Some(offset) = params.get("offset").and_then(as_u64) {
            self.offset = Some(offset);
        }
        if let Some(body) = params.get("body") {
            self.body = Some(body.clone());
        }
        if let Some(headers) = params.get("headers").and_then(Value::as_object) {
            for (k, v) in headers {
                self.headers.insert(k.clone(), v.to_text());
            }
        }
        self
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64().and_then(|n| u64::try_from(n).ok()),
    }
}

/// Fetches JSON documents over HTTP.
pub trait ApiClient: Send + Sync {
    fn fetch(&self, request: &ApiRequest) -> Result<Value, ApiError>;
}

/// Blocking HTTP client backed by `ureq`.
#[cfg(feature = "http")]
pub struct HttpApiClient {
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl Default for HttpApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
impl HttpApiClient {
    pub fn new() -> Self {
        Self::with_timeout(std::time::Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

#[cfg(feature = "http")]
impl ApiClient for HttpApiClient {
    fn fetch(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        if request.url.trim().is_empty() {
            return Err(ApiError::MissingUrl);
        }
        let method = request.method()?;
        let mut req = match method {
            Method::Get => self.agent.get(&request.url),
            Method::Post => self.agent.post(&request.url),
        };
        for (name, value) in request.header_pairs() {
            req = req.set(&name, &value);
        }
        for (name, value) in request.query_pairs() {
            req = req.query(name, &value);
        }

        tracing::debug!(url = %request.url, ?method, "api request");
        let result = match (method, &request.body) {
            (Method::Post, Some(body)) => req.send_json(serde_json::Value::from(body.clone())),
            _ => req.call(),
        };

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ApiError::Status { status, body });
            }
            Err(e) => return Err(ApiError::Transport(e.to_string())),
        };

        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(Value::from(json))
    }
}

/// Client for builds without HTTP support; every request fails.
pub struct DisabledApiClient;

impl ApiClient for DisabledApiClient {
    fn fetch(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        Err(ApiError::Transport(format!(
            "HTTP support not compiled in, cannot fetch {}",
            request.url
        )))
    }
}

/// The default client for this build.
pub fn default_client() -> std::sync::Arc<dyn ApiClient> {
    #[cfg(feature = "http")]
    {
        std::sync::Arc::new(HttpApiClient::new())
    }
    #[cfg(not(feature = "http"))]
    {
        std::sync::Arc::new(DisabledApiClient)
    }
}

/// Errors from API requests.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request has no url")]
    MissingUrl,

    #[error("unsupported http method: {0}")]
    UnsupportedMethod(String),

    #[error("api returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("api request failed: {0}")]
    Transport(String),

    #[error("api response is not valid json: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapExt;

    #[test]
    fn test_headers_and_paging() {
        let request = ApiRequest::get("http://localhost/items")
            .token("s3cret")
            .page(50, 100);

        let headers = request.header_pairs();
        assert!(headers.contains(&("Authorization".into(), "Bearer s3cret".into())));
        assert!(headers.contains(&("Accept".into(), "application/json".into())));
        assert_eq!(
            request.query_pairs(),
            vec![("limit", "50".to_string()), ("offset", "100".to_string())]
        );
    }

    #[test]
    fn test_no_token_no_authorization() {
        let request = ApiRequest::get("http://localhost/items");
        assert!(!request.header_pairs().iter().any(|(k, _)| k == "Authorization"));
        assert!(request.query_pairs().is_empty());
    }

    #[test]
    fn test_method() {
        let mut request = ApiRequest::get("http://x");
        assert_eq!(request.method().unwrap(), Method::Get);
        request.method = Some("post".into());
        assert_eq!(request.method().unwrap(), Method::Post);
        request.method = Some("DELETE".into());
        assert!(matches!(request.method(), Err(ApiError::UnsupportedMethod(m)) if m == "DELETE"));
    }

    #[test]
    fn test_overrides() {
        let params = Map::new()
            .with("limit", "10")
            .with("offset", 20i64)
            .with("method", "POST")
            .with("body", Map::new().with("q", "x"));
        let request = ApiRequest::get("http://x").with_overrides(&params);
        assert_eq!(request.limit, Some(10));
        assert_eq!(request.offset, Some(20));
        assert_eq!(request.method().unwrap(), Method::Post);
        assert!(request.body.is_some());
    }

    #[cfg(feature = "http")]
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut request = Vec::new();
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/items", addr)
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_fetch() {
        let url = serve_once("HTTP/1.1 200 OK", r#"[{"id": 1}, {"id": 2}]"#);
        let value = HttpApiClient::new()
            .fetch(&ApiRequest::get(url).page(2, 0))
            .unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_status_error() {
        let url = serve_once("HTTP/1.1 404 Not Found", r#"{"error": "nope"}"#);
        let err = HttpApiClient::new().fetch(&ApiRequest::get(url)).unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
    }
}
