use std::time::Duration;

use atelier_contracts::{StudioError, StudioResult};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Provider-agnostic request description.
///
/// `label` names the backend in error messages. Query pairs and the bearer
/// token are attached at send time so `url` is always safe to log.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub label: &'static str,
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(label: &'static str, url: impl Into<String>) -> Self {
        Self {
            label,
            method: HttpMethod::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            bearer: None,
            body: None,
        }
    }

    pub fn post(label: &'static str, url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            ..Self::get(label, url)
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// URL without its query string.
    pub fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBytes {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Seam between the clients and the network.
pub trait Transport: Send + Sync {
    fn send_json(&self, request: &HttpRequest) -> StudioResult<Value>;
    fn fetch_bytes(&self, request: &HttpRequest) -> StudioResult<FetchedBytes>;
}

pub struct ReqwestTransport {
    http: HttpClient,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(),
            timeout,
        }
    }

    fn execute(&self, request: &HttpRequest) -> StudioResult<HttpResponse> {
        let mut builder: RequestBuilder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
        };
        builder = builder.timeout(self.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .json(body);
        }
        tracing::debug!(
            backend = request.label,
            method = ?request.method,
            url = request.redacted_url(),
            "sending request"
        );
        builder.send().map_err(|err| {
            StudioError::transport(format!(
                "{} request failed ({}): {}",
                request.label,
                request.redacted_url(),
                err.without_url()
            ))
        })
    }
}

impl Transport for ReqwestTransport {
    fn send_json(&self, request: &HttpRequest) -> StudioResult<Value> {
        let response = self.execute(request)?;
        response_json_or_error(request.label, response)
    }

    fn fetch_bytes(&self, request: &HttpRequest) -> StudioResult<FetchedBytes> {
        let response = self.execute(request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StudioError::transport(failure_message(
                request.label,
                status.as_u16(),
                &body,
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty());
        let bytes = response.bytes().map_err(|err| {
            StudioError::transport(format!(
                "{} download body read failed: {}",
                request.label,
                err.without_url()
            ))
        })?;
        Ok(FetchedBytes {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

fn response_json_or_error(label: &str, response: HttpResponse) -> StudioResult<Value> {
    let status = response.status();
    let body = response.text().map_err(|err| {
        StudioError::transport(format!(
            "{label} response body read failed: {}",
            err.without_url()
        ))
    })?;
    if !status.is_success() {
        return Err(StudioError::transport(failure_message(
            label,
            status.as_u16(),
            &body,
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        StudioError::transport(format!("{label} returned invalid JSON payload: {err}"))
    })
}

/// Prefers the backend's `error.message`; falls back to the truncated body.
pub(crate) fn failure_message(label: &str, code: u16, body: &str) -> String {
    let detail = backend_error_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            format!("{label} API error")
        } else {
            truncate_text(trimmed, 512)
        }
    });
    format!("{label} request failed ({code}): {detail}")
}

pub(crate) fn backend_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error")?;
    let message = match error {
        Value::String(text) => Some(text.as_str()),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str),
        _ => None,
    }?;
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_prefers_backend_error() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND"}}"#;
        let message = failure_message("Gemini", 404, body);
        assert_eq!(message, "Gemini request failed (404): Requested entity was not found.");
        assert!(StudioError::transport(message).is_entity_not_found());

        assert_eq!(
            failure_message("OpenRouter", 402, r#"{"error":"Insufficient credits"}"#),
            "OpenRouter request failed (402): Insufficient credits"
        );
        assert_eq!(
            failure_message("Gemini", 502, "  bad gateway  "),
            "Gemini request failed (502): bad gateway"
        );
        assert_eq!(
            failure_message("OpenRouter", 500, ""),
            "OpenRouter request failed (500): OpenRouter API error"
        );
    }

    #[test]
    fn redacted_url_drops_the_query() {
        let request = HttpRequest::get("Gemini", "https://files.example/v.mp4?alt=media&key=secret")
            .with_query("key", "secret");
        assert_eq!(request.redacted_url(), "https://files.example/v.mp4");
        assert_eq!(request.query, vec![("key".to_string(), "secret".to_string())]);
    }

    #[test]
    fn truncate_text_marks_cut_bodies() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }
}
