use std::sync::Arc;

use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::models::{Capability, ModelSelector};
use atelier_contracts::{StudioError, StudioResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::StudioConfig;
use crate::transport::{HttpRequest, Transport};

const LABEL: &str = "OpenRouter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Chat-completions gateway used for alternate image and text models.
///
/// Independent of the video lifecycle and of the credential gate; it
/// authenticates with its own bearer key.
pub struct OpenRouterClient {
    transport: Arc<dyn Transport>,
    api_base: String,
    api_key: Option<String>,
    referer: Option<String>,
    title: Option<String>,
    selector: ModelSelector,
    events: EventWriter,
}

impl OpenRouterClient {
    pub fn new(transport: Arc<dyn Transport>, api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            transport,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            referer: None,
            title: None,
            selector: ModelSelector::default(),
            events: EventWriter::discard(),
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &StudioConfig) -> Self {
        Self {
            referer: config.openrouter_referer.clone(),
            title: config.openrouter_title.clone(),
            ..Self::new(
                transport,
                config.openrouter_api_base.clone(),
                config.openrouter_api_key.clone(),
            )
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    /// Catalog default for `capability` unless the caller named a model.
    fn model_for(&self, capability: Capability, requested: Option<&str>) -> StudioResult<String> {
        let selection = self
            .selector
            .select(requested, capability)
            .map_err(StudioError::Validation)?;
        if requested.is_some() {
            if let Some(note) = &selection.note {
                tracing::warn!(capability = %capability, "{note}");
            }
        }
        Ok(selection.model.name)
    }

    fn authorized(&self, request: HttpRequest) -> StudioResult<HttpRequest> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            StudioError::MissingCredential("OPENROUTER_API_KEY not configured.".to_string())
        })?;
        let mut request = request
            .with_bearer(api_key)
            .with_header("accept", "application/json");
        if let Some(referer) = &self.referer {
            request = request.with_header("HTTP-Referer", referer.as_str());
        }
        if let Some(title) = &self.title {
            request = request.with_header("X-Title", title.as_str());
        }
        Ok(request)
    }

    fn chat_completion(&self, body: Value) -> StudioResult<Value> {
        let endpoint = format!("{}/chat/completions", self.api_base);
        let request = self.authorized(HttpRequest::post(LABEL, endpoint, body))?;
        self.transport.send_json(&request)
    }

    /// Asks an image model for a picture; returns the URL it answers with.
    pub fn generate_image(&self, prompt: &str, model: Option<&str>) -> StudioResult<String> {
        let model = self.model_for(Capability::GatewayImage, model)?;
        let mut body = json!({
            "model": &model,
            "messages": [ChatMessage::user(prompt)],
        });
        if model.contains("dall-e") {
            if let Some(obj) = body.as_object_mut() {
                obj.insert("n".to_string(), json!(1));
                obj.insert("size".to_string(), json!("1024x1024"));
                obj.insert("quality".to_string(), json!("standard"));
            }
        }
        let response = self.chat_completion(body)?;
        let url = first_message_content(&response)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StudioError::no_result("No image URL in response"))?;
        self.events.record(
            "gateway_image_generated",
            payload(json!({ "model": &model })),
        );
        Ok(url)
    }

    /// Sends a conversation and returns the reply; empty when the model said nothing.
    pub fn chat(&self, messages: &[ChatMessage], model: Option<&str>) -> StudioResult<String> {
        let model = self.model_for(Capability::GatewayChat, model)?;
        let response = self.chat_completion(json!({
            "model": &model,
            "messages": messages,
        }))?;
        let reply = first_message_content(&response).unwrap_or_default();
        self.events.record(
            "gateway_chat_completed",
            payload(json!({
                "model": &model,
                "messages": messages.len(),
                "reply_chars": reply.chars().count(),
            })),
        );
        Ok(reply)
    }

    /// Public model listing; needs no key.
    pub fn list_models(&self) -> StudioResult<Value> {
        let request = HttpRequest::get(LABEL, format!("{}/models", self.api_base));
        self.transport.send_json(&request).map_err(|err| match err {
            StudioError::Transport(message) => {
                StudioError::transport(format!("Failed to fetch OpenRouter models: {message}"))
            }
            other => other,
        })
    }
}

fn first_message_content(response: &Value) -> Option<String> {
    response
        .get("choices")
        .and_then(Value::as_array)?
        .first()?
        .get("message")?
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;

    const BASE: &str = "https://gateway.example/api/v1";

    fn client(transport: &Arc<ScriptedTransport>) -> OpenRouterClient {
        OpenRouterClient::new(transport.clone(), BASE, Some("or-key".to_string()))
    }

    #[test]
    fn dall_e_requests_carry_image_extras() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "https://img.example/1.png" } }],
        }));

        let url = client(&transport).generate_image("a lighthouse", None)?;
        assert_eq!(url, "https://img.example/1.png");

        let request = &transport.requests()[0];
        assert_eq!(request.url, "https://gateway.example/api/v1/chat/completions");
        assert_eq!(request.bearer.as_deref(), Some("or-key"));
        let body = request.body.clone().unwrap_or_default();
        assert_eq!(body["model"], "openai/dall-e-3");
        assert_eq!(body["n"], 1);
        assert_eq!(body["size"], "1024x1024");
        assert_eq!(body["quality"], "standard");
        assert_eq!(body["messages"][0], json!({ "role": "user", "content": "a lighthouse" }));
        Ok(())
    }

    #[test]
    fn other_image_models_skip_the_extras() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({ "choices": [{ "message": { "content": "https://img.example/2.png" } }] }));
        client(&transport).generate_image("a lighthouse", Some("stability/sdxl"))?;
        let body = transport.requests()[0].body.clone().unwrap_or_default();
        assert!(body.get("size").is_none());
        assert_eq!(body["model"], "stability/sdxl");
        Ok(())
    }

    #[test]
    fn chat_model_names_resolve_through_the_catalog() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport
            .push_json(json!({ "choices": [{ "message": { "content": "a" } }] }))
            .push_json(json!({ "choices": [{ "message": { "content": "b" } }] }));
        let client = client(&transport);

        client.chat(&[ChatMessage::user("hi")], Some("openai/dall-e-3"))?;
        client.chat(&[ChatMessage::user("hi")], Some("meta-llama/llama-3-70b"))?;

        let models: Vec<Value> = transport
            .requests()
            .iter()
            .map(|request| request.body.clone().unwrap_or_default()["model"].clone())
            .collect();
        assert_eq!(
            models,
            vec![json!("anthropic/claude-3.5-sonnet"), json!("meta-llama/llama-3-70b")]
        );
        Ok(())
    }

    #[test]
    fn empty_image_reply_is_no_result() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({ "choices": [] }));
        let err = client(&transport).generate_image("a lighthouse", None).unwrap_err();
        assert_eq!(err.to_string(), "No image URL in response");
    }

    #[test]
    fn chat_returns_empty_string_without_content() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({ "choices": [{ "message": { "role": "assistant" } }] }));
        let reply = client(&transport).chat(
            &[ChatMessage::system("be brief"), ChatMessage::user("hi")],
            None,
        )?;
        assert_eq!(reply, "");
        let body = transport.requests()[0].body.clone().unwrap_or_default();
        assert_eq!(body["model"], "anthropic/claude-3.5-sonnet");
        assert_eq!(body["messages"][0]["role"], "system");
        Ok(())
    }

    #[test]
    fn optional_headers_come_from_config() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({ "choices": [{ "message": { "content": "ok" } }] }));
        let config = StudioConfig {
            openrouter_api_base: BASE.to_string(),
            openrouter_api_key: Some("or-key".to_string()),
            openrouter_referer: Some("https://atelier.local".to_string()),
            openrouter_title: Some("Atelier".to_string()),
            ..StudioConfig::default()
        };
        OpenRouterClient::from_config(transport.clone(), &config).chat(&[ChatMessage::user("hi")], None)?;
        let headers = transport.requests()[0].headers.clone();
        assert!(headers.contains(&("HTTP-Referer".to_string(), "https://atelier.local".to_string())));
        assert!(headers.contains(&("X-Title".to_string(), "Atelier".to_string())));
        Ok(())
    }

    #[test]
    fn missing_key_blocks_completions_but_not_listing() -> anyhow::Result<()> {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_json(json!({ "data": [{ "id": "openai/dall-e-3" }] }));
        let client = OpenRouterClient::new(transport.clone(), BASE, None);

        let err = client.chat(&[ChatMessage::user("hi")], None).unwrap_err();
        assert!(matches!(err, StudioError::MissingCredential(_)));
        assert!(transport.requests().is_empty());

        let models = client.list_models()?;
        assert_eq!(models["data"][0]["id"], "openai/dall-e-3");
        assert_eq!(transport.requests()[0].bearer, None);
        Ok(())
    }

    #[test]
    fn listing_failures_are_labelled() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_failure("OpenRouter request failed (503): OpenRouter API error");
        let err = client(&transport).list_models().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to fetch OpenRouter models: OpenRouter request failed (503): OpenRouter API error"
        );
    }
}
