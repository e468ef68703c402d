use std::sync::Arc;

use atelier_contracts::credentials::CredentialGate;
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::media::{ImageAspectRatio, MediaAsset, ResolvedMedia, VideoAspectRatio};
use atelier_contracts::models::{Capability, ModelSelector};
use atelier_contracts::operation::Operation;
use atelier_contracts::{StudioError, StudioResult};
use serde_json::{json, Map, Value};
use url::Url;

use crate::poller::OperationSource;
use crate::transport::{HttpRequest, Transport};

pub const ANALYSIS_INSTRUCTION: &str = "Describe this image in detail. What is happening? What are the key objects and subjects? What is the overall mood or style?";
pub const IMAGE_OUTPUT_MIME: &str = "image/jpeg";
pub const VIDEO_RESOLUTION: &str = "720p";

const LABEL: &str = "Gemini";
const DEFAULT_VIDEO_MIME: &str = "video/mp4";

/// Model name per call kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenAiModels {
    pub image: String,
    pub edit: String,
    pub analysis: String,
    pub video: String,
    pub video_extend: String,
}

impl Default for GenAiModels {
    fn default() -> Self {
        let selector = ModelSelector::default();
        let pick = |capability| {
            selector
                .select(None, capability)
                .map(|selection| selection.model.name)
                .unwrap_or_default()
        };
        Self {
            image: pick(Capability::Image),
            edit: pick(Capability::Edit),
            analysis: pick(Capability::Analysis),
            video: pick(Capability::Video),
            video_extend: pick(Capability::VideoExtend),
        }
    }
}

impl GenAiModels {
    /// Applies a user-requested model for `capability`, logging any fallback.
    pub fn override_with(
        &mut self,
        selector: &ModelSelector,
        capability: Capability,
        requested: Option<&str>,
    ) -> StudioResult<()> {
        if requested.map(str::trim).unwrap_or_default().is_empty() {
            return Ok(());
        }
        let selection = selector
            .select(requested, capability)
            .map_err(StudioError::Validation)?;
        if let Some(note) = &selection.note {
            tracing::warn!(capability = %capability, "{note}");
        }
        let slot = match capability {
            Capability::Image => &mut self.image,
            Capability::Edit => &mut self.edit,
            Capability::Analysis => &mut self.analysis,
            Capability::Video => &mut self.video,
            Capability::VideoExtend => &mut self.video_extend,
            Capability::GatewayImage | Capability::GatewayChat => {
                return Err(StudioError::validation(format!(
                    "'{capability}' models are served by the gateway client"
                )))
            }
        };
        *slot = selection.model.name;
        Ok(())
    }
}

/// Client for the generative backend's image, analysis and video calls.
pub struct GenAiClient {
    transport: Arc<dyn Transport>,
    credentials: Arc<CredentialGate>,
    api_base: String,
    models: GenAiModels,
    events: EventWriter,
}

impl std::fmt::Debug for GenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAiClient")
            .field("api_base", &self.api_base)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl GenAiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<CredentialGate>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            models: GenAiModels::default(),
            events: EventWriter::discard(),
        }
    }

    pub fn with_models(mut self, models: GenAiModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn models(&self) -> &GenAiModels {
        &self.models
    }

    fn api_key(&self) -> StudioResult<String> {
        self.credentials.active_key().ok_or_else(|| {
            StudioError::MissingCredential(
                "No API key available. Select a key or set GEMINI_API_KEY.".to_string(),
            )
        })
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        let model = model.trim_start_matches("models/");
        format!("{}/models/{model}:{method}", self.api_base)
    }

    fn post(&self, endpoint: String, body: Value) -> StudioResult<Value> {
        let api_key = self.api_key()?;
        let request = HttpRequest::post(LABEL, endpoint, body).with_query("key", api_key);
        self.transport.send_json(&request)
    }

    /// Generates one image and returns it as a `data:image/jpeg` URL.
    pub fn submit_image(&self, prompt: &str, aspect_ratio: ImageAspectRatio) -> StudioResult<String> {
        let model = &self.models.image;
        let response = self.post(
            self.model_endpoint(model, "predict"),
            json!({
                "instances": [{ "prompt": prompt }],
                "parameters": {
                    "sampleCount": 1,
                    "outputMimeType": IMAGE_OUTPUT_MIME,
                    "aspectRatio": aspect_ratio.as_str(),
                },
            }),
        )?;
        let encoded = first_prediction_bytes(&response)
            .ok_or_else(|| StudioError::no_result("No image generated in response."))?;
        self.events.record(
            "image_generated",
            payload(json!({ "model": model, "aspect_ratio": aspect_ratio.as_str() })),
        );
        Ok(format!("data:{IMAGE_OUTPUT_MIME};base64,{encoded}"))
    }

    /// Edits `image` according to `prompt`; returns the first produced image.
    pub fn submit_edit(&self, prompt: &str, image: &MediaAsset) -> StudioResult<String> {
        let model = &self.models.edit;
        let response = self.post(
            self.model_endpoint(model, "generateContent"),
            json!({
                "contents": [{
                    "parts": [
                        { "inlineData": image.inline_data() },
                        { "text": prompt },
                    ],
                }],
                "generationConfig": { "responseModalities": ["IMAGE"] },
            }),
        )?;
        let (mime_type, data) = first_inline_image(&response)
            .ok_or_else(|| StudioError::no_result("No image generated in response."))?;
        self.events.record(
            "image_edited",
            payload(json!({ "model": model, "mime_type": mime_type })),
        );
        Ok(format!("data:{mime_type};base64,{data}"))
    }

    /// Returns the model's free-text description of `image`.
    pub fn analyze(&self, image: &MediaAsset) -> StudioResult<String> {
        let response = self.post(
            self.model_endpoint(&self.models.analysis, "generateContent"),
            json!({
                "contents": [{
                    "parts": [
                        { "inlineData": image.inline_data() },
                        { "text": ANALYSIS_INSTRUCTION },
                    ],
                }],
            }),
        )?;
        let text = candidate_text(&response);
        if text.trim().is_empty() {
            return Err(StudioError::no_result("No analysis text in response."));
        }
        Ok(text)
    }

    pub fn submit_video(
        &self,
        prompt: &str,
        aspect_ratio: VideoAspectRatio,
        image: Option<&MediaAsset>,
    ) -> StudioResult<Operation> {
        let mut instance = Map::new();
        instance.insert("prompt".to_string(), Value::String(prompt.to_string()));
        if let Some(image) = image {
            instance.insert(
                "image".to_string(),
                json!({
                    "bytesBase64Encoded": image.content_base64(),
                    "mimeType": image.media_type(),
                }),
            );
        }
        let model = &self.models.video;
        let operation = self.start_video(model, instance, Some(aspect_ratio))?;
        tracing::info!(operation = %operation.name, model = %model, "video generation submitted");
        self.events.record(
            "video_submitted",
            payload(json!({
                "operation": operation.name,
                "model": model,
                "aspect_ratio": aspect_ratio.as_str(),
                "has_image": image.is_some(),
            })),
        );
        Ok(operation)
    }

    /// Continues the video produced by `prior`, inheriting its aspect ratio.
    pub fn extend_video(&self, prompt: &str, prior: &Operation) -> StudioResult<Operation> {
        let video = prior.produced_video().ok_or(StudioError::MissingSource)?;
        let aspect_ratio = prior.inherited_aspect_ratio();
        if aspect_ratio.is_none() {
            tracing::warn!(
                source = %prior.name,
                "source video has no known aspect ratio; letting the backend choose"
            );
        }
        let mut instance = Map::new();
        instance.insert("prompt".to_string(), Value::String(prompt.to_string()));
        instance.insert("video".to_string(), video.payload.clone());

        let model = &self.models.video_extend;
        let operation = self.start_video(model, instance, aspect_ratio)?;
        tracing::info!(
            operation = %operation.name,
            source = %prior.name,
            model = %model,
            "video extension submitted"
        );
        self.events.record(
            "video_extend_submitted",
            payload(json!({
                "operation": operation.name,
                "source_operation": prior.name,
                "model": model,
                "aspect_ratio": aspect_ratio.map(VideoAspectRatio::as_str),
            })),
        );
        Ok(operation)
    }

    fn start_video(
        &self,
        model: &str,
        instance: Map<String, Value>,
        aspect_ratio: Option<VideoAspectRatio>,
    ) -> StudioResult<Operation> {
        let mut parameters = json!({
            "numberOfVideos": 1,
            "resolution": VIDEO_RESOLUTION,
        });
        if let (Some(ratio), Some(obj)) = (aspect_ratio, parameters.as_object_mut()) {
            obj.insert("aspectRatio".to_string(), json!(ratio.as_str()));
        }
        let response = self.post(
            self.model_endpoint(model, "predictLongRunning"),
            json!({
                "instances": [Value::Object(instance)],
                "parameters": parameters,
            }),
        )?;
        Operation::from_payload(response, aspect_ratio)
    }

    /// Re-reads the operation resource. Safe to repeat.
    pub fn fetch_operation(&self, operation: &Operation) -> StudioResult<Operation> {
        let api_key = self.api_key()?;
        let url = format!("{}/{}", self.api_base, operation.name.trim_start_matches('/'));
        let request = HttpRequest::get(LABEL, url).with_query("key", api_key);
        let response = self.transport.send_json(&request)?;
        Operation::from_payload(response, operation.aspect_ratio)
    }

    /// Downloads a produced media location with the active key attached.
    pub fn resolve_media_location(&self, uri: &str) -> StudioResult<ResolvedMedia> {
        let api_key = self.api_key()?;
        let mut url = Url::parse(uri)
            .map_err(|err| StudioError::transport(format!("Invalid media location '{uri}': {err}")))?;
        url.query_pairs_mut().append_pair("key", &api_key);

        let request = HttpRequest::get(LABEL, url.to_string());
        let fetched = self.transport.fetch_bytes(&request)?;
        let media = ResolvedMedia {
            mime_type: fetched
                .content_type
                .unwrap_or_else(|| DEFAULT_VIDEO_MIME.to_string()),
            bytes: fetched.bytes,
            source_uri: uri.to_string(),
        };
        self.events.record(
            "media_resolved",
            payload(json!({
                "uri": request.redacted_url(),
                "mime_type": media.mime_type,
                "bytes": media.bytes.len(),
            })),
        );
        Ok(media)
    }
}

impl OperationSource for GenAiClient {
    fn fetch_operation(&self, operation: &Operation) -> StudioResult<Operation> {
        GenAiClient::fetch_operation(self, operation)
    }
}

fn first_prediction_bytes(response: &Value) -> Option<String> {
    response
        .get("predictions")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|row| {
            row.get("bytesBase64Encoded")
                .or_else(|| row.get("bytes_base64_encoded"))
                .or_else(|| row.get("image").and_then(|image| image.get("imageBytes")))
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

fn candidate_parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .take(1)
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .flatten()
}

fn first_inline_image(response: &Value) -> Option<(String, String)> {
    candidate_parts(response).find_map(|part| {
        let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        Some((mime_type.to_string(), data.to_string()))
    })
}

fn candidate_text(response: &Value) -> String {
    candidate_parts(response)
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
}
