use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{StudioError, StudioResult};
use crate::media::VideoAspectRatio;

/// Provider-side result of a finished video job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedVideo {
    pub uri: String,
    pub mime_type: Option<String>,
    pub aspect_ratio: Option<VideoAspectRatio>,
    /// The provider's video object, sent back verbatim to extend it.
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Succeeded { video: Option<ProducedVideo> },
    Failed { message: String },
}

/// Handle of a long-running backend job.
///
/// Created pending by the client, refreshed only by the poller, terminal once
/// `state` leaves [`OperationState::Pending`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    pub state: OperationState,
    /// Aspect ratio the job was submitted with.
    pub aspect_ratio: Option<VideoAspectRatio>,
    pub payload: Value,
}

impl Operation {
    pub fn pending(name: impl Into<String>, aspect_ratio: Option<VideoAspectRatio>) -> Self {
        let name = name.into();
        Self {
            payload: serde_json::json!({ "name": name, "done": false }),
            name,
            state: OperationState::Pending,
            aspect_ratio,
        }
    }

    /// Parses an operation resource as returned by submit and status calls.
    pub fn from_payload(payload: Value, aspect_ratio: Option<VideoAspectRatio>) -> StudioResult<Self> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StudioError::no_result("Operation response is missing its name."))?;
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);

        let state = if !done {
            OperationState::Pending
        } else if let Some(error) = payload.get("error").filter(|value| !value.is_null()) {
            OperationState::Failed {
                message: error_message(error),
            }
        } else {
            OperationState::Succeeded {
                video: payload
                    .get("response")
                    .and_then(first_video_object)
                    .and_then(|video| produced_video(video, aspect_ratio)),
            }
        };

        Ok(Self {
            name,
            state,
            aspect_ratio,
            payload,
        })
    }

    pub fn is_done(&self) -> bool {
        !matches!(self.state, OperationState::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.state, OperationState::Succeeded { .. })
    }

    pub fn produced_video(&self) -> Option<&ProducedVideo> {
        match &self.state {
            OperationState::Succeeded { video } => video.as_ref(),
            _ => None,
        }
    }

    pub fn video_uri(&self) -> Option<&str> {
        self.produced_video().map(|video| video.uri.as_str())
    }

    pub fn failure_message(&self) -> Option<&str> {
        match &self.state {
            OperationState::Failed { message } => Some(message.as_str()),
            _ => None,
        }
    }

    /// Aspect ratio a continuation of this operation has to use.
    pub fn inherited_aspect_ratio(&self) -> Option<VideoAspectRatio> {
        self.produced_video()
            .and_then(|video| video.aspect_ratio)
            .or(self.aspect_ratio)
    }

    pub fn status_label(&self) -> &'static str {
        match self.state {
            OperationState::Pending => "pending",
            OperationState::Succeeded { .. } => "succeeded",
            OperationState::Failed { .. } => "failed",
        }
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(text) => text.trim().to_string(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn first_video_object(response: &Value) -> Option<&Value> {
    let rows = response
        .get("generatedVideos")
        .or_else(|| {
            response
                .get("generateVideoResponse")
                .and_then(|inner| inner.get("generatedSamples"))
        })
        .or_else(|| response.get("generatedSamples"))
        .and_then(Value::as_array)?;
    rows.first()
        .and_then(|row| row.get("video"))
        .filter(|video| video.is_object())
}

fn produced_video(video: &Value, submitted: Option<VideoAspectRatio>) -> Option<ProducedVideo> {
    let uri = video
        .get("uri")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let mime_type = video
        .get("mimeType")
        .or_else(|| video.get("encoding"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let aspect_ratio = video
        .get("aspectRatio")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<VideoAspectRatio>().ok())
        .or(submitted);
    Some(ProducedVideo {
        uri: uri.to_string(),
        mime_type,
        aspect_ratio,
        payload: video.clone(),
    })
}
