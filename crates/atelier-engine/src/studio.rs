//! User-facing submission flows.
//!
//! Every flow validates locally, then runs its backend calls strictly in
//! sequence, and turns any failure into a [`FlowError`] carrying the message
//! to show. Entity-not-found failures on gated flows also reset the
//! credential gate so the next attempt asks for a key again.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use atelier_contracts::continuation::{ContinuationContext, ContinuationStore};
use atelier_contracts::credentials::CredentialGate;
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::media::{ImageAspectRatio, MediaAsset, ResolvedMedia, VideoAspectRatio};
use atelier_contracts::operation::{Operation, OperationState};
use atelier_contracts::{StudioError, StudioResult};
use serde_json::json;
use thiserror::Error;

use crate::genai::GenAiClient;
use crate::poller::{CancelToken, OperationPoller};

pub const CREDENTIAL_ERROR_MESSAGE: &str = "API Key error. Please try selecting your key again.";
pub const BUSY_MESSAGE: &str = "A request is already in progress.";
pub const PREVIOUS_VIDEO_ERROR_MESSAGE: &str = "Could not load the previously generated video.";
const UNKNOWN_ERROR_MESSAGE: &str = "An unknown error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    ImageGeneration,
    ImageEditing,
    ImageAnalysis,
    VideoGeneration,
    VideoContinuation,
    PreviousVideo,
}

impl Flow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImageGeneration => "image_generation",
            Self::ImageEditing => "image_editing",
            Self::ImageAnalysis => "image_analysis",
            Self::VideoGeneration => "video_generation",
            Self::VideoContinuation => "video_continuation",
            Self::PreviousVideo => "previous_video",
        }
    }

    /// Flows that sit behind the credential gate.
    pub fn is_gated(self) -> bool {
        matches!(self, Self::VideoGeneration | Self::VideoContinuation)
    }

    fn unknown_failure_message(self) -> &'static str {
        match self {
            Self::VideoGeneration => "An unknown error occurred during video generation.",
            Self::VideoContinuation => "An unknown error occurred during video extension.",
            _ => UNKNOWN_ERROR_MESSAGE,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct FlowError {
    pub flow: Flow,
    /// Text to show the user.
    pub message: String,
    /// True when this failure cleared the credential gate.
    pub credential_reset: bool,
    #[source]
    pub error: StudioError,
}

#[derive(Debug, Clone, Default)]
pub struct VideoRequest {
    pub prompt: String,
    pub aspect_ratio: VideoAspectRatio,
    pub image: Option<MediaAsset>,
}

#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub operation: Operation,
    pub media: ResolvedMedia,
    pub context: Arc<ContinuationContext>,
}

pub struct Studio {
    client: GenAiClient,
    poller: OperationPoller,
    gate: Arc<CredentialGate>,
    continuation: Arc<ContinuationStore>,
    events: EventWriter,
    in_flight: Mutex<HashSet<Flow>>,
}

struct InFlight<'a> {
    flows: &'a Mutex<HashSet<Flow>>,
    flow: Flow,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock_flows(self.flows).remove(&self.flow);
    }
}

fn lock_flows(flows: &Mutex<HashSet<Flow>>) -> MutexGuard<'_, HashSet<Flow>> {
    match flows.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Studio {
    pub fn new(
        client: GenAiClient,
        poller: OperationPoller,
        gate: Arc<CredentialGate>,
        continuation: Arc<ContinuationStore>,
    ) -> Self {
        Self {
            client,
            poller,
            gate,
            continuation,
            events: EventWriter::discard(),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn client(&self) -> &GenAiClient {
        &self.client
    }

    pub fn gate(&self) -> &Arc<CredentialGate> {
        &self.gate
    }

    pub fn continuation(&self) -> &Arc<ContinuationStore> {
        &self.continuation
    }

    pub fn is_in_flight(&self, flow: Flow) -> bool {
        lock_flows(&self.in_flight).contains(&flow)
    }

    pub fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: ImageAspectRatio,
    ) -> Result<String, FlowError> {
        self.run(Flow::ImageGeneration, || {
            if prompt.trim().is_empty() {
                return Err(StudioError::validation("Please enter a prompt."));
            }
            self.guarded(Flow::ImageGeneration, || {
                self.client.submit_image(prompt, aspect_ratio)
            })
        })
    }

    pub fn edit_image(&self, prompt: &str, image: Option<&MediaAsset>) -> Result<String, FlowError> {
        self.run(Flow::ImageEditing, || {
            let image = match image {
                Some(image) if !prompt.trim().is_empty() => image,
                _ => {
                    return Err(StudioError::validation(
                        "Please upload an image and enter a prompt.",
                    ))
                }
            };
            self.guarded(Flow::ImageEditing, || self.client.submit_edit(prompt, image))
        })
    }

    pub fn analyze_image(&self, image: Option<&MediaAsset>) -> Result<String, FlowError> {
        self.run(Flow::ImageAnalysis, || {
            let image =
                image.ok_or_else(|| StudioError::validation("Please upload an image to analyze."))?;
            self.guarded(Flow::ImageAnalysis, || self.client.analyze(image))
        })
    }

    /// Submits, polls and resolves a new video, then captures it as the
    /// continuation context.
    pub fn generate_video(
        &self,
        request: &VideoRequest,
        cancel: &CancelToken,
    ) -> Result<VideoOutcome, FlowError> {
        self.run(Flow::VideoGeneration, || {
            if request.prompt.trim().is_empty() && request.image.is_none() {
                return Err(StudioError::validation(
                    "Please enter a prompt or upload an image.",
                ));
            }
            self.gate.require()?;
            self.guarded(Flow::VideoGeneration, || {
                let submitted = self.client.submit_video(
                    &request.prompt,
                    request.aspect_ratio,
                    request.image.as_ref(),
                )?;
                let operation = self.finish(submitted, cancel)?;
                let media = self.resolve(&operation)?;
                let context = self.continuation.capture(operation.clone(), &request.prompt)?;
                self.record_context(&context);
                Ok(VideoOutcome {
                    operation,
                    media,
                    context,
                })
            })
        })
    }

    /// Extends the current context's video with `instruction`.
    ///
    /// The context read at submission is the one chained onto, even if a
    /// generation finishes in the meantime.
    pub fn continue_video(
        &self,
        instruction: &str,
        cancel: &CancelToken,
    ) -> Result<VideoOutcome, FlowError> {
        self.run(Flow::VideoContinuation, || {
            if instruction.trim().is_empty() {
                return Err(StudioError::validation(
                    "Please enter a prompt to continue the video.",
                ));
            }
            let prior = self.continuation.current().ok_or_else(|| {
                StudioError::validation(
                    "No previous video to continue. Please generate a video first.",
                )
            })?;
            self.gate.require()?;
            self.guarded(Flow::VideoContinuation, || {
                let submitted = self.client.extend_video(instruction, &prior.operation)?;
                let operation = self.finish(submitted, cancel)?;
                let media = self.resolve(&operation)?;
                let context = self
                    .continuation
                    .extend_from(&prior, operation.clone(), instruction)?;
                self.record_context(&context);
                Ok(VideoOutcome {
                    operation,
                    media,
                    context,
                })
            })
        })
    }

    /// Fetches the current context's video for display; `None` without a context.
    pub fn load_previous_video(&self) -> Result<Option<ResolvedMedia>, FlowError> {
        let Some(context) = self.continuation.current() else {
            return Ok(None);
        };
        self.run(Flow::PreviousVideo, || {
            self.guarded(Flow::PreviousVideo, || self.resolve(&context.operation))
        })
        .map(Some)
        .map_err(|mut err| {
            err.message = PREVIOUS_VIDEO_ERROR_MESSAGE.to_string();
            err
        })
    }

    fn finish(&self, submitted: Operation, cancel: &CancelToken) -> StudioResult<Operation> {
        let operation = self.poller.poll_until_done(&self.client, submitted, cancel)?;
        match &operation.state {
            OperationState::Failed { message } => Err(StudioError::OperationFailed(message.clone())),
            OperationState::Succeeded { video: Some(_) } => Ok(operation),
            _ => Err(StudioError::no_result(
                "Video URI not found in operation response.",
            )),
        }
    }

    fn resolve(&self, operation: &Operation) -> StudioResult<ResolvedMedia> {
        let uri = operation
            .video_uri()
            .ok_or_else(|| StudioError::no_result("Video URI not found in operation response."))?;
        self.client.resolve_media_location(uri)
    }

    fn record_context(&self, context: &ContinuationContext) {
        self.events.record(
            "continuation_captured",
            payload(json!({
                "operation": context.operation.name,
                "generation": context.generation,
                "prompt": context.prompt,
            })),
        );
    }

    /// Rejects a second concurrent submission of the same flow.
    fn guarded<T>(&self, flow: Flow, body: impl FnOnce() -> StudioResult<T>) -> StudioResult<T> {
        {
            let mut flows = lock_flows(&self.in_flight);
            if !flows.insert(flow) {
                return Err(StudioError::validation(BUSY_MESSAGE));
            }
        }
        let _in_flight = InFlight {
            flows: &self.in_flight,
            flow,
        };
        body()
    }

    fn run<T>(&self, flow: Flow, body: impl FnOnce() -> StudioResult<T>) -> Result<T, FlowError> {
        let started = Instant::now();
        self.events
            .record("flow_started", payload(json!({ "flow": flow.as_str() })));
        match body() {
            Ok(value) => {
                self.events.record(
                    "flow_succeeded",
                    payload(json!({
                        "flow": flow.as_str(),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    })),
                );
                Ok(value)
            }
            Err(error) => Err(self.fail(flow, error)),
        }
    }

    fn fail(&self, flow: Flow, error: StudioError) -> FlowError {
        let error = if flow.is_gated() {
            error.reinterpret_credential()
        } else {
            error
        };
        let credential_reset = matches!(error, StudioError::CredentialRejected(_));
        if credential_reset {
            self.gate.reset_credential();
            self.events
                .record("credential_reset", payload(json!({ "flow": flow.as_str() })));
        }
        let message = display_message(flow, &error);
        if error.is_validation() {
            tracing::warn!(flow = flow.as_str(), "{message}");
        } else {
            tracing::error!(flow = flow.as_str(), error = %error, "flow failed");
        }
        self.events.record(
            "flow_failed",
            payload(json!({
                "flow": flow.as_str(),
                "kind": error.kind(),
                "message": message,
                "credential_reset": credential_reset,
            })),
        );
        FlowError {
            flow,
            message,
            credential_reset,
            error,
        }
    }
}

fn display_message(flow: Flow, error: &StudioError) -> String {
    match error {
        StudioError::CredentialRejected(_) => CREDENTIAL_ERROR_MESSAGE.to_string(),
        StudioError::OperationFailed(message) if message.trim().is_empty() => {
            flow.unknown_failure_message().to_string()
        }
        other => {
            let text = other.to_string();
            if text.trim().is_empty() {
                UNKNOWN_ERROR_MESSAGE.to_string()
            } else {
                text
            }
        }
    }
}
