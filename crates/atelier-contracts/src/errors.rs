//! Typed failures shared by the operation client, the poller and the
//! submission flows.
//!
//! Flows match on the variant instead of probing message text, with one
//! deliberate exception: the backend reports a stale or foreign credential
//! only through the "entity not found" message, so [`StudioError::is_entity_not_found`]
//! inspects the text.

use thiserror::Error;

/// Message fragment the backend returns when the credential cannot see the
/// requested resource.
pub const ENTITY_NOT_FOUND_SIGNATURE: &str = "Requested entity was not found";

pub type StudioResult<T> = Result<T, StudioError>;

#[derive(Debug, Error)]
pub enum StudioError {
    /// Local input check failed before any network call.
    #[error("{0}")]
    Validation(String),

    /// Network or backend failure on submit, status check or media fetch.
    #[error("{0}")]
    Transport(String),

    /// The backend answered successfully but the expected media is absent.
    #[error("{0}")]
    NoResult(String),

    /// A continuation was requested from an operation without a produced video.
    #[error("Previous video data not found.")]
    MissingSource,

    /// No credential value is available to attach to a backend call.
    #[error("{0}")]
    MissingCredential(String),

    /// The credential gate is closed; the user has to select a key first.
    #[error("An API key must be selected before using video generation.")]
    CredentialRequired,

    /// A transport failure reinterpreted as an invalid or stale credential.
    #[error("{0}")]
    CredentialRejected(String),

    /// The long-running operation finished in its error state.
    #[error("{0}")]
    OperationFailed(String),

    #[error("operation polling cancelled after {checks} status checks")]
    Cancelled { checks: u32 },

    #[error("operation still pending after waiting {waited_s:.1}s")]
    TimedOut { waited_s: f64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StudioError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn no_result(message: impl Into<String>) -> Self {
        Self::NoResult(message.into())
    }

    /// True when the failure carries the backend's "entity not found" signature.
    pub fn is_entity_not_found(&self) -> bool {
        match self {
            Self::Transport(message)
            | Self::OperationFailed(message)
            | Self::CredentialRejected(message) => message.contains(ENTITY_NOT_FOUND_SIGNATURE),
            _ => false,
        }
    }

    /// Rewrites an entity-not-found failure as [`StudioError::CredentialRejected`].
    /// Every other error is returned untouched.
    pub fn reinterpret_credential(self) -> Self {
        match self {
            Self::Transport(message) | Self::OperationFailed(message)
                if message.contains(ENTITY_NOT_FOUND_SIGNATURE) =>
            {
                Self::CredentialRejected(message)
            }
            other => other,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Stable short label used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transport(_) => "transport",
            Self::NoResult(_) => "no_result",
            Self::MissingSource => "missing_source",
            Self::MissingCredential(_) => "missing_credential",
            Self::CredentialRequired => "credential_required",
            Self::CredentialRejected(_) => "credential_rejected",
            Self::OperationFailed(_) => "operation_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_not_found_is_detected_in_transport_and_operation_errors() {
        let transport = StudioError::transport(
            "Gemini request failed (404): Requested entity was not found.",
        );
        assert!(transport.is_entity_not_found());

        let failed = StudioError::OperationFailed(
            "Requested entity was not found. (operation models/veo/operations/1)".to_string(),
        );
        assert!(failed.is_entity_not_found());

        assert!(!StudioError::transport("connection reset").is_entity_not_found());
        assert!(!StudioError::validation(ENTITY_NOT_FOUND_SIGNATURE).is_entity_not_found());
    }

    #[test]
    fn reinterpret_only_touches_entity_not_found() {
        let rejected =
            StudioError::transport("Requested entity was not found.").reinterpret_credential();
        assert!(matches!(rejected, StudioError::CredentialRejected(_)));
        assert!(rejected.is_entity_not_found());

        let untouched = StudioError::transport("503 backend unavailable").reinterpret_credential();
        assert!(matches!(untouched, StudioError::Transport(_)));
        assert_eq!(untouched.kind(), "transport");
    }

    #[test]
    fn display_is_the_verbatim_message() {
        assert_eq!(
            StudioError::no_result("Video URI not found in operation response.").to_string(),
            "Video URI not found in operation response."
        );
        assert_eq!(
            StudioError::MissingSource.to_string(),
            "Previous video data not found."
        );
        assert_eq!(
            StudioError::TimedOut { waited_s: 30.0 }.to_string(),
            "operation still pending after waiting 30.0s"
        );
    }
}
