use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atelier_contracts::credentials::{CredentialGate, MemoryCredentialProvider};
use atelier_contracts::{StudioError, StudioResult};
use serde_json::Value;

use crate::poller::{CancelToken, Sleeper};
use crate::transport::{FetchedBytes, HttpRequest, Transport};

pub(crate) const TEST_KEY: &str = "test-key-123";

enum Scripted {
    Json(Value),
    Bytes(FetchedBytes),
    Fail(String),
}

/// Transport that answers from a queue and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn push_json(&self, value: Value) -> &Self {
        self.responses.lock().unwrap().push_back(Scripted::Json(value));
        self
    }

    pub(crate) fn push_bytes(&self, bytes: &[u8], content_type: Option<&str>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Bytes(FetchedBytes {
                bytes: bytes.to_vec(),
                content_type: content_type.map(str::to_string),
            }));
        self
    }

    pub(crate) fn push_failure(&self, message: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &HttpRequest) -> StudioResult<Scripted> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Scripted::Fail(message)) => Err(StudioError::transport(message)),
            Some(other) => Ok(other),
            None => Err(StudioError::transport(format!(
                "no scripted response for {}",
                request.redacted_url()
            ))),
        }
    }
}

impl Transport for ScriptedTransport {
    fn send_json(&self, request: &HttpRequest) -> StudioResult<Value> {
        match self.next(request)? {
            Scripted::Json(value) => Ok(value),
            _ => panic!("expected a JSON response for {}", request.url),
        }
    }

    fn fetch_bytes(&self, request: &HttpRequest) -> StudioResult<FetchedBytes> {
        match self.next(request)? {
            Scripted::Bytes(bytes) => Ok(bytes),
            _ => panic!("expected a byte response for {}", request.url),
        }
    }
}

/// Records requested delays instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    cancel_after: Option<usize>,
}

impl RecordingSleeper {
    /// Lets `completed` sleeps finish, then reports cancellation.
    pub(crate) fn cancelling_after(completed: usize) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            cancel_after: Some(completed),
        }
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        let mut sleeps = self.sleeps.lock().unwrap();
        if self.cancel_after == Some(sleeps.len()) {
            cancel.cancel();
            return false;
        }
        sleeps.push(duration);
        !cancel.is_cancelled()
    }
}

pub(crate) fn gate_with_key() -> Arc<CredentialGate> {
    Arc::new(CredentialGate::new(Arc::new(
        MemoryCredentialProvider::with_key(TEST_KEY),
    )))
}

pub(crate) fn gate_without_key() -> Arc<CredentialGate> {
    Arc::new(CredentialGate::with_fallback_provider())
}
