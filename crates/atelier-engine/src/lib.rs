//! Backend clients, the operation poller and the submission flows.

pub mod config;
pub mod genai;
pub mod openrouter;
pub mod poller;
pub mod studio;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::StudioConfig;
pub use genai::{GenAiClient, GenAiModels};
pub use openrouter::{ChatMessage, ChatRole, OpenRouterClient};
pub use poller::{CancelToken, OperationPoller, OperationSource, PollPolicy, Sleeper, ThreadSleeper};
pub use studio::{Flow, FlowError, Studio, VideoOutcome, VideoRequest};
pub use transport::{ReqwestTransport, Transport};
