//! Data types and local state shared by the Atelier engine and CLI.

pub mod continuation;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod media;
pub mod models;
pub mod operation;

pub use errors::{StudioError, StudioResult};
