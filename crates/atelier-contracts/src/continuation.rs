use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{StudioError, StudioResult};
use crate::media::VideoAspectRatio;
use crate::operation::Operation;

/// Joins the cumulative prompt and a new instruction into a narrative that
/// can itself be resubmitted to the model.
pub const CONTINUATION_SEPARATOR: &str = ", then ";

const SCHEMA_VERSION: u64 = 1;

pub fn chain_prompt(prior: &str, instruction: &str) -> String {
    format!("{prior}{CONTINUATION_SEPARATOR}{instruction}")
}

/// Most recent successful video plus the prompt that describes it so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationContext {
    pub operation: Operation,
    pub prompt: String,
    pub captured_at: String,
    /// 0 for a first generation, incremented on every continuation.
    pub generation: u32,
}

impl ContinuationContext {
    pub fn new(operation: Operation, prompt: impl Into<String>) -> StudioResult<Self> {
        ensure_resolvable(&operation)?;
        Ok(Self {
            operation,
            prompt: prompt.into(),
            captured_at: now_utc_iso(),
            generation: 0,
        })
    }

    pub fn extended(&self, operation: Operation, instruction: &str) -> StudioResult<Self> {
        ensure_resolvable(&operation)?;
        Ok(Self {
            operation,
            prompt: chain_prompt(&self.prompt, instruction),
            captured_at: now_utc_iso(),
            generation: self.generation.saturating_add(1),
        })
    }

    pub fn video_uri(&self) -> Option<&str> {
        self.operation.video_uri()
    }

    pub fn aspect_ratio(&self) -> Option<VideoAspectRatio> {
        self.operation.inherited_aspect_ratio()
    }
}

fn ensure_resolvable(operation: &Operation) -> StudioResult<()> {
    if operation.produced_video().is_none() {
        return Err(StudioError::no_result(
            "Video URI not found in operation response.",
        ));
    }
    Ok(())
}

/// Single-slot holder for the live [`ContinuationContext`].
///
/// Each update swaps the whole `Arc`, so readers see either the old or the
/// new context. With a backing path the slot is reloaded on construction and
/// the file is written before every swap. A failed write is logged and the
/// in-memory slot still moves on, mirroring how unreadable files are treated
/// on load.
#[derive(Debug, Default)]
pub struct ContinuationStore {
    slot: RwLock<Option<Arc<ContinuationContext>>>,
    path: Option<PathBuf>,
}

impl ContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded = match read_context(&path) {
            Ok(context) => context,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable continuation file");
                None
            }
        };
        Self {
            slot: RwLock::new(loaded.map(Arc::new)),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Option<Arc<ContinuationContext>> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn has_context(&self) -> bool {
        self.current().is_some()
    }

    /// Stores the result of a first generation, replacing any earlier context.
    pub fn capture(
        &self,
        operation: Operation,
        prompt: &str,
    ) -> StudioResult<Arc<ContinuationContext>> {
        let context = Arc::new(ContinuationContext::new(operation, prompt)?);
        self.swap(Some(context.clone()));
        Ok(context)
    }

    /// Replaces the live context with one that chains `instruction` onto
    /// `prior`, the snapshot the extension was submitted from.
    ///
    /// The snapshot wins: if another generation landed in the slot while the
    /// extension was running, it is replaced, and the new prompt still
    /// describes the video that was actually extended.
    pub fn extend_from(
        &self,
        prior: &ContinuationContext,
        operation: Operation,
        instruction: &str,
    ) -> StudioResult<Arc<ContinuationContext>> {
        let next = Arc::new(prior.extended(operation, instruction)?);
        self.swap(Some(next.clone()));
        Ok(next)
    }

    pub fn clear(&self) {
        self.swap(None);
    }

    fn swap(&self, next: Option<Arc<ContinuationContext>>) {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = self.persist(next.as_deref()) {
            if let Some(path) = self.path.as_deref() {
                tracing::warn!(path = %path.display(), error = %err, "continuation file not updated");
            }
        }
        *guard = next;
    }

    fn persist(&self, context: Option<&ContinuationContext>) -> StudioResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        match context {
            Some(context) => write_context(path, context),
            None => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }
}

fn read_context(path: &Path) -> anyhow::Result<Option<ContinuationContext>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let payload: Value = serde_json::from_str(&raw)?;
    let Some(context) = payload.get("context") else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(context.clone())?))
}

fn write_context(path: &Path, context: &ContinuationContext) -> StudioResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let payload = serde_json::json!({
        "schema_version": SCHEMA_VERSION,
        "context": context,
    });
    let text = serde_json::to_string_pretty(&payload)
        .map_err(|err| StudioError::Io(std::io::Error::other(err)))?;
    std::fs::write(path, text)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
