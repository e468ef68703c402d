//! Credential gate guarding the video paths.
//!
//! The host-side picker is modelled by [`CredentialProvider`] and passed into
//! [`CredentialGate::new`]. Environments without a real picker use
//! [`MemoryCredentialProvider`], which reports no credential until a selection
//! is simulated.

use std::env;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{StudioError, StudioResult};

pub const DEFAULT_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

pub trait CredentialProvider: Send + Sync {
    /// Whether the host already has a usable credential selected.
    fn has_selected_key(&self) -> anyhow::Result<bool>;

    /// Runs the host's selection flow. Returning `Ok` means the flow completed.
    fn open_select_key(&self) -> anyhow::Result<()>;

    /// Credential value attached to backend calls, read fresh on every call.
    fn active_key(&self) -> Option<String>;
}

/// Reads the credential from the process environment.
#[derive(Debug, Clone)]
pub struct EnvCredentialProvider {
    vars: Vec<String>,
}

impl Default for EnvCredentialProvider {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_VARS.iter().copied())
    }
}

impl EnvCredentialProvider {
    pub fn new<'a>(vars: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            vars: vars.into_iter().map(str::to_string).collect(),
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn has_selected_key(&self) -> anyhow::Result<bool> {
        Ok(self.active_key().is_some())
    }

    fn open_select_key(&self) -> anyhow::Result<()> {
        if self.active_key().is_some() {
            return Ok(());
        }
        anyhow::bail!("no API key found; set one of {}", self.vars.join(", "))
    }

    fn active_key(&self) -> Option<String> {
        self.vars.iter().find_map(|name| {
            env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }
}

#[derive(Debug, Default)]
struct MemorySelection {
    selected: bool,
    key: Option<String>,
}

/// In-process stand-in for a host credential picker.
#[derive(Debug, Default)]
pub struct MemoryCredentialProvider {
    selection: Mutex<MemorySelection>,
}

impl MemoryCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that already has `key` selected.
    pub fn with_key(key: impl Into<String>) -> Self {
        let provider = Self::new();
        provider.simulate_selection(Some(key.into()));
        provider
    }

    pub fn simulate_selection(&self, key: Option<String>) {
        let mut selection = lock_ignoring_poison(&self.selection);
        selection.selected = true;
        if key.is_some() {
            selection.key = key;
        }
    }
}

impl CredentialProvider for MemoryCredentialProvider {
    fn has_selected_key(&self) -> anyhow::Result<bool> {
        Ok(lock_ignoring_poison(&self.selection).selected)
    }

    fn open_select_key(&self) -> anyhow::Result<()> {
        tracing::info!("simulating successful API key selection");
        self.simulate_selection(None);
        Ok(())
    }

    fn active_key(&self) -> Option<String> {
        lock_ignoring_poison(&self.selection).key.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CredentialState {
    pub has_key: bool,
    pub is_checking: bool,
}

#[derive(Debug, Default)]
struct GateInner {
    state: CredentialState,
    checked: bool,
}

/// Process-wide view of whether a usable credential is selected.
pub struct CredentialGate {
    provider: Arc<dyn CredentialProvider>,
    inner: Mutex<GateInner>,
}

impl std::fmt::Debug for CredentialGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGate")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CredentialGate {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            provider,
            inner: Mutex::new(GateInner::default()),
        }
    }

    /// Gate backed by a fresh [`MemoryCredentialProvider`].
    pub fn with_fallback_provider() -> Self {
        Self::new(Arc::new(MemoryCredentialProvider::new()))
    }

    pub fn state(&self) -> CredentialState {
        lock_ignoring_poison(&self.inner).state
    }

    pub fn has_key(&self) -> bool {
        self.state().has_key
    }

    pub fn active_key(&self) -> Option<String> {
        self.provider.active_key()
    }

    /// Queries the provider. Never fails: provider errors count as "no key".
    pub fn check_credential(&self) -> bool {
        self.update(|inner| inner.state.is_checking = true);
        let has_key = match self.provider.has_selected_key() {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "error checking for API key");
                false
            }
        };
        self.update(|inner| {
            inner.state = CredentialState {
                has_key,
                is_checking: false,
            };
            inner.checked = true;
        });
        has_key
    }

    /// Runs the selection flow and trusts its completion without re-checking.
    pub fn select_credential(&self) -> bool {
        let has_key = match self.provider.open_select_key() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "error opening API key selection");
                false
            }
        };
        self.update(|inner| {
            inner.state.has_key = has_key;
            inner.checked = true;
        });
        has_key
    }

    pub fn reset_credential(&self) {
        self.update(|inner| {
            inner.state.has_key = false;
            inner.checked = true;
        });
        tracing::warn!("API key reset; selection required before the next video request");
    }

    /// Performs the first check lazily, then fails while no key is selected.
    pub fn require(&self) -> StudioResult<()> {
        let checked = lock_ignoring_poison(&self.inner).checked;
        let has_key = if checked {
            self.has_key()
        } else {
            self.check_credential()
        };
        if has_key {
            Ok(())
        } else {
            Err(StudioError::CredentialRequired)
        }
    }

    fn update(&self, apply: impl FnOnce(&mut GateInner)) {
        let mut inner = lock_ignoring_poison(&self.inner);
        apply(&mut inner);
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    impl CredentialProvider for FailingProvider {
        fn has_selected_key(&self) -> anyhow::Result<bool> {
            anyhow::bail!("host bridge unavailable")
        }

        fn open_select_key(&self) -> anyhow::Result<()> {
            anyhow::bail!("dialog dismissed")
        }

        fn active_key(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn fallback_provider_reports_no_key_until_selected() {
        let gate = CredentialGate::with_fallback_provider();
        assert!(!gate.check_credential());
        assert_eq!(
            gate.state(),
            CredentialState {
                has_key: false,
                is_checking: false
            }
        );

        assert!(gate.select_credential());
        assert!(gate.has_key());
        assert!(gate.check_credential());
        assert_eq!(gate.active_key(), None);
    }

    #[test]
    fn check_failure_is_treated_as_absent() {
        let gate = CredentialGate::new(Arc::new(FailingProvider));
        assert!(!gate.check_credential());
        assert!(!gate.state().is_checking);
        assert!(!gate.select_credential());
        assert!(!gate.has_key());
    }

    #[test]
    fn reset_clears_key_even_when_provider_still_has_one() {
        let gate = CredentialGate::new(Arc::new(MemoryCredentialProvider::with_key("k-1")));
        assert!(gate.require().is_ok());
        gate.reset_credential();
        assert!(!gate.has_key());
        assert!(matches!(gate.require(), Err(StudioError::CredentialRequired)));

        assert!(gate.select_credential());
        assert!(gate.require().is_ok());
        assert_eq!(gate.active_key().as_deref(), Some("k-1"));
    }

    #[test]
    fn require_checks_lazily_on_first_use() {
        let provider = Arc::new(MemoryCredentialProvider::new());
        let gate = CredentialGate::new(provider.clone());
        provider.simulate_selection(Some("late".to_string()));
        assert!(gate.require().is_ok());
    }

    #[test]
    fn env_provider_reads_first_non_empty_var() {
        let provider = EnvCredentialProvider::new([
            "ATELIER_TEST_KEY_UNSET_0",
            "ATELIER_TEST_KEY_SET_1",
        ]);
        env::set_var("ATELIER_TEST_KEY_SET_1", "  from-env  ");
        assert_eq!(provider.active_key().as_deref(), Some("from-env"));
        assert!(provider.open_select_key().is_ok());
        env::remove_var("ATELIER_TEST_KEY_SET_1");
        assert!(provider.open_select_key().is_err());
        assert!(!provider.has_selected_key().unwrap_or(true));
    }
}
