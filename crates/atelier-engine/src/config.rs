use std::env;
use std::time::Duration;

use crate::poller::PollPolicy;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    pub gemini_api_base: String,
    pub openrouter_api_base: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_referer: Option<String>,
    pub openrouter_title: Option<String>,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            openrouter_api_base: DEFAULT_OPENROUTER_API_BASE.to_string(),
            openrouter_api_key: None,
            openrouter_referer: None,
            openrouter_title: None,
            request_timeout: Duration::from_secs(90),
            poll: PollPolicy::default(),
        }
    }
}

impl StudioConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_wait_s = env_seconds("ATELIER_MAX_WAIT", 0.0, 0.0, 86_400.0);
        Self {
            gemini_api_base: api_base("GEMINI_API_BASE", DEFAULT_GEMINI_API_BASE),
            openrouter_api_base: api_base("OPENROUTER_API_BASE", DEFAULT_OPENROUTER_API_BASE),
            openrouter_api_key: non_empty_env("OPENROUTER_API_KEY"),
            openrouter_referer: non_empty_env("OPENROUTER_HTTP_REFERER"),
            openrouter_title: non_empty_env("OPENROUTER_X_TITLE"),
            request_timeout: Duration::from_secs_f64(env_seconds(
                "ATELIER_REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs_f64(),
                15.0,
                300.0,
            )),
            poll: PollPolicy {
                interval: Duration::from_secs_f64(env_seconds(
                    "ATELIER_POLL_INTERVAL",
                    defaults.poll.interval.as_secs_f64(),
                    0.5,
                    300.0,
                )),
                backoff: env_seconds("ATELIER_POLL_BACKOFF", defaults.poll.backoff, 1.0, 4.0),
                max_interval: defaults.poll.max_interval,
                max_wait: (max_wait_s > 0.0).then(|| Duration::from_secs_f64(max_wait_s)),
            },
        }
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_base(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_seconds(key: &str, default: f64, min: f64, max: f64) -> f64 {
    non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
