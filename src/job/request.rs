//! What a caller asks for: generation parameters and the retry policy they
//! may tune per job.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::outline::MediaType;

/// Shape of the delay curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// Per-node retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Upper bound on generator attempts per node, including the first.
    pub max_retries: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    /// Wall-clock limit for a single generator attempt, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            backoff: Backoff::Exponential,
            timeout_ms: 120_000,
        }
    }
}

impl RetryPolicy {
    /// Number of attempts a node gets; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Fixed: `base`. Exponential: `base * 2^(attempt - 1)`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                self.base_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Apply per-job overrides on top of this policy.
    ///
    /// A zero `maxRetries` or `timeoutMs` would leave a node no usable
    /// attempt, so those values are ignored and the configured one kept.
    pub fn with_overrides(&self, overrides: Option<&RetryOverrides>) -> Self {
        let mut policy = self.clone();
        if let Some(o) = overrides {
            if let Some(v) = o.max_retries.filter(|v| *v > 0) {
                policy.max_retries = v;
            }
            if let Some(v) = o.base_delay_ms {
                policy.base_delay_ms = v;
            }
            if let Some(v) = o.backoff {
                policy.backoff = v;
            }
            if let Some(v) = o.timeout_ms.filter(|v| *v > 0) {
                policy.timeout_ms = v;
            }
        }
        policy
    }
}

/// Retry fields a request may override; unset fields keep the configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOverrides {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff: Option<Backoff>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Generation parameters submitted alongside the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    /// Media kinds to produce; media nodes of other kinds are not generated.
    #[serde(default)]
    pub media_types: Vec<MediaType>,
    #[serde(default = "default_include_assessments")]
    pub include_assessments: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOverrides>,
}

fn default_include_assessments() -> bool {
    true
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            grade_level: None,
            media_types: Vec::new(),
            include_assessments: default_include_assessments(),
            retry: None,
        }
    }
}

impl GenerationRequest {
    pub fn wants_media(&self, media_type: MediaType) -> bool {
        self.media_types.contains(&media_type)
    }
}
