//! Fixed-window rate limiting for expensive operations (uploads, bulk
//! download preparation, API-key traffic).

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::CONFIG;

/// What a limiter does when its backend cannot be reached.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through. For cheap reads where availability wins.
    Open,
    /// Reject the request. For quota-relevant writes such as uploads.
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("rate limit backend unavailable: {source}")]
pub struct BackendUnavailable {
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for `{identifier}`: {count} requests in the current window (max {max})")]
    Limited {
        identifier: String,
        count: u64,
        max: u64,
    },
    #[error("rate limit check failed and policy is fail-closed")]
    Unavailable(#[source] BackendUnavailable),
}

/// Counter storage behind the limiter. Implementations count one hit for
/// `identifier` in the window containing now and return the new total.
#[async_trait]
pub trait RateLimitBackend: std::fmt::Debug + Send + Sync + 'static {
    async fn increment(
        &self,
        identifier: &str,
        window: Duration,
    ) -> Result<u64, BackendUnavailable>;
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
    max_requests: u64,
    window: Duration,
    failure_policy: FailurePolicy,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        backend: Arc<dyn RateLimitBackend>,
        max_requests: u64,
        window: Duration,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            backend,
            max_requests,
            window,
            failure_policy,
        }
    }

    /// Limiter configured from [`CONFIG`].
    #[must_use]
    pub fn from_config(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self::new(
            backend,
            CONFIG.rate_limit_max_requests,
            CONFIG.rate_limit_window(),
            CONFIG.rate_limit_failure_policy,
        )
    }

    /// Records one hit and returns an error if the identifier is over its
    /// budget for the current window.
    pub async fn check(&self, identifier: &str) -> Result<(), RateLimitError> {
        match self.backend.increment(identifier, self.window).await {
            Ok(count) if count > self.max_requests => Err(RateLimitError::Limited {
                identifier: identifier.to_string(),
                count,
                max: self.max_requests,
            }),
            Ok(_) => Ok(()),
            Err(e) => match self.failure_policy {
                FailurePolicy::Open => {
                    tracing::warn!(
                        identifier,
                        error = %e,
                        "Rate limit backend unavailable, failing open"
                    );
                    Ok(())
                }
                FailurePolicy::Closed => Err(RateLimitError::Unavailable(e)),
            },
        }
    }
}

/// In-process fixed-window counters.
#[derive(Debug, Default)]
pub struct MemoryRateLimitBackend {
    windows: Mutex<HashMap<String, (u64, Instant)>>,
}

impl MemoryRateLimitBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitBackend for MemoryRateLimitBackend {
    async fn increment(
        &self,
        identifier: &str,
        window: Duration,
    ) -> Result<u64, BackendUnavailable> {
        let mut windows = self.windows.lock().expect("rate limit lock poisoned");
        let now = Instant::now();
        let entry = windows
            .entry(identifier.to_string())
            .or_insert((0, now + window));
        if now >= entry.1 {
            *entry = (0, now + window);
        }
        entry.0 += 1;
        Ok(entry.0)
    }
}
