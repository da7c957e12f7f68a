//! Per-provider request limiter over a rolling one-minute window.
//!
//! One limiter is shared by every turn and every failover chain in the
//! process. Checking and recording a call happen under the same lock, so two
//! concurrent callers can never both take the last slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use aegis_core::error::ProviderError;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: HashMap<String, u32>,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow at most `requests_per_minute` calls to `provider`.
    pub fn with_limit(mut self, provider: impl Into<String>, requests_per_minute: u32) -> Self {
        self.limits.insert(provider.into(), requests_per_minute);
        self
    }

    /// Record a call to `provider`, or refuse it if the window is full.
    ///
    /// Providers without a configured limit are always admitted.
    pub fn try_acquire(&self, provider: &str) -> Result<(), ProviderError> {
        let Some(&limit) = self.limits.get(provider) else {
            return Ok(());
        };

        let now = Instant::now();
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| ProviderError::NotConfigured("rate limiter lock poisoned".into()))?;
        let window = calls.entry(provider.to_string()).or_default();

        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= WINDOW)
        {
            window.pop_front();
        }

        if window.len() >= limit as usize {
            let retry_after = window
                .front()
                .map(|oldest| WINDOW.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(WINDOW);
            return Err(ProviderError::RateLimited {
                provider: provider.to_string(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Calls recorded for `provider` in the current window.
    pub fn in_flight(&self, provider: &str) -> usize {
        let now = Instant::now();
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .get(provider)
                    .map(|w| w.iter().filter(|t| now.duration_since(**t) < WINDOW).count())
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}
