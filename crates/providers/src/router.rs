//! Provider router: holds the registered backends and builds failover chains.
//!
//! Backends are registered by name. `failover(primary)` returns a provider that
//! tries `primary` first and then every provider in the configured fallback
//! chain, all sharing one rate limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_config::EngineConfig;
use aegis_core::error::ProviderError;
use aegis_core::provider::Provider;

use crate::fallback::FallbackProvider;
use crate::rate_limit::RateLimiter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
    fallback_chain: Vec<String>,
    timeouts: HashMap<String, Duration>,
    limiter: Arc<RateLimiter>,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
            fallback_chain: Vec::new(),
            timeouts: HashMap::new(),
            limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// Router with the fallback chain, timeouts and rate limits from `config`.
    /// Backends still have to be registered.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut limiter = RateLimiter::new();
        let mut timeouts = HashMap::new();
        for (name, provider) in &config.providers {
            if let Some(rpm) = provider.requests_per_minute {
                limiter = limiter.with_limit(name.clone(), rpm);
            }
            timeouts.insert(name.clone(), Duration::from_secs(provider.timeout_secs));
        }

        Self {
            providers: HashMap::new(),
            default_provider: config.default_provider.clone(),
            fallback_chain: config.fallback_chain.clone(),
            timeouts,
            limiter: Arc::new(limiter),
        }
    }

    pub fn with_fallback_chain(mut self, chain: Vec<String>) -> Self {
        self.fallback_chain = chain;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// A provider that tries `primary` then the fallback chain, in order.
    ///
    /// Unregistered names are skipped with a warning; each provider appears
    /// at most once.
    pub fn failover(&self, primary: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let mut fallback = FallbackProvider::new(format!("failover:{primary}"))
            .with_rate_limiter(self.limiter.clone());
        let mut seen = Vec::new();

        for name in std::iter::once(primary).chain(self.fallback_chain.iter().map(String::as_str)) {
            if seen.contains(&name) {
                continue;
            }
            seen.push(name);
            match self.providers.get(name) {
                Some(provider) => {
                    let timeout = self.timeouts.get(name).copied().unwrap_or(DEFAULT_TIMEOUT);
                    fallback = fallback.add(provider.clone(), timeout);
                }
                None => tracing::warn!(provider = %name, "Provider not registered, left out of failover chain"),
            }
        }

        if fallback.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no registered provider among '{primary}' and the fallback chain"
            )));
        }
        Ok(Arc::new(fallback))
    }

    /// Failover chain headed by the default provider.
    pub fn default_failover(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.failover(&self.default_provider)
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}
