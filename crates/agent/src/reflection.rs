//! Self-critique of a draft answer.
//!
//! The critic persona replies with `APPROVED: <reason>` or
//! `NEEDS_REVISION: <feedback>`. Anything else, and any provider failure or
//! timeout, counts as approved so a flaky critic can never block an answer.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::agent::AgentProfile;
use aegis_core::provider::{Provider, ProviderRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const APPROVED: &str = "APPROVED";
const NEEDS_REVISION: &str = "NEEDS_REVISION";
const CRITIQUE_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionVerdict {
    pub approved: bool,
    pub feedback: String,
}

impl ReflectionVerdict {
    pub fn approved(feedback: impl Into<String>) -> Self {
        Self {
            approved: true,
            feedback: feedback.into(),
        }
    }

    pub fn needs_revision(feedback: impl Into<String>) -> Self {
        Self {
            approved: false,
            feedback: feedback.into(),
        }
    }

    /// Read the leading marker of a critic reply (case-insensitive).
    pub fn parse(reply: &str) -> Self {
        let trimmed = reply.trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '#');

        if let Some(rest) = strip_marker(trimmed, NEEDS_REVISION) {
            return Self::needs_revision(rest);
        }
        if let Some(rest) = strip_marker(trimmed, APPROVED) {
            return Self::approved(rest);
        }

        debug!("Critic reply had no verdict marker, treating as approved");
        Self::approved(reply.trim())
    }
}

fn strip_marker<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let head = text.get(..marker.len())?;
    if !head.eq_ignore_ascii_case(marker) {
        return None;
    }
    let rest = &text[marker.len()..];
    Some(
        rest.trim_start_matches(|c: char| c == ':' || c == '*' || c == '-' || c.is_whitespace())
            .trim_end(),
    )
}

pub struct ReflectionGate {
    provider: Arc<dyn Provider>,
    model: String,
    profile: AgentProfile,
    timeout: Duration,
}

impl ReflectionGate {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            profile: AgentProfile::critic(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = profile;
        self
    }

    pub async fn critique(&self, response: &str, original_prompt: &str) -> ReflectionVerdict {
        let request = ProviderRequest::persona(
            self.profile.model.clone().unwrap_or_else(|| self.model.clone()),
            &self.profile.system_prompt,
            format!(
                "Original request:\n{original_prompt}\n\nAnswer to review:\n{response}\n\n\
                 Reply with APPROVED: or NEEDS_REVISION: followed by your reasoning."
            ),
            CRITIQUE_TEMPERATURE,
        );

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(reply)) => {
                let verdict = ReflectionVerdict::parse(&reply.message.content);
                debug!(approved = verdict.approved, "Critique received");
                verdict
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Critique failed, accepting the answer");
                ReflectionVerdict::approved("critique unavailable")
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Critique timed out, accepting the answer");
                ReflectionVerdict::approved("critique timed out")
            }
        }
    }
}
