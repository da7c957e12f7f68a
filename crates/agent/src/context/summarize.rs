//! Summarization of history that fell out of the context window.
//!
//! The summarizer persona folds dropped turns into the running conversation
//! summary. If the provider fails or times out, an extractive summary (the
//! first line of each dropped turn) is used instead, so summarization never
//! fails a turn.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::agent::AgentProfile;
use aegis_core::message::{Message, Role};
use aegis_core::provider::{Provider, ProviderRequest};
use aegis_core::token::{clip_to_tokens, estimate_tokens};
use tracing::{debug, warn};

const SUMMARY_TEMPERATURE: f32 = 0.2;
const LINE_CHARS: usize = 160;

pub struct DroppedSummarizer {
    provider: Arc<dyn Provider>,
    model: String,
    profile: AgentProfile,
    timeout: Duration,
}

impl DroppedSummarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            profile: AgentProfile::summarizer(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fold `dropped` into `previous`, keeping the result within `max_tokens`.
    pub async fn summarize(
        &self,
        previous: Option<&str>,
        dropped: &[Message],
        max_tokens: usize,
    ) -> String {
        if dropped.is_empty() {
            return clip_to_tokens(previous.unwrap_or_default(), max_tokens).to_string();
        }

        let mut prompt = String::new();
        if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
            prompt.push_str("Existing summary:\n");
            prompt.push_str(previous);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Turns to fold into the summary:\n");
        for turn in dropped {
            prompt.push_str(&format!("[{}] {}\n", role_label(turn.role), turn.content));
        }
        prompt.push_str(&format!(
            "\nWrite the updated summary in at most {} words.",
            (max_tokens * 3 / 4).max(1)
        ));

        let mut request = ProviderRequest::persona(
            &self.model,
            &self.profile.system_prompt,
            prompt,
            SUMMARY_TEMPERATURE,
        );
        request.max_tokens = Some(max_tokens.clamp(1, u32::MAX as usize) as u32);

        match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) if !response.message.content.trim().is_empty() => {
                debug!(
                    dropped = dropped.len(),
                    tokens = estimate_tokens(&response.message.content),
                    "Summarized dropped history"
                );
                clip_to_tokens(response.message.content.trim(), max_tokens).to_string()
            }
            Ok(Ok(_)) => {
                warn!("Summarizer returned an empty summary, using extractive fallback");
                extractive_summary(previous, dropped, max_tokens)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Summarizer failed, using extractive fallback");
                extractive_summary(previous, dropped, max_tokens)
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Summarizer timed out, using extractive fallback");
                extractive_summary(previous, dropped, max_tokens)
            }
        }
    }
}

/// Previous summary followed by the first line of each dropped turn.
pub fn extractive_summary(previous: Option<&str>, dropped: &[Message], max_tokens: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(previous) = previous.filter(|p| !p.trim().is_empty()) {
        lines.push(previous.trim().to_string());
    }
    for turn in dropped {
        let first = turn.content.lines().find(|l| !l.trim().is_empty());
        if let Some(first) = first {
            let first = first.trim();
            let clipped = match first.char_indices().nth(LINE_CHARS) {
                Some((idx, _)) => &first[..idx],
                None => first,
            };
            lines.push(format!("{}: {}", role_label(turn.role), clipped));
        }
    }
    clip_to_tokens(&lines.join("\n"), max_tokens).to_string()
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}
