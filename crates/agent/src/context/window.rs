//! Builds the list of turns sent to the provider for one request.
//!
//! Truncation is a greedy newest-first suffix: walk back from the newest
//! turn and stop at the first one that does not fit. It never skips a turn
//! to squeeze in an older one, so the kept turns are always contiguous.

use aegis_config::ContextSettings;
use aegis_core::message::{Message, Role};
use aegis_core::token::{clip_to_tokens, estimate_tokens};
use tracing::debug;

use super::budget::{Budget, allocate_budget};
use super::compress::compress_tool_results;

/// Prefix of the system turn that carries the running conversation summary.
pub const SUMMARY_MARKER: &str = "Conversation summary: ";

const MEMORIES_HEADER: &str = "Relevant memories:\n";

/// Result of [`ContextWindowManager::build_context_window`].
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Turns to send after the system prompt, oldest first
    pub messages: Vec<Message>,
    /// Oldest turns that did not fit, in original order
    pub dropped: Vec<Message>,
    /// Quotas the window was built with
    pub budget: Budget,
    /// Estimated cost of the system prompt plus `messages`
    pub total_tokens: usize,
}

impl ContextWindow {
    pub fn has_dropped(&self) -> bool {
        !self.dropped.is_empty()
    }
}

/// Sum of the estimated cost of `system_prompt` and every turn's content.
pub fn total_tokens_used(system_prompt: &str, messages: &[Message]) -> usize {
    estimate_tokens(system_prompt)
        + messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<usize>()
}

#[derive(Debug, Clone, Default)]
pub struct ContextWindowManager {
    settings: ContextSettings,
}

impl ContextWindowManager {
    pub fn new(settings: ContextSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Split `total_tokens` by the configured ratios.
    pub fn allocate_budget(&self, total_tokens: usize) -> Budget {
        allocate_budget(total_tokens, &self.settings.ratios)
    }

    /// Longest newest-first suffix of `messages` that fits in `budget_tokens`
    /// together with `system_prompt`. Original order is kept.
    pub fn truncate_messages(
        &self,
        system_prompt: &str,
        messages: &[Message],
        budget_tokens: usize,
    ) -> Vec<Message> {
        let start = suffix_start(system_prompt, messages, budget_tokens);
        messages[start..].to_vec()
    }

    /// Replace bulky tool output with short summaries.
    pub fn compress_tool_results(&self, messages: &[Message]) -> Vec<Message> {
        compress_tool_results(messages)
    }

    /// Fold `memories` and `summary` into system turns and append the
    /// newest turns that still fit.
    ///
    /// The system prompt itself is never trimmed. As long as it fits in
    /// `total_tokens`, the system prompt plus the returned turns fit too.
    pub fn build_context_window(
        &self,
        system_prompt: &str,
        messages: &[Message],
        total_tokens: usize,
        summary: Option<&str>,
        memories: &[String],
    ) -> ContextWindow {
        let budget = self.allocate_budget(total_tokens);
        let mut remaining = total_tokens.saturating_sub(estimate_tokens(system_prompt));
        let mut folded = Vec::new();

        if !memories.is_empty() {
            let listed: Vec<String> = memories.iter().map(|m| format!("- {m}")).collect();
            let text = format!("{MEMORIES_HEADER}{}", listed.join("\n"));
            let clipped = clip_to_tokens(&text, budget.memories);
            if clipped.len() > MEMORIES_HEADER.len() {
                push_if_fits(&mut folded, &mut remaining, clipped);
            }
        }

        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            let text = format!("{SUMMARY_MARKER}{summary}");
            let clipped = clip_to_tokens(&text, budget.summary);
            if clipped.len() > SUMMARY_MARKER.len() {
                push_if_fits(&mut folded, &mut remaining, clipped);
            }
        }

        // The newest round of tool results is what the model is about to
        // react to, so it goes out verbatim.
        let candidates = if self.settings.compress_tool_results {
            let fresh = latest_tool_round_start(messages);
            let mut compressed = self.compress_tool_results(&messages[..fresh]);
            compressed.extend_from_slice(&messages[fresh..]);
            compressed
        } else {
            messages.to_vec()
        };

        let folded_cost = total_tokens_used("", &folded);
        let start = suffix_start(
            system_prompt,
            &candidates,
            total_tokens.saturating_sub(folded_cost),
        );

        let mut window = folded;
        window.extend_from_slice(&candidates[start..]);
        let total = total_tokens_used(system_prompt, &window);

        if start > 0 {
            debug!(
                dropped = start,
                kept = candidates.len() - start,
                total_tokens = total,
                budget = total_tokens,
                "Dropped oldest turns to fit the context window"
            );
        }

        ContextWindow {
            messages: window,
            dropped: messages[..start].to_vec(),
            budget,
            total_tokens: total,
        }
    }
}

fn push_if_fits(folded: &mut Vec<Message>, remaining: &mut usize, text: &str) {
    let cost = estimate_tokens(text);
    if cost <= *remaining {
        *remaining -= cost;
        folded.push(Message::system(text));
    }
}

/// Index where the trailing run of tool results starts (`messages.len()`
/// when the newest turn is not a tool result).
fn latest_tool_round_start(messages: &[Message]) -> usize {
    messages
        .iter()
        .rposition(|m| m.role != Role::Tool)
        .map_or(0, |idx| idx + 1)
}

/// Index of the first turn of the kept suffix (`messages.len()` when none fit).
fn suffix_start(system_prompt: &str, messages: &[Message], budget_tokens: usize) -> usize {
    let available = budget_tokens.saturating_sub(estimate_tokens(system_prompt));
    let mut used = 0usize;
    let mut start = messages.len();

    for (idx, message) in messages.iter().enumerate().rev() {
        let cost = estimate_tokens(&message.content);
        if used + cost > available {
            break;
        }
        used += cost;
        start = idx;
    }

    start
}
