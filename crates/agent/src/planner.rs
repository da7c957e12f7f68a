//! Step-by-step plan generation for compound requests.
//!
//! Planning is optional. Any failure (provider error, timeout, a reply
//! with no usable steps) yields `None` and the caller runs the request
//! directly.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::agent::AgentProfile;
use aegis_core::provider::{Provider, ProviderRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Plans longer than this are cut off.
pub const MAX_PLAN_STEPS: usize = 10;

const PLANNING_TEMPERATURE: f32 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub source_prompt: String,
    pub steps: Vec<String>,
}

impl Plan {
    /// Extract steps from a planner reply.
    ///
    /// Numbered (`1.`, `2)`, `Step 3:`) and bulleted (`-`, `*`) lines are
    /// steps. A reply with no list markers falls back to one step per
    /// non-empty line, but only if that gives at least two steps.
    pub fn parse(source_prompt: &str, reply: &str) -> Option<Self> {
        let lines: Vec<&str> = reply
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let marked: Vec<String> = lines
            .iter()
            .filter_map(|l| strip_marker(l))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let steps = if !marked.is_empty() {
            marked
        } else if lines.len() >= 2 {
            lines.iter().map(|l| l.to_string()).collect()
        } else {
            return None;
        };

        Some(Self {
            source_prompt: source_prompt.to_string(),
            steps: steps.into_iter().take(MAX_PLAN_STEPS).collect(),
        })
    }

    /// Numbered list, one step per line.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `prompt` with the plan appended as execution guidance.
    pub fn augment(&self, prompt: &str) -> String {
        format!(
            "{prompt}\n\nWork through this plan in order:\n{}",
            self.render()
        )
    }
}

fn strip_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
    {
        return Some(rest.trim());
    }

    let body = line
        .strip_prefix("Step ")
        .or_else(|| line.strip_prefix("step "))
        .unwrap_or(line);
    let digits = body.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &body[digits..];
    rest.strip_prefix('.')
        .or_else(|| rest.strip_prefix(')'))
        .or_else(|| rest.strip_prefix(':'))
        .map(str::trim)
}

pub struct PlanGenerator {
    provider: Arc<dyn Provider>,
    model: String,
    profile: AgentProfile,
    timeout: Duration,
}

impl PlanGenerator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            profile: AgentProfile::planner(),
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

    /// Ask the planning persona for steps. `None` means "no plan".
    pub async fn generate(&self, prompt: &str) -> Option<Plan> {
        let request = ProviderRequest::persona(
            self.profile.model.clone().unwrap_or_else(|| self.model.clone()),
            &self.profile.system_prompt,
            format!("Create a step-by-step plan for this request:\n\n{prompt}"),
            PLANNING_TEMPERATURE,
        );

        let reply = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(Ok(response)) => response.message.content,
            Ok(Err(e)) => {
                warn!(error = %e, "Plan generation failed, executing directly");
                return None;
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Plan generation timed out, executing directly");
                return None;
            }
        };

        let plan = Plan::parse(prompt, &reply);
        match &plan {
            Some(plan) => debug!(steps = plan.steps.len(), "Plan generated"),
            None => warn!("Planner reply had no usable steps, executing directly"),
        }
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, make_text_response};
    use aegis_core::error::ProviderError;
    use aegis_core::provider::ProviderResponse;
    use async_trait::async_trait;

    #[test]
    fn parses_numbered_and_bulleted_steps() {
        let plan = Plan::parse(
            "p",
            "Here is the plan:\n1. Research the topic\n2) Draft the outline\nStep 3: Write it up\n- Proofread",
        )
        .unwrap();
        assert_eq!(
            plan.steps,
            vec!["Research the topic", "Draft the outline", "Write it up", "Proofread"]
        );
    }

    #[test]
    fn unmarked_lines_fall_back() {
        let plan = Plan::parse("p", "Gather data\nSummarize it").unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert!(Plan::parse("p", "Just do it.").is_none());
        assert!(Plan::parse("p", "   \n").is_none());
    }

    #[test]
    fn caps_step_count() {
        let reply: String = (1..=15).map(|i| format!("{i}. step {i}\n")).collect();
        let plan = Plan::parse("p", &reply).unwrap();
        assert_eq!(plan.steps.len(), MAX_PLAN_STEPS);
        assert_eq!(plan.steps[9], "step 10");
    }

    #[test]
    fn augment_appends_numbered_plan() {
        let plan = Plan {
            source_prompt: "Build it".into(),
            steps: vec!["Design".into(), "Implement".into()],
        };
        assert_eq!(
            plan.augment("Build it"),
            "Build it\n\nWork through this plan in order:\n1. Design\n2. Implement"
        );
    }

    #[tokio::test]
    async fn generate_uses_planner_persona() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            "1. Look things up\n2. Write the summary",
        )]));
        let plan = PlanGenerator::new(provider.clone(), "mock-model")
            .generate("Research X and summarize it")
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.source_prompt, "Research X and summarize it");

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, AgentProfile::planner().system_prompt);
        assert!(request.messages[1].content.contains("Research X and summarize it"));
    }

    #[tokio::test]
    async fn provider_failure_means_no_plan() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(
            ProviderError::ApiError {
                status_code: 500,
                message: "boom".into(),
            },
        )]));
        assert!(PlanGenerator::new(provider, "m").generate("anything").await.is_none());
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(make_text_response("1. too late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_means_no_plan() {
        let generator = PlanGenerator::new(Arc::new(SlowProvider), "m").with_timeout(Duration::from_secs(5));
        assert!(generator.generate("anything").await.is_none());
    }
}
