//! Agent profiles (personas) and the directory used to resolve them by id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Who an agent is: the persona sent as the system prompt plus optional
/// model/provider overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl AgentProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: system_prompt.into(),
            model: None,
            provider: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Persona that decomposes a request into ordered steps.
    pub fn planner() -> Self {
        Self::new(
            "planner",
            "Planner",
            "You are a planning agent. Break the user's request into a short, ordered list \
             of concrete steps. Respond only with a numbered list, one step per line. \
             Do not carry out the steps.",
        )
    }

    /// Persona that critiques a draft answer.
    pub fn critic() -> Self {
        Self::new(
            "critic",
            "Critic",
            "You review an assistant's answer against the user's original request. \
             If the answer fully satisfies the request, reply with `APPROVED:` followed by \
             a one-line reason. Otherwise reply with `NEEDS_REVISION:` followed by specific, \
             actionable feedback.",
        )
    }

    /// Persona that condenses dropped conversation history.
    pub fn summarizer() -> Self {
        Self::new(
            "summarizer",
            "Summarizer",
            "You condense conversation history. Produce a brief factual summary that keeps \
             decisions, names, file paths, numbers and open questions. No preamble.",
        )
    }
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self::new(
            "assistant",
            "Assistant",
            "You are a helpful assistant. Use the available tools when they help you answer \
             accurately, and say so plainly when you cannot complete a request.",
        )
    }
}

/// Resolves agent ids to profiles.
pub trait AgentDirectory: Send + Sync {
    fn profile(&self, agent_id: &str) -> Option<AgentProfile>;
}

/// A fixed, in-memory directory.
#[derive(Debug, Default, Clone)]
pub struct StaticAgentDirectory {
    profiles: HashMap<String, AgentProfile>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, profile: AgentProfile) -> Self {
        self.profiles.insert(profile.id.clone(), profile);
        self
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn profile(&self, agent_id: &str) -> Option<AgentProfile> {
        self.profiles.get(agent_id).cloned()
    }
}
