//! The classify → plan → execute → reflect loop.
//!
//! ```text
//! planning-check ─▶ [planning] ─▶ executing ─▶ [reflecting] ─▶ done
//!                                     ▲              │
//!                                     └── revise ────┘  (bounded)
//! ```
//!
//! Planning only happens for compound requests, and reflection only when a
//! plan was used. Both are optional steps: a failure in either one is
//! logged and skipped. Failures of the generation itself propagate.
//!
//! The conversation keeps the request as the user wrote it. When the answer
//! may be revised, the request is stored up front and the settled attempt's
//! turns are written once the verdict is in, so superseded drafts and
//! revision prompts never reach the store.

use std::sync::Arc;
use std::time::Duration;

use aegis_config::{AgentSettings, ContextSettings, EngineConfig};
use aegis_core::agent::AgentProfile;
use aegis_core::error::Result;
use aegis_core::event::{DomainEvent, EventBus};
use aegis_core::message::{ConversationId, Message};
use aegis_core::permission::{AllowAll, PermissionChecker};
use aegis_core::provider::Provider;
use aegis_core::store::MessageStore;
use aegis_core::tool::{Tool, ToolRegistry};
use aegis_security::{AuditLogger, PolicyPermissionChecker};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::classifier::ComplexityClassifier;
use crate::context::ContextWindowManager;
use crate::orchestrator::{ChunkCallback, GenerationOrchestrator, TurnInput, TurnOutput};
use crate::planner::{Plan, PlanGenerator};
use crate::reflection::ReflectionGate;
use crate::stream::StreamSession;
use crate::tool_invoker::ToolInvoker;

/// Invoked with `(phase, detail)` at every phase transition.
pub type StepListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

pub const PHASE_PLANNING_CHECK: &str = "planning-check";
pub const PHASE_PLANNING: &str = "planning";
pub const PHASE_EXECUTING: &str = "executing";
pub const PHASE_REFLECTING: &str = "reflecting";

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub response: String,
    pub used_planning: bool,
    pub plan: Option<Plan>,
    /// Revision attempts after the first answer
    pub retries: u32,
    pub cancelled: bool,
}

/// The core agent loop that composes classification, planning, generation
/// and reflection for one user request.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    profile: AgentProfile,
    settings: AgentSettings,
    context: ContextSettings,
    window_tokens: Option<usize>,
    permissions: Arc<dyn PermissionChecker>,
    audit: Option<Arc<AuditLogger>>,
    store: Option<Arc<dyn MessageStore>>,
    memories: Vec<String>,
    classifier: ComplexityClassifier,
    listeners: Vec<StepListener>,
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        temperature: f32,
        tools: Arc<ToolRegistry>,
        profile: AgentProfile,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens: None,
            tools,
            profile,
            settings: AgentSettings::default(),
            context: ContextSettings::default(),
            window_tokens: None,
            permissions: Arc::new(AllowAll),
            audit: None,
            store: None,
            memories: Vec::new(),
            classifier: ComplexityClassifier::new(),
            listeners: Vec::new(),
            event_bus,
        }
    }

    /// Build a loop with every setting taken from `config`.
    pub fn from_config(
        config: &EngineConfig,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self::new(
            provider,
            &config.default_model,
            config.default_temperature,
            tools,
            AgentProfile::default(),
            event_bus,
        )
        .with_max_tokens(config.default_max_tokens)
        .with_settings(config.agent.clone())
        .with_context_settings(config.context.clone())
        .with_window_tokens(config.window_for(&config.default_model))
        .with_permissions(Arc::new(PolicyPermissionChecker::new(config.autonomy.clone())))
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_context_settings(mut self, context: ContextSettings) -> Self {
        self.context = context;
        self
    }

    pub fn with_window_tokens(mut self, tokens: usize) -> Self {
        self.window_tokens = Some(tokens);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = provider;
        self
    }

    /// Add a tool for this loop only, replacing any tool with the same
    /// name. The shared registry is left untouched.
    pub fn with_tool(mut self, tool: Box<dyn Tool>) -> Self {
        let mut tools = (*self.tools).clone();
        tools.register(tool);
        self.tools = Arc::new(tools);
        self
    }

    /// Memory snippets folded into every request, subject to the memories quota.
    pub fn with_memories(mut self, memories: Vec<String>) -> Self {
        self.memories = memories;
        self
    }

    /// Register a step listener. Listeners run synchronously, in
    /// registration order.
    pub fn on_step<F>(mut self, listener: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// The same loop running as another agent. The profile's model, when
    /// set, replaces the loop's model.
    pub fn for_agent(&self, profile: AgentProfile) -> Self {
        let mut agent = self.clone();
        if let Some(model) = &profile.model {
            agent.model = model.clone();
        }
        agent.profile = profile;
        agent
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub async fn execute(
        &self,
        prompt: &str,
        conversation_id: &ConversationId,
        with_storage: bool,
    ) -> Result<ExecutionResult> {
        self.run(prompt, conversation_id, with_storage, None).await
    }

    /// Like [`execute`](Self::execute), but the first attempt streams into
    /// `session`. Revisions run without streaming. A cancelled stream ends
    /// the run at once with the partial text.
    pub async fn execute_stream(
        &self,
        prompt: &str,
        conversation_id: &ConversationId,
        with_storage: bool,
        session: &mut StreamSession,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<ExecutionResult> {
        self.run(prompt, conversation_id, with_storage, Some((session, on_chunk)))
            .await
    }

    async fn run(
        &self,
        prompt: &str,
        conversation_id: &ConversationId,
        with_storage: bool,
        mut stream: Option<(&mut StreamSession, &mut ChunkCallback<'_>)>,
    ) -> Result<ExecutionResult> {
        info!(
            conversation_id = %conversation_id,
            agent = %self.profile.id,
            with_storage,
            "Executing request"
        );

        self.step(conversation_id, PHASE_PLANNING_CHECK, "assessing request complexity");
        let plan = self.plan(prompt, conversation_id).await;
        let base_prompt = match &plan {
            Some(plan) => plan.augment(prompt),
            None => prompt.to_string(),
        };

        let (history, summary) = self.load(conversation_id, with_storage).await?;
        let orchestrator = self.orchestrator();
        let reflect = self.settings.reflection_enabled && plan.is_some();
        let deferred = with_storage && reflect;
        if deferred && let Some(store) = &self.store {
            store.append(conversation_id, Message::user(prompt)).await?;
        }

        let mut retries = 0;
        let mut attempt_prompt = base_prompt.clone();
        loop {
            self.step(
                conversation_id,
                PHASE_EXECUTING,
                &format!("attempt {}", retries + 1),
            );

            let mut input = TurnInput::new(
                conversation_id.clone(),
                &self.profile.system_prompt,
                &attempt_prompt,
            );
            input.history = history.clone();
            input.summary = summary.clone();
            input.memories = self.memories.clone();
            input.recorded_prompt = Some(prompt.to_string());
            input.persist = with_storage && !deferred;

            let output: TurnOutput = match stream.take() {
                Some((session, on_chunk)) => orchestrator.run_stream(input, session, on_chunk).await?,
                None => orchestrator.run(input).await?,
            };

            let settled = if output.cancelled {
                info!(conversation_id = %conversation_id, "Stream cancelled, skipping reflection");
                true
            } else if !reflect {
                true
            } else {
                self.step(conversation_id, PHASE_REFLECTING, "critiquing answer");
                let verdict = self.reflection_gate().critique(&output.response, prompt).await;
                if verdict.approved {
                    debug!(retries, "Answer approved");
                    true
                } else if retries >= self.settings.max_reflection_retries {
                    info!(retries, "Retry cap reached, returning last answer");
                    true
                } else {
                    retries += 1;
                    debug!(retries, feedback = %verdict.feedback, "Revision requested");
                    attempt_prompt = format!(
                        "{base_prompt}\n\nYour previous answer:\n{}\n\nReviewer feedback:\n{}\n\n\
                         Revise your answer to address the feedback.",
                        output.response, verdict.feedback
                    );
                    false
                }
            };

            if settled {
                if deferred {
                    self.commit(conversation_id, &output).await?;
                }
                return Ok(self.finish(output.response, plan, retries, output.cancelled));
            }
        }
    }

    /// Store the settled attempt's turns (its prompt was stored up front)
    /// and any summary it refreshed.
    async fn commit(&self, conversation_id: &ConversationId, output: &TurnOutput) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for turn in output.turns.iter().skip(1) {
            store.append(conversation_id, turn.clone()).await?;
        }
        if let Some(summary) = &output.summary {
            store.set_summary(conversation_id, summary.clone()).await?;
        }
        Ok(())
    }

    async fn plan(&self, prompt: &str, conversation_id: &ConversationId) -> Option<Plan> {
        if !self.settings.planning_enabled || !self.classifier.requires_planning(prompt) {
            return None;
        }
        self.step(conversation_id, PHASE_PLANNING, "generating plan");
        PlanGenerator::new(self.provider.clone(), &self.model)
            .with_timeout(Duration::from_secs(self.settings.planning_timeout_secs))
            .generate(prompt)
            .await
    }

    fn reflection_gate(&self) -> ReflectionGate {
        ReflectionGate::new(self.provider.clone(), &self.model)
            .with_timeout(Duration::from_secs(self.settings.reflection_timeout_secs))
    }

    fn orchestrator(&self) -> GenerationOrchestrator {
        let mut invoker = ToolInvoker::new(self.tools.clone(), self.event_bus.clone())
            .with_permissions(self.permissions.clone())
            .with_actor(&self.profile.id);
        if let Some(audit) = &self.audit {
            invoker = invoker.with_audit(audit.clone());
        }

        let mut orchestrator = GenerationOrchestrator::new(
            self.provider.clone(),
            &self.model,
            invoker,
            self.event_bus.clone(),
        )
        .with_temperature(self.temperature)
        .with_context(ContextWindowManager::new(self.context.clone()))
        .with_max_iterations(self.settings.max_tool_iterations);
        if let Some(max) = self.max_tokens {
            orchestrator = orchestrator.with_max_tokens(max);
        }
        if let Some(tokens) = self.window_tokens {
            orchestrator = orchestrator.with_window_tokens(tokens);
        }
        if let Some(store) = &self.store {
            orchestrator = orchestrator.with_store(store.clone());
        }
        orchestrator
    }

    async fn load(
        &self,
        conversation_id: &ConversationId,
        with_storage: bool,
    ) -> Result<(Vec<Message>, Option<String>)> {
        match &self.store {
            Some(store) if with_storage => {
                let history = store.history(conversation_id).await?;
                let summary = store.summary(conversation_id).await?;
                Ok((history, summary))
            }
            _ => Ok((Vec::new(), None)),
        }
    }

    fn step(&self, conversation_id: &ConversationId, phase: &str, detail: &str) {
        debug!(conversation_id = %conversation_id, phase, detail, "Step");
        for listener in &self.listeners {
            listener(phase, detail);
        }
        self.event_bus.publish(DomainEvent::StepChanged {
            conversation_id: conversation_id.to_string(),
            phase: phase.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn finish(&self, response: String, plan: Option<Plan>, retries: u32, cancelled: bool) -> ExecutionResult {
        ExecutionResult {
            response,
            used_planning: plan.is_some(),
            plan,
            retries,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        EchoTool, SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response,
    };
    use aegis_core::error::{Error, ProviderError};
    use aegis_core::message::Role;
    use aegis_store::InMemoryStore;
    use std::sync::Mutex;

    const COMPLEX: &str = "Research the latest X and create a detailed summary document with examples";

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        Arc::new(registry)
    }

    fn agent(provider: Arc<SequentialMockProvider>) -> AgentLoop {
        AgentLoop::new(
            provider,
            "mock-model",
            0.7,
            tools(),
            AgentProfile::default(),
            Arc::new(EventBus::default()),
        )
    }

    fn recorder(agent: AgentLoop) -> (AgentLoop, Arc<Mutex<Vec<String>>>) {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = phases.clone();
        let agent = agent.on_step(move |phase, _| sink.lock().unwrap().push(phase.to_string()));
        (agent, phases)
    }

    #[tokio::test]
    async fn simple_request_skips_planning_and_reflection() {
        let provider = Arc::new(SequentialMockProvider::single_text("Hi there!"));
        let (agent, phases) = recorder(agent(provider.clone()));

        let result = agent
            .execute("Hello", &ConversationId::from("c1"), false)
            .await
            .unwrap();

        assert_eq!(result.response, "Hi there!");
        assert!(!result.used_planning);
        assert!(result.plan.is_none());
        assert_eq!(result.retries, 0);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(*phases.lock().unwrap(), vec!["planning-check", "executing"]);
    }

    #[tokio::test]
    async fn compound_request_is_planned_and_reviewed() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. Look up X\n2. Write the summary"),
            make_text_response("Draft"),
            make_text_response("APPROVED: complete"),
        ]));
        let (agent, phases) = recorder(agent(provider.clone()));

        let result = agent.execute(COMPLEX, &ConversationId::from("c1"), false).await.unwrap();

        assert!(result.used_planning);
        assert_eq!(result.plan.as_ref().unwrap().steps.len(), 2);
        assert_eq!(result.response, "Draft");
        assert_eq!(result.retries, 0);
        assert_eq!(
            *phases.lock().unwrap(),
            vec!["planning-check", "planning", "executing", "reflecting"]
        );

        let execute_request = &provider.requests()[1];
        let user = execute_request.messages.last().unwrap();
        assert!(user.content.starts_with(COMPLEX));
        assert!(user.content.contains("1. Look up X"));
    }

    #[tokio::test]
    async fn revision_feeds_back_feedback() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. a\n2. b"),
            make_text_response("Draft"),
            make_text_response("NEEDS_REVISION: add examples"),
            make_text_response("Better"),
            make_text_response("APPROVED: good"),
        ]));
        let result = agent(provider.clone())
            .execute(COMPLEX, &ConversationId::from("c1"), false)
            .await
            .unwrap();

        assert_eq!(result.response, "Better");
        assert_eq!(result.retries, 1);

        let revision = provider.requests()[3].messages.last().unwrap().content.clone();
        assert!(revision.contains("add examples"));
        assert!(revision.contains("Draft"));
    }

    #[tokio::test]
    async fn retries_stop_at_the_cap() {
        let mut script = vec![make_text_response("1. a\n2. b")];
        for i in 0..3 {
            script.push(make_text_response(&format!("answer {i}")));
            script.push(make_text_response("NEEDS_REVISION: still not right"));
        }
        let provider = Arc::new(SequentialMockProvider::new(script));

        let result = agent(provider.clone())
            .execute(COMPLEX, &ConversationId::from("c1"), false)
            .await
            .unwrap();

        assert_eq!(result.retries, 2);
        assert_eq!(result.response, "answer 2");
        assert_eq!(provider.call_count(), 7);
    }

    #[tokio::test]
    async fn reflection_can_be_disabled() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. a\n2. b"),
            make_text_response("Done"),
        ]));
        let settings = AgentSettings {
            reflection_enabled: false,
            ..AgentSettings::default()
        };
        let result = agent(provider.clone())
            .with_settings(settings)
            .execute(COMPLEX, &ConversationId::from("c1"), false)
            .await
            .unwrap();
        assert!(result.used_planning);
        assert_eq!(result.response, "Done");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn planning_failure_falls_back_to_direct_execution() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![
            Err(ProviderError::Timeout("30s".into())),
            Ok(make_text_response("Direct answer")),
        ]));
        let result = agent(provider.clone())
            .execute(COMPLEX, &ConversationId::from("c1"), false)
            .await
            .unwrap();

        assert!(!result.used_planning);
        assert_eq!(result.response, "Direct answer");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn generation_failure_propagates() {
        let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(
            ProviderError::Network("down".into()),
        )]));
        let err = agent(provider)
            .execute("Hello", &ConversationId::from("c1"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::Network(_))));
    }

    #[tokio::test]
    async fn storage_loads_history_and_persists_turns() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        store.append(&conv, Message::user("My name is Ada")).await.unwrap();
        store.append(&conv, Message::assistant("Nice to meet you, Ada")).await.unwrap();

        let provider = Arc::new(SequentialMockProvider::single_text("Your name is Ada"));
        let agent = agent(provider.clone()).with_store(store.clone());
        agent.execute("What is my name?", &conv, true).await.unwrap();

        let request = &provider.requests()[0];
        assert!(request.messages.iter().any(|m| m.content == "My name is Ada"));

        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[3].role, Role::Assistant);
    }

    #[tokio::test]
    async fn revision_keeps_one_request_and_the_final_answer() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. a\n2. b"),
            make_text_response("Draft"),
            make_text_response("NEEDS_REVISION: add examples"),
            make_text_response("Better"),
            make_text_response("APPROVED: good"),
        ]));
        let result = agent(provider)
            .with_store(store.clone())
            .execute(COMPLEX, &conv, true)
            .await
            .unwrap();
        assert_eq!(result.retries, 1);

        let history = store.history(&conv).await.unwrap();
        let stored: Vec<(Role, &str)> = history.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(stored, vec![(Role::User, COMPLEX), (Role::Assistant, "Better")]);
    }

    #[tokio::test]
    async fn revised_tool_turns_are_stored_after_the_request() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. a\n2. b"),
            make_text_response("Draft"),
            make_text_response("NEEDS_REVISION: check it"),
            make_tool_call_response(
                vec![make_tool_call("echo", serde_json::json!({ "text": "checked" }))],
                "",
            ),
            make_text_response("Checked answer"),
            make_text_response("APPROVED: good"),
        ]));
        agent(provider)
            .with_store(store.clone())
            .execute(COMPLEX, &conv, true)
            .await
            .unwrap();

        let roles: Vec<Role> = store.history(&conv).await.unwrap().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn planned_request_is_stored_as_written() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("1. a\n2. b"),
            make_text_response("Done"),
        ]));
        let settings = AgentSettings {
            reflection_enabled: false,
            ..AgentSettings::default()
        };
        agent(provider.clone())
            .with_settings(settings)
            .with_store(store.clone())
            .execute(COMPLEX, &conv, true)
            .await
            .unwrap();

        assert!(provider.requests()[1].messages.last().unwrap().content.contains("1. a"));
        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, COMPLEX);
        assert_eq!(history[1].content, "Done");
    }

    #[tokio::test]
    async fn without_storage_nothing_is_loaded_or_written() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        store.append(&conv, Message::user("old")).await.unwrap();

        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        agent(provider.clone())
            .with_store(store.clone())
            .execute("Hello", &conv, false)
            .await
            .unwrap();

        assert!(!provider.requests()[0].messages.iter().any(|m| m.content == "old"));
        assert_eq!(store.history(&conv).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tools_run_inside_the_loop() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("echo", serde_json::json!({ "text": "ping" }))],
            "",
            "pong",
        ));
        let result = agent(provider.clone())
            .execute("Hello", &ConversationId::from("c1"), false)
            .await
            .unwrap();
        assert_eq!(result.response, "pong");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn step_events_are_published() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let agent = AgentLoop::new(provider, "m", 0.7, tools(), AgentProfile::default(), bus);
        agent.execute("Hello", &ConversationId::from("c1"), false).await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::StepChanged {
                conversation_id,
                phase,
                ..
            } = event.as_ref()
            {
                assert_eq!(conversation_id, "c1");
                phases.push(phase.clone());
            }
        }
        assert_eq!(phases, vec!["planning-check", "executing"]);
    }

    #[tokio::test]
    async fn cancelled_stream_skips_reflection() {
        let provider = Arc::new(
            SequentialMockProvider::new(vec![
                make_text_response("1. a\n2. b"),
                make_text_response("This answer will be cut short"),
            ])
            .with_chunk_chars(4),
        );
        let mut session = StreamSession::new();
        let mut on_chunk = |_: &str, s: &StreamSession| {
            if s.read().chars().count() >= 8 {
                s.cancel();
            }
        };

        let result = agent(provider.clone())
            .execute_stream(COMPLEX, &ConversationId::from("c1"), false, &mut session, &mut on_chunk)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.response, "This ans");
        assert_eq!(result.retries, 0);
        assert_eq!(provider.call_count(), 2);
        assert!(session.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_planned_stream_stores_request_and_partial_answer() {
        let store = Arc::new(InMemoryStore::new());
        let conv = ConversationId::from("c1");
        let provider = Arc::new(
            SequentialMockProvider::new(vec![
                make_text_response("1. a\n2. b"),
                make_text_response("This answer will be cut short"),
            ])
            .with_chunk_chars(4),
        );
        let mut session = StreamSession::new();
        let mut on_chunk = |_: &str, s: &StreamSession| {
            if s.read().chars().count() >= 8 {
                s.cancel();
            }
        };

        agent(provider)
            .with_store(store.clone())
            .execute_stream(COMPLEX, &conv, true, &mut session, &mut on_chunk)
            .await
            .unwrap();

        let history = store.history(&conv).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, COMPLEX);
        assert_eq!(history[1].content, "This ans");
        assert!(history[1].cancelled);
        assert!(!history[1].is_complete);
    }

    #[tokio::test]
    async fn for_agent_switches_persona_and_model() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let researcher = AgentProfile::new("researcher", "Researcher", "You research things.")
            .with_model("research-model");
        let agent = agent(provider.clone()).for_agent(researcher);
        assert_eq!(agent.model(), "research-model");

        agent.execute("Hello", &ConversationId::from("c1"), false).await.unwrap();
        let request = &provider.requests()[0];
        assert_eq!(request.model, "research-model");
        assert_eq!(request.messages[0].content, "You research things.");
    }

    #[test]
    fn from_config_applies_settings() {
        let mut config = EngineConfig::default();
        config.agent.max_reflection_retries = 1;
        config.agent.planning_enabled = false;
        let agent = AgentLoop::from_config(
            &config,
            Arc::new(SequentialMockProvider::new(vec![])),
            tools(),
            Arc::new(EventBus::default()),
        );
        assert_eq!(agent.model(), config.default_model);
        assert_eq!(agent.settings().max_reflection_retries, 1);
        assert!(!agent.settings().planning_enabled);
    }
}
