//! Tool-augmented generation for a single turn.
//!
//! ```text
//! Start ─▶ Generate ─▶ tool calls? ──no──▶ Finish
//!             ▲            │
//!             │           yes
//!             └── ExecuteTools
//! ```
//!
//! Every turn is persisted as soon as it exists, so a crash mid-loop leaves
//! a consistent partial history. Tool failures become tool-result turns and
//! the loop goes on. Provider failures propagate to the caller unchanged.
//! Running past the iteration cap is fatal.

use std::sync::Arc;

use aegis_core::error::{Error, Result};
use aegis_core::event::{DomainEvent, EventBus};
use aegis_core::message::{ConversationId, Message, MessageToolCall};
use aegis_core::provider::{Provider, ProviderRequest, Usage};
use aegis_core::store::MessageStore;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::{ContextWindow, ContextWindowManager, DroppedSummarizer};
use crate::stream::StreamSession;
use crate::tool_invoker::ToolInvoker;

/// Default cap on generate → tools → generate rounds.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 25;

/// Called with each streamed text delta. May cancel the session.
pub type ChunkCallback<'a> = dyn FnMut(&str, &StreamSession) + Send + 'a;

/// Everything needed to run one turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub conversation_id: ConversationId,
    pub system_prompt: String,
    /// The user turn the model sees
    pub prompt: String,
    /// Stored in place of `prompt` when set, e.g. the request as the user
    /// wrote it rather than its plan-augmented form
    pub recorded_prompt: Option<String>,
    /// Prior turns, oldest first
    pub history: Vec<Message>,
    /// Running summary of turns that no longer fit
    pub summary: Option<String>,
    pub memories: Vec<String>,
    /// Write produced turns (and refreshed summaries) to the store
    pub persist: bool,
}

impl TurnInput {
    pub fn new(
        conversation_id: ConversationId,
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            recorded_prompt: None,
            history: Vec::new(),
            summary: None,
            memories: Vec::new(),
            persist: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutput {
    /// Final assistant text. When cancelled, the partial text of the
    /// interrupted provider call, which is also what was persisted.
    /// The session buffer may hold more: it keeps deltas from every
    /// streamed call of the turn, including text sent before tool calls.
    pub response: String,
    /// Turns produced by this run, in order, starting with the user turn
    pub turns: Vec<Message>,
    /// Number of provider calls
    pub iterations: u32,
    pub cancelled: bool,
    pub usage: Usage,
    /// Conversation summary refreshed during this run, if any
    pub summary: Option<String>,
}

struct StreamSink<'a, 'c> {
    session: &'a mut StreamSession,
    on_chunk: &'a mut ChunkCallback<'c>,
}

#[derive(Clone)]
pub struct GenerationOrchestrator {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    invoker: ToolInvoker,
    context: ContextWindowManager,
    window_tokens: Option<usize>,
    max_iterations: u32,
    store: Option<Arc<dyn MessageStore>>,
    event_bus: Arc<EventBus>,
}

impl GenerationOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        invoker: ToolInvoker,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            invoker,
            context: ContextWindowManager::default(),
            window_tokens: None,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            store: None,
            event_bus,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_context(mut self, context: ContextWindowManager) -> Self {
        self.context = context;
        self
    }

    /// Override the model's context window size.
    pub fn with_window_tokens(mut self, tokens: usize) -> Self {
        self.window_tokens = Some(tokens);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn store(&self) -> Option<&Arc<dyn MessageStore>> {
        self.store.as_ref()
    }

    pub fn window_tokens(&self) -> usize {
        self.window_tokens
            .unwrap_or_else(|| self.context.settings().window_for(&self.model))
    }

    /// Run a turn with non-streaming provider calls.
    pub async fn run(&self, input: TurnInput) -> Result<TurnOutput> {
        self.drive(input, None).await
    }

    /// Run a turn, streaming text deltas into `session` and `on_chunk`.
    ///
    /// If `on_chunk` (or anyone holding a cancel handle) cancels the
    /// session, the partial turn is persisted with `is_complete = false,
    /// cancelled = true` and the run returns with `cancelled` set.
    pub async fn run_stream(
        &self,
        input: TurnInput,
        session: &mut StreamSession,
        on_chunk: &mut ChunkCallback<'_>,
    ) -> Result<TurnOutput> {
        session.start();
        let mut sink = StreamSink { session, on_chunk };
        let result = self.drive(input, Some(&mut sink)).await;

        let session = sink.session;
        let cancelled = session.is_cancelled();
        if session.is_active() {
            session.finish();
        }
        self.event_bus.publish(DomainEvent::StreamFinished {
            session_id: session.id().to_string(),
            cancelled,
            chars: session.read().chars().count(),
            timestamp: Utc::now(),
        });
        result
    }

    async fn drive(&self, input: TurnInput, mut stream: Option<&mut StreamSink<'_, '_>>) -> Result<TurnOutput> {
        info!(
            conversation_id = %input.conversation_id,
            history = input.history.len(),
            streaming = stream.is_some(),
            "Running turn"
        );

        let window_tokens = self.window_tokens();
        let prompt_budget = self.context.allocate_budget(window_tokens).prompt_tokens();
        let tool_definitions = self.invoker.tools().definitions();

        let mut history = input.history.clone();
        let mut turns = Vec::new();
        let mut summary = input.summary.clone();
        let mut summarized = false;
        let mut usage = Usage::default();

        let user = Message::user(&input.prompt);
        let recorded = match &input.recorded_prompt {
            Some(text) if *text != input.prompt => Message::user(text),
            _ => user.clone(),
        };
        self.persist(&input, &recorded).await?;
        history.push(user);
        turns.push(recorded);

        for iteration in 1..=self.max_iterations {
            debug!(conversation_id = %input.conversation_id, iteration, "Generation iteration");

            let mut window = self.window(&input, &history, prompt_budget, summary.as_deref());
            if window.has_dropped() && !summarized && self.context.settings().summarize_dropped {
                summarized = true;
                let refreshed = DroppedSummarizer::new(self.provider.clone(), &self.model)
                    .summarize(summary.as_deref(), &window.dropped, window.budget.summary)
                    .await;
                if input.persist
                    && let Some(store) = &self.store
                {
                    store
                        .set_summary(&input.conversation_id, refreshed.clone())
                        .await?;
                }
                summary = Some(refreshed);
                window = self.window(&input, &history, prompt_budget, summary.as_deref());
            }

            let room = window_tokens.saturating_sub(window.total_tokens);
            let mut messages = Vec::with_capacity(window.messages.len() + 1);
            messages.push(Message::system(&input.system_prompt));
            messages.extend(window.messages);

            let request = ProviderRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: self
                    .max_tokens
                    .map(|max| max.min(u32::try_from(room).unwrap_or(u32::MAX)).max(1)),
                tools: tool_definitions.clone(),
                stream: stream.is_some(),
            };

            let (mut assistant, turn_usage, cancelled) = match stream.as_deref_mut() {
                Some(sink) => self.generate_streaming(request, sink).await?,
                None => {
                    let response = self.provider.complete(request).await?;
                    (response.message, response.usage, false)
                }
            };

            if let Some(turn_usage) = &turn_usage {
                usage.add(turn_usage);
            }
            self.event_bus.publish(DomainEvent::ResponseGenerated {
                conversation_id: input.conversation_id.to_string(),
                model: self.model.clone(),
                tokens_used: turn_usage.map(|u| u.total_tokens).unwrap_or(0),
                timestamp: Utc::now(),
            });

            if cancelled {
                assistant.tool_calls.clear();
                assistant.finalize(false, true);
                self.persist(&input, &assistant).await?;
                let response = assistant.content.clone();
                info!(conversation_id = %input.conversation_id, iteration, "Turn cancelled while streaming");
                turns.push(assistant);
                return Ok(TurnOutput {
                    response,
                    turns,
                    iterations: iteration,
                    cancelled: true,
                    usage,
                    summary: summary.filter(|_| summarized),
                });
            }

            self.persist(&input, &assistant).await?;
            let tool_calls = assistant.tool_calls.clone();
            history.push(assistant.clone());
            turns.push(assistant.clone());

            if tool_calls.is_empty() {
                info!(
                    conversation_id = %input.conversation_id,
                    iterations = iteration,
                    tokens = usage.total_tokens,
                    "Turn complete"
                );
                return Ok(TurnOutput {
                    response: assistant.content,
                    turns,
                    iterations: iteration,
                    cancelled: false,
                    usage,
                    summary: summary.filter(|_| summarized),
                });
            }

            debug!(tool_count = tool_calls.len(), "Executing tool calls");
            for call in &tool_calls {
                let result = self.invoker.invoke(call).await.into_message();
                self.persist(&input, &result).await?;
                history.push(result.clone());
                turns.push(result);
            }
        }

        warn!(
            conversation_id = %input.conversation_id,
            limit = self.max_iterations,
            "Tool call loop exceeded its iteration cap"
        );
        let error = Error::IterationLimit {
            limit: self.max_iterations,
        };
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: format!("conversation {}", input.conversation_id),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        Err(error)
    }

    fn window(
        &self,
        input: &TurnInput,
        history: &[Message],
        prompt_budget: usize,
        summary: Option<&str>,
    ) -> ContextWindow {
        self.context.build_context_window(
            &input.system_prompt,
            history,
            prompt_budget,
            summary,
            &input.memories,
        )
    }

    /// Stream one provider call into the session. Returns the assistant
    /// turn built from this call's deltas and whether the session was
    /// cancelled along the way.
    async fn generate_streaming(
        &self,
        request: ProviderRequest,
        sink: &mut StreamSink<'_, '_>,
    ) -> Result<(Message, Option<Usage>, bool)> {
        if sink.session.is_cancelled() {
            return Ok((Message::assistant(""), None, true));
        }

        let mut rx = self.provider.stream(request).await?;
        let mut content = String::new();
        let mut tool_calls: Vec<MessageToolCall> = Vec::new();
        let mut usage = None;

        while let Some(chunk) = rx.recv().await {
            // A cancel handle may fire while we wait on the provider
            if sink.session.is_cancelled() {
                return Ok((Message::assistant(content), usage, true));
            }
            let chunk = chunk?;

            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                if let Err(e) = sink.session.append(text) {
                    if sink.session.is_cancelled() {
                        return Ok((Message::assistant(content), usage, true));
                    }
                    return Err(e.into());
                }
                content.push_str(text);
                (sink.on_chunk)(text, sink.session);
                if sink.session.is_cancelled() {
                    return Ok((Message::assistant(content), usage, true));
                }
            }

            // Merge or add tool call deltas
            for tc in chunk.tool_calls {
                match tool_calls.iter_mut().find(|t| t.id == tc.id) {
                    Some(existing) => existing.arguments.push_str(&tc.arguments),
                    None => tool_calls.push(tc),
                }
            }

            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        let mut message = Message::assistant(content);
        message.tool_calls = tool_calls;
        Ok((message, usage, sink.session.is_cancelled()))
    }

    async fn persist(&self, input: &TurnInput, message: &Message) -> Result<()> {
        if !input.persist {
            return Ok(());
        }
        if let Some(store) = &self.store {
            store.append(&input.conversation_id, message.clone()).await?;
        }
        Ok(())
    }
}
