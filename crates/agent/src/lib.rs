//! The agent execution engine: the heart of Aegis.
//!
//! A request flows through [`AgentLoop`]:
//!
//! 1. **Classify** the prompt; compound requests get a plan first
//! 2. **Execute** with [`GenerationOrchestrator`]: generate, run tool calls,
//!    feed results back, until the model answers with text only
//! 3. **Reflect** on planned answers and revise a bounded number of times
//!
//! Every provider request is shaped by the [`ContextWindowManager`], which
//! splits the model's window into section quotas and keeps the newest turns
//! that fit. Streaming output goes through a cancellable [`StreamSession`].
//!
//! Agents can hand work to each other with the `delegate_task` tool. The
//! [`DelegationTracker`] bounds the delegation depth and refuses cycles;
//! accepted tasks run in the background on a [`TaskWorker`].

pub mod classifier;
pub mod context;
pub mod delegate_tool;
pub mod delegation;
pub mod loop_runner;
pub mod orchestrator;
pub mod planner;
pub mod reflection;
pub mod stream;
pub mod tasks;
pub mod tool_invoker;
pub mod worker;

#[cfg(test)]
mod test_helpers;

pub use classifier::{Complexity, ComplexityClassifier};
pub use context::{Budget, ContextWindow, ContextWindowManager};
pub use delegate_tool::DelegateTaskTool;
pub use delegation::{DelegationGrant, DelegationTracker};
pub use loop_runner::{AgentLoop, ExecutionResult, StepListener};
pub use orchestrator::{ChunkCallback, GenerationOrchestrator, TurnInput, TurnOutput};
pub use planner::{Plan, PlanGenerator};
pub use reflection::{ReflectionGate, ReflectionVerdict};
pub use stream::{CancelHandle, StreamSession, StreamState};
pub use tasks::{CreatedTask, NewTask, TaskService};
pub use tool_invoker::{OutcomeKind, ToolInvoker, ToolOutcome};
pub use worker::{ChannelTaskQueue, TaskRunOutcome, TaskWorker};
