//! # Aegis Core
//!
//! Domain types, collaborator traits, and error definitions for the Aegis
//! agent execution engine. This crate has **no engine logic**: it defines
//! the model that the engine and its collaborators implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (LLM provider, tool, permission policy,
//! message store, task repository, task queue) is a trait here. Implementations
//! live in their respective crates, which keeps the engine testable with
//! in-memory doubles.

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod permission;
pub mod provider;
pub mod store;
pub mod task;
pub mod token;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDirectory, AgentProfile, StaticAgentDirectory};
pub use error::{DelegationError, Error, ProviderError, Result, StoreError, StreamError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use permission::{AllowAll, PermissionChecker, PermissionDecision};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use store::MessageStore;
pub use task::{Task, TaskPriority, TaskQueue, TaskRepository, TaskStatus};
pub use token::estimate_tokens;
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
