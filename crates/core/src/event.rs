//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the engine.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The provider produced a turn
    ResponseGenerated {
        conversation_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (or refused)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The agent loop entered a new phase
    StepChanged {
        conversation_id: String,
        phase: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A streaming turn reached a terminal state
    StreamFinished {
        session_id: String,
        cancelled: bool,
        chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// A task was created on behalf of another agent
    TaskDelegated {
        task_id: String,
        target_agent_id: String,
        depth: u32,
        timestamp: DateTime<Utc>,
    },

    /// A delegation request was refused; no task was created
    DelegationRejected {
        target_agent_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
