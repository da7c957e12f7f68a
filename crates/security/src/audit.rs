//! Audit logging: structured security event logging.
//!
//! Records tool executions, refusals and delegation decisions for
//! monitoring and compliance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub actor: String,
    pub target: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Tool was executed
    ToolExecution { tool_name: String },
    /// Tool ran but reported failure
    ToolFailure { tool_name: String },
    /// Permission policy refused the tool
    PermissionDenied { tool_name: String },
    /// Permission policy wants a human to approve the call
    ApprovalRequired { tool_name: String },
    /// A task was created on behalf of another agent
    TaskDelegated {
        task_id: String,
        target_agent_id: String,
        depth: u32,
    },
    /// A delegation request was refused
    DelegationRejected { target_agent_id: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit logger that stores entries in a vector and forwards
/// each one to its sinks.
pub struct AuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entry_count", &self.count())
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger {
    /// Create a new audit logger with no sinks.
    pub fn new() -> Self {
        Self::with_sinks(Vec::new())
    }

    /// Create a new audit logger with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Logger that forwards to [`TracingSink`].
    pub fn tracing() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }

    // A panic while holding the lock leaves the Vec intact, so keep using it.
    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an audit event.
    pub fn log(
        &self,
        event: AuditEvent,
        actor: &str,
        target: &str,
        outcome: AuditOutcome,
        details: Option<String>,
    ) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            target: target.into(),
            outcome,
            details,
        };

        self.lock().push(entry.clone());

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| &e.outcome == outcome)
            .cloned()
            .collect()
    }

    /// Clear all stored entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.lock().len()
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            target = %entry.target,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_event(name: &str) -> AuditEvent {
        AuditEvent::ToolExecution {
            tool_name: name.into(),
        }
    }

    #[test]
    fn log_and_retrieve_entries() {
        let logger = AuditLogger::new();
        logger.log(tool_event("search"), "researcher", "search", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::PermissionDenied {
                tool_name: "shell".into(),
            },
            "researcher",
            "shell",
            AuditOutcome::Denied,
            Some("read-only autonomy".into()),
        );

        assert_eq!(logger.count(), 2);
        let entries = logger.entries();
        assert_eq!(entries[0].target, "search");
        assert_eq!(entries[1].details.as_deref(), Some("read-only autonomy"));
    }

    #[test]
    fn filter_by_outcome() {
        let logger = AuditLogger::new();
        logger.log(tool_event("a"), "agent", "a", AuditOutcome::Success, None);
        logger.log(
            AuditEvent::ToolFailure {
                tool_name: "b".into(),
            },
            "agent",
            "b",
            AuditOutcome::Failure,
            None,
        );
        logger.log(
            AuditEvent::DelegationRejected {
                target_agent_id: "writer".into(),
            },
            "researcher",
            "writer",
            AuditOutcome::Denied,
            None,
        );

        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Success).len(), 1);
        assert_eq!(logger.entries_by_outcome(&AuditOutcome::Failure).len(), 1);
        let denied = logger.entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "researcher");
    }

    #[test]
    fn clear_entries() {
        let logger = AuditLogger::default();
        logger.log(tool_event("x"), "agent", "x", AuditOutcome::Success, None);
        assert_eq!(logger.count(), 1);
        logger.clear();
        assert_eq!(logger.count(), 0);
    }

    #[test]
    fn audit_event_serializes_tagged() {
        let event = AuditEvent::TaskDelegated {
            task_id: "t1".into(),
            target_agent_id: "writer".into(),
            depth: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"task_delegated""#));
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn custom_sink_receives_events() {
        use std::sync::Arc;

        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.target.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let logger = AuditLogger::with_sinks(vec![Box::new(TestSink {
            received: received.clone(),
        })]);

        logger.log(
            AuditEvent::ApprovalRequired {
                tool_name: "deploy".into(),
            },
            "agent",
            "deploy",
            AuditOutcome::Denied,
            None,
        );

        assert_eq!(*received.lock().unwrap(), vec!["deploy".to_string()]);
    }

    #[test]
    fn debug_format() {
        let logger = AuditLogger::tracing();
        let debug_str = format!("{logger:?}");
        assert!(debug_str.contains("entry_count"));
        assert!(debug_str.contains("sink_count: 1"));
    }
}
