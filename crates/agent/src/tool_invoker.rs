//! Runs one tool call requested by the model.
//!
//! Every call goes through the permission checker first. Whatever happens
//! afterwards (unknown tool, bad arguments, refusal, failure) comes back as
//! a [`ToolOutcome`] whose content the model reads as the tool result. This
//! never returns an error: the loop keeps going and the model reacts.

use std::sync::Arc;
use std::time::Instant;

use aegis_core::error::ToolError;
use aegis_core::event::{DomainEvent, EventBus};
use aegis_core::message::{Message, MessageToolCall};
use aegis_core::permission::{AllowAll, PermissionChecker, PermissionDecision};
use aegis_core::tool::ToolRegistry;
use aegis_security::audit::{AuditEvent, AuditLogger, AuditOutcome};
use chrono::Utc;
use tracing::{debug, warn};

/// How a tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Executed,
    Failed,
    Denied,
    NeedsApproval,
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool_name: String,
    pub kind: OutcomeKind,
    /// Text handed back to the model
    pub content: String,
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        self.kind == OutcomeKind::Executed
    }

    /// The tool-result turn for this outcome.
    pub fn into_message(self) -> Message {
        Message::tool_result(self.call_id, self.tool_name, self.content)
    }
}

#[derive(Clone)]
pub struct ToolInvoker {
    tools: Arc<ToolRegistry>,
    permissions: Arc<dyn PermissionChecker>,
    audit: Option<Arc<AuditLogger>>,
    event_bus: Arc<EventBus>,
    actor: String,
}

impl ToolInvoker {
    pub fn new(tools: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            tools,
            permissions: Arc::new(AllowAll),
            audit: None,
            event_bus,
            actor: "agent".into(),
        }
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Name recorded as the actor in audit entries.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn invoke(&self, call: &MessageToolCall) -> ToolOutcome {
        let start = Instant::now();
        let (kind, content) = self.run(call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: kind == OutcomeKind::Executed,
            duration_ms,
            timestamp: Utc::now(),
        });

        ToolOutcome {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            kind,
            content,
        }
    }

    async fn run(&self, call: &MessageToolCall) -> (OutcomeKind, String) {
        let arguments = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(e) => return self.failed(call, e),
        };

        let Some(tool) = self.tools.get(&call.name) else {
            return self.failed(call, ToolError::NotFound(call.name.clone()));
        };

        let action = tool.required_permission();
        match self.permissions.check(&call.name, action, &arguments).await {
            PermissionDecision::Allowed => {}
            PermissionDecision::Denied { reason } => {
                warn!(tool = %call.name, action = %action, reason = %reason, "Tool call denied");
                self.record(
                    AuditEvent::PermissionDenied {
                        tool_name: call.name.clone(),
                    },
                    &call.name,
                    AuditOutcome::Denied,
                    Some(reason.clone()),
                );
                let err = ToolError::PermissionDenied {
                    tool_name: call.name.clone(),
                    reason,
                };
                return (OutcomeKind::Denied, format!("Error: {err}"));
            }
            PermissionDecision::NeedsApproval { reason } => {
                warn!(tool = %call.name, action = %action, reason = %reason, "Tool call needs approval");
                self.record(
                    AuditEvent::ApprovalRequired {
                        tool_name: call.name.clone(),
                    },
                    &call.name,
                    AuditOutcome::Denied,
                    Some(reason.clone()),
                );
                let err = ToolError::NeedsApproval {
                    tool_name: call.name.clone(),
                    reason,
                };
                return (OutcomeKind::NeedsApproval, format!("Error: {err}"));
            }
        }

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        match tool.execute(arguments).await {
            Ok(result) if result.success => {
                self.record(
                    AuditEvent::ToolExecution {
                        tool_name: call.name.clone(),
                    },
                    &call.name,
                    AuditOutcome::Success,
                    None,
                );
                (OutcomeKind::Executed, result.output)
            }
            Ok(result) => self.failed(
                call,
                ToolError::ExecutionFailed {
                    tool_name: call.name.clone(),
                    reason: result.output,
                },
            ),
            Err(e) => self.failed(call, e),
        }
    }

    fn failed(&self, call: &MessageToolCall, error: ToolError) -> (OutcomeKind, String) {
        warn!(tool = %call.name, error = %error, "Tool call failed");
        self.record(
            AuditEvent::ToolFailure {
                tool_name: call.name.clone(),
            },
            &call.name,
            AuditOutcome::Failure,
            Some(error.to_string()),
        );
        (OutcomeKind::Failed, format!("Error: {error}"))
    }

    fn record(&self, event: AuditEvent, target: &str, outcome: AuditOutcome, details: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.log(event, &self.actor, target, outcome, details);
        }
    }
}

fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
