//! `delegate_task`: lets the model hand a sub-task to another agent.
//!
//! The task a delegation comes from is fixed when the tool is built, never
//! taken from the model's arguments. Inside a task run the tool is bound to
//! that task, so depth and cycle checks always see the real chain.

use std::sync::Arc;

use aegis_core::error::ToolError;
use aegis_core::task::TaskPriority;
use aegis_core::tool::{Tool, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;

use crate::tasks::{NewTask, TaskService};

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    agent_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<String>,
}

pub struct DelegateTaskTool {
    service: Arc<TaskService>,
    requested_by: String,
    source_task_id: Option<String>,
}

impl DelegateTaskTool {
    /// For a conversation that is not working on any task. Delegated tasks
    /// start new chains.
    pub fn new(service: Arc<TaskService>, requested_by: impl Into<String>) -> Self {
        Self {
            service,
            requested_by: requested_by.into(),
            source_task_id: None,
        }
    }

    /// For an agent working on `task_id`. Every delegation is a child of it.
    pub fn for_task(
        service: Arc<TaskService>,
        requested_by: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            requested_by: requested_by.into(),
            source_task_id: Some(task_id.into()),
        }
    }

    pub fn source_task_id(&self) -> Option<&str> {
        self.source_task_id.as_deref()
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        "delegate_task"
    }

    fn description(&self) -> &str {
        "Create a task for another agent. It runs in the background; this call returns the new task id."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string", "description": "Agent that should do the work" },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "priority": { "type": "string", "enum": ["low", "medium", "high", "urgent"] }
            },
            "required": ["agent_id", "title"]
        })
    }

    fn required_permission(&self) -> &str {
        "delegate"
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: DelegateArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let priority = match args.priority.as_deref() {
            Some(p) => p.parse::<TaskPriority>().map_err(ToolError::InvalidArguments)?,
            None => TaskPriority::default(),
        };

        let created = self
            .service
            .create_task(NewTask::delegated(
                &self.requested_by,
                self.source_task_id.clone(),
                args.title,
                args.description,
                &args.agent_id,
                priority,
            ))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let task = &created.task;
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!(
                "Delegated task {} to {} (depth {})",
                task.id, task.assigned_agent_id, task.delegation_depth
            ),
            data: serde_json::to_value(task).ok(),
        })
    }
}
