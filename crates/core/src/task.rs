//! Task domain types and the persistence/queue contracts behind delegation.
//!
//! A task may be delegated from another task. The parent link and the depth
//! are fixed at creation: depth 0 iff there is no parent, otherwise the
//! parent's depth plus one.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Declared urgency. Ordered: `Low < Medium < High < Urgent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" | "critical" => Ok(Self::Urgent),
            other => Err(format!("unknown task priority: {other}")),
        }
    }
}

/// A unit of work assigned to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub assigned_agent_id: String,
    #[serde(default)]
    pub priority: TaskPriority,
    pub status: TaskStatus,
    /// Id of the task this one was delegated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_from: Option<String>,
    #[serde(default)]
    pub delegation_depth: u32,
    /// Final answer or failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A pending task with no parent.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        assigned_agent_id: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: description.into(),
            assigned_agent_id: assigned_agent_id.into(),
            priority,
            status: TaskStatus::Pending,
            delegated_from: None,
            delegation_depth: 0,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the parent link and depth. Only used while building a new task.
    pub fn delegated(mut self, parent_id: Option<String>, depth: u32) -> Self {
        self.delegated_from = parent_id;
        self.delegation_depth = depth;
        self
    }

    pub fn is_delegated(&self) -> bool {
        self.delegated_from.is_some()
    }
}

/// Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Persist a new task.
    async fn create(&self, task: Task) -> std::result::Result<Task, StoreError>;

    async fn find_by_id(&self, id: &str) -> std::result::Result<Option<Task>, StoreError>;

    /// Atomically move a task from `pending` to `running`.
    ///
    /// Returns `false` if the task is not pending (already claimed or finished).
    async fn try_start(&self, id: &str) -> std::result::Result<bool, StoreError>;

    /// Record a terminal status and result text.
    async fn finish(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
    ) -> std::result::Result<(), StoreError>;

    /// Parent, grandparent, ... of `task`, nearest first. `task` itself is not included.
    async fn ancestors_of(&self, task: &Task) -> std::result::Result<Vec<Task>, StoreError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([task.id.clone()]);
        let mut next = task.delegated_from.clone();

        while let Some(parent_id) = next {
            if !seen.insert(parent_id.clone()) {
                tracing::warn!(task_id = %task.id, parent_id = %parent_id, "Delegation chain loops back on itself");
                break;
            }
            match self.find_by_id(&parent_id).await? {
                Some(parent) => {
                    next = parent.delegated_from.clone();
                    chain.push(parent);
                }
                None => break,
            }
        }

        Ok(chain)
    }
}

/// Background execution queue for tasks. Decides nothing; only transports ids.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task_id: &str) -> std::result::Result<(), StoreError>;
}
