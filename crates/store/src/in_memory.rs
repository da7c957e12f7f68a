//! In-memory backend: useful for testing and ephemeral sessions.
//!
//! Implements both [`MessageStore`] and [`TaskRepository`], so a single
//! instance can back the engine and the task service.

use async_trait::async_trait;
use chrono::Utc;
use aegis_core::error::StoreError;
use aegis_core::message::{ConversationId, Message};
use aegis_core::store::MessageStore;
use aegis_core::task::{Task, TaskRepository, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryStore {
    turns: Arc<RwLock<HashMap<ConversationId, Vec<Message>>>>,
    summaries: Arc<RwLock<HashMap<ConversationId, String>>>,
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of task rows.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// All task rows, oldest first.
    pub async fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, conversation: &ConversationId, message: Message) -> Result<(), StoreError> {
        self.turns
            .write()
            .await
            .entry(conversation.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn history(&self, conversation: &ConversationId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .turns
            .read()
            .await
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn summary(&self, conversation: &ConversationId) -> Result<Option<String>, StoreError> {
        Ok(self.summaries.read().await.get(conversation).cloned())
    }

    async fn set_summary(&self, conversation: &ConversationId, summary: String) -> Result<(), StoreError> {
        self.summaries
            .write()
            .await
            .insert(conversation.clone(), summary);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryStore {
    async fn create(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Storage(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn try_start(&self, id: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        Ok(true)
    }

    async fn finish(&self, id: &str, status: TaskStatus, result: Option<String>) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        task.status = status;
        task.result = result;
        task.updated_at = Utc::now();
        Ok(())
    }
}
