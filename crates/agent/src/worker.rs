//! Background execution of queued tasks.
//!
//! Each id pulled from the queue is claimed with the repository's
//! `pending → running` compare-and-swap before any work happens, so an id
//! queued twice (or picked up by two workers) runs once.
//!
//! With delegation enabled, every run gets its own `delegate_task` tool
//! bound to the task being worked on.

use std::sync::Arc;

use aegis_core::agent::AgentDirectory;
use aegis_core::error::{Result, StoreError};
use aegis_core::message::ConversationId;
use aegis_core::task::{Task, TaskQueue, TaskRepository, TaskStatus};
use aegis_providers::ProviderRouter;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::delegate_tool::DelegateTaskTool;
use crate::loop_runner::AgentLoop;
use crate::tasks::TaskService;

/// [`TaskQueue`] backed by a tokio mpsc channel.
#[derive(Clone)]
pub struct ChannelTaskQueue {
    tx: mpsc::Sender<String>,
}

impl ChannelTaskQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn enqueue(&self, task_id: &str) -> std::result::Result<(), StoreError> {
        self.tx
            .send(task_id.to_string())
            .await
            .map_err(|_| StoreError::Storage("task queue is closed".into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRunOutcome {
    /// Someone else already claimed (or finished) the task
    Skipped,
    Completed(String),
    Failed(String),
}

pub struct TaskWorker {
    repo: Arc<dyn TaskRepository>,
    directory: Arc<dyn AgentDirectory>,
    agent: AgentLoop,
    router: Option<Arc<ProviderRouter>>,
    delegation: Option<Arc<TaskService>>,
}

impl TaskWorker {
    pub fn new(repo: Arc<dyn TaskRepository>, directory: Arc<dyn AgentDirectory>, agent: AgentLoop) -> Self {
        Self {
            repo,
            directory,
            agent,
            router: None,
            delegation: None,
        }
    }

    /// Resolve per-agent provider overrides through `router`.
    pub fn with_router(mut self, router: Arc<ProviderRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Let agents delegate from inside a task run through `service`.
    pub fn with_delegation(mut self, service: Arc<TaskService>) -> Self {
        self.delegation = Some(service);
        self
    }

    /// Consume task ids until the queue's senders are all dropped.
    pub fn spawn(self, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(task_id) = rx.recv().await {
                if let Err(e) = self.process(&task_id).await {
                    warn!(task_id = %task_id, error = %e, "Task processing failed");
                }
            }
            info!("Task queue closed, worker stopping");
        })
    }

    pub async fn process(&self, task_id: &str) -> Result<TaskRunOutcome> {
        if !self.repo.try_start(task_id).await? {
            info!(task_id = %task_id, "Task already claimed, skipping");
            return Ok(TaskRunOutcome::Skipped);
        }
        let task = self
            .repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;

        let Some(profile) = self.directory.profile(&task.assigned_agent_id) else {
            let reason = format!("unknown agent: {}", task.assigned_agent_id);
            self.repo
                .finish(task_id, TaskStatus::Failed, Some(reason.clone()))
                .await?;
            warn!(task_id = %task_id, agent = %task.assigned_agent_id, "No profile for assigned agent");
            return Ok(TaskRunOutcome::Failed(reason));
        };

        let mut agent = self.agent.for_agent(profile);
        if let (Some(router), Some(name)) = (&self.router, &agent.profile().provider) {
            match router.failover(name) {
                Ok(provider) => agent = agent.with_provider(provider),
                Err(e) => warn!(provider = %name, error = %e, "Provider override unavailable, using default"),
            }
        }

        if let Some(service) = &self.delegation {
            agent = agent.with_tool(Box::new(DelegateTaskTool::for_task(
                service.clone(),
                &task.assigned_agent_id,
                &task.id,
            )));
        }

        info!(
            task_id = %task_id,
            agent = %task.assigned_agent_id,
            depth = task.delegation_depth,
            "Running task"
        );
        let conversation_id = ConversationId::from(format!("task-{}", task.id).as_str());
        match agent.execute(&task_prompt(&task), &conversation_id, true).await {
            Ok(result) => {
                self.repo
                    .finish(task_id, TaskStatus::Completed, Some(result.response.clone()))
                    .await?;
                info!(task_id = %task_id, retries = result.retries, "Task completed");
                Ok(TaskRunOutcome::Completed(result.response))
            }
            Err(e) => {
                let reason = e.to_string();
                self.repo
                    .finish(task_id, TaskStatus::Failed, Some(reason.clone()))
                    .await?;
                warn!(task_id = %task_id, error = %reason, "Task failed");
                Ok(TaskRunOutcome::Failed(reason))
            }
        }
    }
}

fn task_prompt(task: &Task) -> String {
    let mut prompt = task.title.clone();
    if !task.description.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&task.description);
    }
    prompt.push_str(&format!("\n\n(You are working on task {}.)", task.id));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        SequentialMockProvider, make_text_response, make_tool_call, make_tool_call_response,
    };
    use aegis_config::DelegationPolicy;
    use aegis_core::agent::{AgentProfile, StaticAgentDirectory};
    use aegis_core::error::ProviderError;
    use aegis_core::event::EventBus;
    use aegis_core::store::MessageStore;
    use aegis_core::task::TaskPriority;
    use aegis_core::tool::ToolRegistry;
    use aegis_store::InMemoryStore;

    fn directory() -> Arc<StaticAgentDirectory> {
        Arc::new(
            StaticAgentDirectory::new()
                .with(AgentProfile::new("researcher", "Researcher", "You research things.")),
        )
    }

    fn worker(store: Arc<InMemoryStore>, provider: Arc<SequentialMockProvider>) -> TaskWorker {
        let agent = AgentLoop::new(
            provider,
            "mock-model",
            0.7,
            Arc::new(ToolRegistry::new()),
            AgentProfile::default(),
            Arc::new(EventBus::default()),
        )
        .with_store(store.clone());
        TaskWorker::new(store, directory(), agent)
    }

    async fn pending(store: &InMemoryStore, agent: &str) -> Task {
        store
            .create(Task::new("Find sources", "About rust", agent, TaskPriority::Low))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn runs_task_as_assigned_agent() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::single_text("Three sources"));
        let task = pending(&store, "researcher").await;

        let outcome = worker(store.clone(), provider.clone()).process(&task.id).await.unwrap();
        assert_eq!(outcome, TaskRunOutcome::Completed("Three sources".into()));

        let done = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("Three sources"));

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, "You research things.");
        let prompt = &request.messages.last().unwrap().content;
        assert!(prompt.starts_with("Find sources\n\nAbout rust"));
        assert!(prompt.contains(&task.id));

        let conv = ConversationId::from(format!("task-{}", task.id).as_str());
        assert_eq!(store.history(&conv).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn claimed_task_is_not_run_twice() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::single_text("done"));
        let task = pending(&store, "researcher").await;
        let worker = worker(store, provider.clone());

        assert!(matches!(worker.process(&task.id).await.unwrap(), TaskRunOutcome::Completed(_)));
        assert_eq!(worker.process(&task.id).await.unwrap(), TaskRunOutcome::Skipped);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unknown_agent_fails_task() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let task = pending(&store, "ghost").await;

        let outcome = worker(store.clone(), provider.clone()).process(&task.id).await.unwrap();
        assert!(matches!(outcome, TaskRunOutcome::Failed(ref r) if r.contains("ghost")));
        assert_eq!(
            store.find_by_id(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Failed
        );
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_error_fails_task() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::with_results(vec![Err(
            ProviderError::Network("down".into()),
        )]));
        let task = pending(&store, "researcher").await;

        let outcome = worker(store.clone(), provider).process(&task.id).await.unwrap();
        assert!(matches!(outcome, TaskRunOutcome::Failed(_)));
        let failed = store.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.result.unwrap().contains("down"));
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("first"),
            make_text_response("second"),
        ]));
        let a = pending(&store, "researcher").await;
        let b = pending(&store, "researcher").await;

        let (queue, rx) = ChannelTaskQueue::new(8);
        let handle = worker(store.clone(), provider).spawn(rx);
        queue.enqueue(&a.id).await.unwrap();
        queue.enqueue(&b.id).await.unwrap();
        queue.enqueue(&a.id).await.unwrap();
        drop(queue);
        handle.await.unwrap();

        for id in [&a.id, &b.id] {
            let task = store.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn closed_queue_reports_storage_error() {
        let (queue, rx) = ChannelTaskQueue::new(1);
        drop(rx);
        assert!(matches!(queue.enqueue("t").await, Err(StoreError::Storage(_))));
    }

    #[tokio::test]
    async fn provider_override_goes_through_router() {
        let store = Arc::new(InMemoryStore::new());
        let default = Arc::new(SequentialMockProvider::new(vec![]));
        let special = Arc::new(SequentialMockProvider::single_text("from special"));

        let mut router = ProviderRouter::new("default");
        router.register("special", special.clone());
        let mut profile = AgentProfile::new("analyst", "Analyst", "You analyze.");
        profile.provider = Some("special".into());
        let directory = Arc::new(StaticAgentDirectory::new().with(profile));

        let agent = AgentLoop::new(
            default.clone(),
            "mock-model",
            0.7,
            Arc::new(ToolRegistry::new()),
            AgentProfile::default(),
            Arc::new(EventBus::default()),
        );
        let worker = TaskWorker::new(store.clone(), directory, agent).with_router(Arc::new(router));
        let task = pending(&store, "analyst").await;

        let outcome = worker.process(&task.id).await.unwrap();
        assert_eq!(outcome, TaskRunOutcome::Completed("from special".into()));
        assert_eq!(default.call_count(), 0);
        assert_eq!(special.call_count(), 1);
    }

    fn delegating_worker(
        store: Arc<InMemoryStore>,
        provider: Arc<SequentialMockProvider>,
        max_depth: u32,
    ) -> TaskWorker {
        let directory = Arc::new(
            StaticAgentDirectory::new()
                .with(AgentProfile::new("A", "Lead", "You lead."))
                .with(AgentProfile::new("B", "Helper", "You help.")),
        );
        let service = TaskService::new(store.clone(), Arc::new(EventBus::default()))
            .with_policy(DelegationPolicy::default().with_max_depth(max_depth));
        let agent = AgentLoop::new(
            provider,
            "mock-model",
            0.7,
            Arc::new(ToolRegistry::new()),
            AgentProfile::default(),
            Arc::new(EventBus::default()),
        );
        TaskWorker::new(store, directory, agent).with_delegation(Arc::new(service))
    }

    async fn child_of_root(store: &InMemoryStore) -> (Task, Task) {
        let root = store
            .create(Task::new("Plan", "", "A", TaskPriority::Medium))
            .await
            .unwrap();
        let child = store
            .create(Task::new("Help", "", "B", TaskPriority::Medium).delegated(Some(root.id.clone()), 1))
            .await
            .unwrap();
        (root, child)
    }

    #[tokio::test]
    async fn delegation_inside_a_task_run_is_a_child_of_that_task() {
        let store = Arc::new(InMemoryStore::new());
        let (_, child) = child_of_root(&store).await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("delegate_task", serde_json::json!({ "agent_id": "C", "title": "Dig" }))],
                "",
            ),
            make_text_response("Handed off"),
        ]));

        let outcome = delegating_worker(store.clone(), provider, 3)
            .process(&child.id)
            .await
            .unwrap();
        assert_eq!(outcome, TaskRunOutcome::Completed("Handed off".into()));

        let grandchild = store
            .tasks()
            .await
            .into_iter()
            .find(|t| t.assigned_agent_id == "C")
            .unwrap();
        assert_eq!(grandchild.delegated_from.as_deref(), Some(child.id.as_str()));
        assert_eq!(grandchild.delegation_depth, 2);
    }

    #[tokio::test]
    async fn omitted_parent_inside_a_task_run_is_still_guarded() {
        let store = Arc::new(InMemoryStore::new());
        let (_, child) = child_of_root(&store).await;
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(
                vec![make_tool_call("delegate_task", serde_json::json!({ "agent_id": "A", "title": "Back to you" }))],
                "",
            ),
            make_text_response("Could not delegate"),
        ]));

        let outcome = delegating_worker(store.clone(), provider.clone(), 1)
            .process(&child.id)
            .await
            .unwrap();
        assert_eq!(outcome, TaskRunOutcome::Completed("Could not delegate".into()));
        assert_eq!(store.task_count().await, 2);

        let followup = &provider.requests()[1];
        let tool_turn = followup
            .messages
            .iter()
            .find(|m| m.role == aegis_core::message::Role::Tool)
            .unwrap();
        assert!(tool_turn.content.contains("depth"), "{}", tool_turn.content);
    }
}
