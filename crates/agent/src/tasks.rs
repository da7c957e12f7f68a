//! Task creation with the delegation guard and dispatch policy applied.
//!
//! A refused delegation leaves no trace in the repository: the rejection is
//! audited and published, and the caller gets `Error::Delegation`.

use std::sync::Arc;

use aegis_config::{DelegationPolicy, TaskDispatchConfig};
use aegis_core::error::{DelegationError, Error, Result};
use aegis_core::event::{DomainEvent, EventBus};
use aegis_core::task::{Task, TaskPriority, TaskQueue, TaskRepository};
use aegis_security::audit::{AuditEvent, AuditLogger, AuditOutcome};
use chrono::Utc;
use tracing::{info, warn};

use crate::delegation::{DelegationTracker, resolve_chain};

/// A request to create a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub assigned_agent_id: String,
    pub priority: TaskPriority,
    /// Task the new one is delegated from, if any
    pub source_task_id: Option<String>,
    /// Created by an agent through delegation rather than by a user
    pub via_delegation: bool,
    /// Recorded as the actor in audit entries
    pub requested_by: String,
}

impl NewTask {
    /// A task assigned directly by a user.
    pub fn user(
        title: impl Into<String>,
        description: impl Into<String>,
        assigned_agent_id: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            assigned_agent_id: assigned_agent_id.into(),
            priority,
            source_task_id: None,
            via_delegation: false,
            requested_by: "user".into(),
        }
    }

    /// A task one agent hands to another.
    pub fn delegated(
        requested_by: impl Into<String>,
        source_task_id: Option<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        assigned_agent_id: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            assigned_agent_id: assigned_agent_id.into(),
            priority,
            source_task_id,
            via_delegation: true,
            requested_by: requested_by.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub task: Task,
    /// Whether the task was handed to the background queue
    pub queued: bool,
}

pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    queue: Option<Arc<dyn TaskQueue>>,
    tracker: DelegationTracker,
    dispatch: TaskDispatchConfig,
    audit: Option<Arc<AuditLogger>>,
    event_bus: Arc<EventBus>,
}

impl TaskService {
    pub fn new(repo: Arc<dyn TaskRepository>, event_bus: Arc<EventBus>) -> Self {
        Self {
            repo,
            queue: None,
            tracker: DelegationTracker::default(),
            dispatch: TaskDispatchConfig::default(),
            audit: None,
            event_bus,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_policy(mut self, policy: DelegationPolicy) -> Self {
        self.tracker = DelegationTracker::new(policy);
        self
    }

    pub fn with_dispatch(mut self, dispatch: TaskDispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn repository(&self) -> &Arc<dyn TaskRepository> {
        &self.repo
    }

    pub async fn create_task(&self, request: NewTask) -> Result<CreatedTask> {
        let chain = match &request.source_task_id {
            Some(source_id) => match resolve_chain(self.repo.as_ref(), source_id).await {
                Ok(chain) => Some(chain),
                Err(Error::Delegation(rejection)) => return Err(self.reject(&request, rejection)),
                Err(e) => return Err(e),
            },
            None => None,
        };

        let (source, ancestors) = match &chain {
            Some((source, ancestors)) => (Some(source), ancestors.as_slice()),
            None => (None, &[][..]),
        };
        let grant = self
            .tracker
            .accept(source, ancestors, &request.assigned_agent_id)
            .map_err(|rejection| self.reject(&request, rejection))?;

        let task = Task::new(
            &request.title,
            &request.description,
            &request.assigned_agent_id,
            request.priority,
        )
        .delegated(grant.delegated_from, grant.depth);
        let task = self.repo.create(task).await?;

        if request.via_delegation {
            if let Some(audit) = &self.audit {
                audit.log(
                    AuditEvent::TaskDelegated {
                        task_id: task.id.clone(),
                        target_agent_id: task.assigned_agent_id.clone(),
                        depth: task.delegation_depth,
                    },
                    &request.requested_by,
                    &task.assigned_agent_id,
                    AuditOutcome::Success,
                    None,
                );
            }
            self.event_bus.publish(DomainEvent::TaskDelegated {
                task_id: task.id.clone(),
                target_agent_id: task.assigned_agent_id.clone(),
                depth: task.delegation_depth,
                timestamp: Utc::now(),
            });
        }

        // Delegated work always runs in the background; user tasks only at
        // or above the dispatch threshold.
        let wants_queue =
            request.via_delegation || task.priority >= self.dispatch.auto_dispatch_priority;
        let queued = match &self.queue {
            Some(queue) if wants_queue => {
                queue.enqueue(&task.id).await?;
                true
            }
            _ => false,
        };

        info!(
            task_id = %task.id,
            agent = %task.assigned_agent_id,
            depth = task.delegation_depth,
            priority = ?task.priority,
            queued,
            "Task created"
        );
        Ok(CreatedTask { task, queued })
    }

    fn reject(&self, request: &NewTask, rejection: DelegationError) -> Error {
        warn!(
            target = %request.assigned_agent_id,
            requested_by = %request.requested_by,
            reason = %rejection,
            "Delegation rejected"
        );
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::DelegationRejected {
                    target_agent_id: request.assigned_agent_id.clone(),
                },
                &request.requested_by,
                &request.assigned_agent_id,
                AuditOutcome::Denied,
                Some(rejection.to_string()),
            );
        }
        self.event_bus.publish(DomainEvent::DelegationRejected {
            target_agent_id: request.assigned_agent_id.clone(),
            reason: rejection.to_string(),
            timestamp: Utc::now(),
        });
        Error::Delegation(rejection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ChannelTaskQueue;
    use aegis_store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        audit: Arc<AuditLogger>,
        service: TaskService,
        rx: tokio::sync::mpsc::Receiver<String>,
    }

    fn fixture(policy: DelegationPolicy) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let audit = Arc::new(AuditLogger::new());
        let (queue, rx) = ChannelTaskQueue::new(16);
        let service = TaskService::new(store.clone(), Arc::new(EventBus::default()))
            .with_queue(Arc::new(queue))
            .with_policy(policy)
            .with_audit(audit.clone());
        Fixture { store, audit, service, rx }
    }

    async fn delegate(f: &Fixture, from: Option<&Task>, agent: &str) -> Result<CreatedTask> {
        f.service
            .create_task(NewTask::delegated(
                "tester",
                from.map(|t| t.id.clone()),
                "sub task",
                "details",
                agent,
                TaskPriority::Low,
            ))
            .await
    }

    #[tokio::test]
    async fn user_tasks_queue_only_at_threshold() {
        let mut f = fixture(DelegationPolicy::default());
        let low = f
            .service
            .create_task(NewTask::user("later", "", "writer", TaskPriority::Medium))
            .await
            .unwrap();
        assert!(!low.queued);
        assert_eq!(low.task.delegation_depth, 0);

        let high = f
            .service
            .create_task(NewTask::user("now", "", "writer", TaskPriority::High))
            .await
            .unwrap();
        assert!(high.queued);
        assert_eq!(f.rx.recv().await.as_deref(), Some(high.task.id.as_str()));
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delegated_tasks_always_queue() {
        let mut f = fixture(DelegationPolicy::default());
        let root = delegate(&f, None, "A").await.unwrap();
        assert!(root.queued);
        assert_eq!(root.task.priority, TaskPriority::Low);

        let child = delegate(&f, Some(&root.task), "B").await.unwrap();
        assert!(child.queued);
        assert_eq!(child.task.delegation_depth, 1);
        assert_eq!(child.task.delegated_from.as_deref(), Some(root.task.id.as_str()));

        assert_eq!(f.rx.recv().await.as_deref(), Some(root.task.id.as_str()));
        assert_eq!(f.rx.recv().await.as_deref(), Some(child.task.id.as_str()));
        assert_eq!(f.audit.count(), 2);
    }

    #[tokio::test]
    async fn circular_delegation_creates_nothing() {
        let f = fixture(DelegationPolicy::default());
        let a = delegate(&f, None, "A").await.unwrap().task;
        let b = delegate(&f, Some(&a), "B").await.unwrap().task;
        let c = delegate(&f, Some(&b), "C").await.unwrap().task;
        assert_eq!(f.store.task_count().await, 3);

        let err = delegate(&f, Some(&c), "A").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delegation(DelegationError::CircularDelegation { ref agent_id }) if agent_id == "A"
        ));
        assert_eq!(f.store.task_count().await, 3);

        let denied = f.audit.entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].actor, "tester");
    }

    #[tokio::test]
    async fn depth_limit_creates_nothing() {
        let f = fixture(DelegationPolicy::default().with_max_depth(1));
        let root = delegate(&f, None, "A").await.unwrap().task;
        let child = delegate(&f, Some(&root), "B").await.unwrap().task;
        let err = delegate(&f, Some(&child), "C").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delegation(DelegationError::DepthExceeded { depth: 2, max_depth: 1 })
        ));
        assert_eq!(f.store.task_count().await, 2);
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let f = fixture(DelegationPolicy::default());
        let err = f
            .service
            .create_task(NewTask::delegated(
                "tester",
                Some("no-such-task".into()),
                "t",
                "",
                "B",
                TaskPriority::High,
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Delegation(DelegationError::SourceTaskNotFound(_))
        ));
        assert_eq!(f.store.task_count().await, 0);
    }

    #[tokio::test]
    async fn rejection_is_published() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::default());
        let mut events = bus.subscribe();
        let service = TaskService::new(store, bus.clone());

        let root = service
            .create_task(NewTask::delegated("x", None, "t", "", "A", TaskPriority::Low))
            .await
            .unwrap()
            .task;
        let _ = service
            .create_task(NewTask::delegated("x", Some(root.id.clone()), "t", "", "A", TaskPriority::Low))
            .await;

        let mut saw_rejection = false;
        while let Ok(event) = events.try_recv() {
            if let DomainEvent::DelegationRejected { target_agent_id, .. } = event.as_ref() {
                assert_eq!(target_agent_id, "A");
                saw_rejection = true;
            }
        }
        assert!(saw_rejection);
    }
}
