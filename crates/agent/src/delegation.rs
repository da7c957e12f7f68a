//! Delegation guard: bounded depth and no cycles.
//!
//! A task delegated from `source` gets `depth = source.depth + 1`. The
//! request is refused when that depth exceeds the policy maximum, or (with
//! the circular check on) when the target agent already owns the source
//! task or any of its ancestors. The depth check runs first.

use aegis_config::DelegationPolicy;
use aegis_core::error::{DelegationError, Result};
use aegis_core::task::{Task, TaskRepository};
use tracing::debug;

/// Parent link and depth for a task that passed the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationGrant {
    pub depth: u32,
    pub delegated_from: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DelegationTracker {
    policy: DelegationPolicy,
}

impl DelegationTracker {
    pub fn new(policy: DelegationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DelegationPolicy {
        &self.policy
    }

    /// Decide whether a task for `target_agent_id` may be created.
    ///
    /// `ancestors` are the source task's parent, grandparent, ... nearest
    /// first, as returned by [`TaskRepository::ancestors_of`].
    pub fn accept(
        &self,
        source: Option<&Task>,
        ancestors: &[Task],
        target_agent_id: &str,
    ) -> std::result::Result<DelegationGrant, DelegationError> {
        let Some(source) = source else {
            return Ok(DelegationGrant {
                depth: 0,
                delegated_from: None,
            });
        };

        let depth = source.delegation_depth + 1;
        if depth > self.policy.max_depth {
            return Err(DelegationError::DepthExceeded {
                depth,
                max_depth: self.policy.max_depth,
            });
        }

        if self.policy.circular_check
            && std::iter::once(source)
                .chain(ancestors)
                .any(|t| t.assigned_agent_id == target_agent_id)
        {
            return Err(DelegationError::CircularDelegation {
                agent_id: target_agent_id.to_string(),
            });
        }

        debug!(source_task = %source.id, target = %target_agent_id, depth, "Delegation accepted");
        Ok(DelegationGrant {
            depth,
            delegated_from: Some(source.id.clone()),
        })
    }
}

/// Load a source task and its ancestor chain.
pub async fn resolve_chain(repo: &dyn TaskRepository, source_task_id: &str) -> Result<(Task, Vec<Task>)> {
    let source = repo
        .find_by_id(source_task_id)
        .await?
        .ok_or_else(|| DelegationError::SourceTaskNotFound(source_task_id.to_string()))?;
    let ancestors = repo.ancestors_of(&source).await?;
    Ok((source, ancestors))
}
