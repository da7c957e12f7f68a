//! Permission check contract consulted before every tool execution.
//!
//! The decision is final: the engine converts `Denied` and `NeedsApproval`
//! into a descriptive tool-result turn and never executes the tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PermissionDecision {
    Allowed,
    Denied { reason: String },
    NeedsApproval { reason: String },
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Decide whether `tool_name` may perform `action` with `params`.
    async fn check(
        &self,
        tool_name: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> PermissionDecision;
}

/// Allows everything. Used when no policy is configured.
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn check(&self, _: &str, _: &str, _: &serde_json::Value) -> PermissionDecision {
        PermissionDecision::Allowed
    }
}
