//! Permission policy built from the `[autonomy]` config section.
//!
//! Rules, in order:
//! 1. A tool in `denied_tools` is always denied.
//! 2. `full` allows everything else.
//! 3. `read_only` allows only the `read` action.
//! 4. `supervised` allows `read` and `delegate`, and anything in
//!    `allowed_tools`. Everything else needs approval.

use aegis_config::{AutonomyConfig, AutonomyLevel};
use aegis_core::permission::{PermissionChecker, PermissionDecision};
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct PolicyPermissionChecker {
    config: AutonomyConfig,
}

impl PolicyPermissionChecker {
    pub fn new(config: AutonomyConfig) -> Self {
        Self { config }
    }

    pub fn level(&self) -> AutonomyLevel {
        self.config.level
    }

    fn decide(&self, tool_name: &str, action: &str) -> PermissionDecision {
        if self.config.denied_tools.iter().any(|t| t == tool_name) {
            return PermissionDecision::Denied {
                reason: format!("tool '{tool_name}' is on the deny list"),
            };
        }

        match self.config.level {
            AutonomyLevel::Full => PermissionDecision::Allowed,
            AutonomyLevel::ReadOnly if action == "read" => PermissionDecision::Allowed,
            AutonomyLevel::ReadOnly => PermissionDecision::Denied {
                reason: format!("'{action}' is not permitted in read-only mode"),
            },
            AutonomyLevel::Supervised => {
                if action == "read"
                    || action == "delegate"
                    || self.config.allowed_tools.iter().any(|t| t == tool_name)
                {
                    PermissionDecision::Allowed
                } else {
                    PermissionDecision::NeedsApproval {
                        reason: format!("'{action}' via '{tool_name}' needs approval in supervised mode"),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PermissionChecker for PolicyPermissionChecker {
    async fn check(
        &self,
        tool_name: &str,
        action: &str,
        _params: &serde_json::Value,
    ) -> PermissionDecision {
        let decision = self.decide(tool_name, action);
        if !decision.is_allowed() {
            tracing::debug!(tool = %tool_name, action = %action, ?decision, "Tool call not allowed outright");
        }
        decision
    }
}
