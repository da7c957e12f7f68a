//! Security module for Aegis: tool permission policy and audit logging.
//!
//! Provides:
//! - **Permission policy**: autonomy-level and allow/deny list checks before tool execution
//! - **Audit logging**: Structured security event logging

pub mod audit;
pub mod permission;

pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use permission::PolicyPermissionChecker;
