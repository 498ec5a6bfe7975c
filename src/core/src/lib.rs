//! # Script Governance Core Types
//!
//! Pure domain layer for the script governance engine:
//!
//! - **Closed sum types** for roles, permissions, approval states, and risk
//!   classes; no open string comparisons in handlers
//! - **Static permission registry** compiled into the binary
//! - **Role hierarchy** with a total order over roles
//! - **SQL risk classifier** seam with a keyword-based default
//! - **Persisted record shapes** with a camelCase wire contract
//!
//! This crate performs no I/O; everything async lives in
//! `scriptgov-governance`.

pub mod classifier;
pub mod hierarchy;
pub mod permissions;
pub mod types;

pub use classifier::{ScriptClassifier, SqlRiskClassifier};
pub use hierarchy::can_manage_role;
pub use permissions::{permissions_for, role_has_permission};
pub use types::{
    ApprovalAction, ApprovalHistory, ApprovalRequest, ApprovalStatus, ApproverDecision,
    ChangeKind, Permission, Priority, RoleAssignment, Script, ScriptType, ScriptVersion,
    UserRole,
};
