//! Store seams for the governance engine
//!
//! The engine talks to a document store through one trait per collection.
//! Each trait carries the conditional-write contract the concurrency model
//! relies on: transitions are serialized by guarded writes ("update only if
//! status is still PENDING", "insert version N only if the current max is
//! N−1"), never by an application-level lock. The loser of a race receives
//! [`GovernanceError::Conflict`].
//!
//! Two implementations ship: [`memory`] for tests and single-process use,
//! and [`postgres`] (feature `postgres`) backed by sqlx.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scriptgov_core::{
    ApprovalHistory, ApprovalRequest, ApprovalStatus, ApproverDecision, RoleAssignment, Script,
    ScriptVersion, UserRole,
};

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{
    MemoryApprovalStore, MemoryHistoryStore, MemoryRoleStore, MemoryScriptStore,
    MemoryVersionStore,
};

#[cfg(feature = "postgres")]
pub use postgres::{
    PostgresApprovalStore, PostgresHistoryStore, PostgresRoleStore, PostgresScriptStore,
    PostgresVersionStore,
};

/// Reviewer fields written by a guarded approval transition.
#[derive(Debug, Clone)]
pub struct ReviewUpdate {
    /// Terminal status to move to (APPROVED, REJECTED, or WITHDRAWN).
    pub status: ApprovalStatus,
    pub reviewed_by: String,
    pub reviewer_email: String,
    pub review_comment: Option<String>,
    pub reviewed_at: DateTime<Utc>,
    /// Decision appended to `currentApprovers`.
    pub decision: ApproverDecision,
}

/// User→role assignments, keyed by `user_id`.
#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<RoleAssignment>>;

    /// Insert or overwrite the assignment for `assignment.user_id`.
    /// Callers preserve `assigned_at` of an existing grant themselves; the
    /// store writes the struct it is given.
    async fn upsert(&self, assignment: RoleAssignment) -> Result<()>;

    /// Mark the assignment inactive. Returns false if no assignment exists.
    async fn deactivate(&self, user_id: &str) -> Result<bool>;

    /// Active assignments, newest `updated_at` first.
    async fn list_active(&self, skip: u64, limit: u64) -> Result<Vec<RoleAssignment>>;
}

/// Script documents, keyed by `script_id`.
#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn get(&self, script_id: &str) -> Result<Option<Script>>;

    async fn upsert(&self, script: Script) -> Result<()>;

    /// Update the denormalized approval mirror. Returns false if the script
    /// does not exist.
    async fn set_approval_state(
        &self,
        script_id: &str,
        status: ApprovalStatus,
        request_id: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Approval requests, keyed by `request_id`.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>>;

    /// Guarded insert: fails with `Conflict` if another PENDING request
    /// exists for the same `script_id`. This is what upholds the
    /// one-pending-request-per-script invariant.
    async fn insert_pending(&self, request: ApprovalRequest) -> Result<()>;

    /// Guarded transition: apply `update` only if the request's status is
    /// still PENDING (compare-and-swap on the status field). Returns the
    /// updated request on success; `Conflict` with the actual status when
    /// the request is already terminal; `NotFound` for an unknown id.
    async fn complete_if_pending(
        &self,
        request_id: &str,
        update: ReviewUpdate,
    ) -> Result<ApprovalRequest>;

    /// PENDING requests decidable by `role`, newest `requested_at` first.
    async fn list_pending_for_role(
        &self,
        role: UserRole,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<ApprovalRequest>>;

    /// Terminal-state requests, newest `updated_at` first.
    async fn list_completed(&self, skip: u64, limit: u64) -> Result<Vec<ApprovalRequest>>;
}

/// Append-only approval audit trail.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one record. Records are never mutated or deleted.
    async fn append(&self, record: ApprovalHistory) -> Result<()>;

    /// Records for a script, newest first, bounded by `limit`.
    async fn for_script(&self, script_id: &str, limit: u64) -> Result<Vec<ApprovalHistory>>;
}

/// Append-only script version log.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Highest version number for the script, 0 if none exist.
    async fn latest_version(&self, script_id: &str) -> Result<u32>;

    /// Guarded append: succeeds only if `version.version` equals the
    /// current max + 1 for the script. A duplicate or out-of-sequence
    /// number is a `Conflict`, which keeps the sequence gap-free under
    /// concurrent writers.
    async fn append(&self, version: ScriptVersion) -> Result<()>;

    /// Versions for a script, descending by version, bounded by `limit`.
    async fn list(&self, script_id: &str, limit: u64) -> Result<Vec<ScriptVersion>>;

    async fn get(&self, script_id: &str, version: u32) -> Result<Option<ScriptVersion>>;
}
