//! Domain types for the governance core
//!
//! Field names on the wire are part of the contract with existing consumers
//! (`userId`, `scriptId`, `requestId`, `requiredApprovers`, ...), so every
//! persisted struct serializes camelCase and state enums serialize UPPERCASE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Authorization role, ordered from least to most privileged.
///
/// The derived `Ord` gives VIEWER < DEVELOPER < MANAGER < ADMIN, which is the
/// rank order the role hierarchy relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Viewer,
    Developer,
    Manager,
    Admin,
}

impl UserRole {
    /// Every role, in ascending rank order.
    pub const ALL: [UserRole; 4] = [
        UserRole::Viewer,
        UserRole::Developer,
        UserRole::Manager,
        UserRole::Admin,
    ];
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Viewer => write!(f, "VIEWER"),
            UserRole::Developer => write!(f, "DEVELOPER"),
            UserRole::Manager => write!(f, "MANAGER"),
            UserRole::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Atomic capability checked by the authorization engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ScriptCreate,
    ScriptRead,
    ScriptUpdate,
    ScriptDelete,
    ScriptApprove,
    ScriptReject,
    ScriptRollback,
    UserManage,
    UserRoleAssign,
}

/// Approval request lifecycle state.
///
/// APPROVED, REJECTED, and WITHDRAWN are terminal; a terminal request is
/// immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl ApprovalStatus {
    /// Whether no further transitions are permitted from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::Withdrawn
        )
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Draft => write!(f, "DRAFT"),
            ApprovalStatus::Pending => write!(f, "PENDING"),
            ApprovalStatus::Approved => write!(f, "APPROVED"),
            ApprovalStatus::Rejected => write!(f, "REJECTED"),
            ApprovalStatus::Withdrawn => write!(f, "WITHDRAWN"),
        }
    }
}

/// Risk classification of a script's SQL content, used to choose the
/// required approver ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptType {
    /// SELECT/SHOW/EXPLAIN only; no state change.
    ReadQuery,
    /// Row data mutation (INSERT/UPDATE/DELETE/MERGE).
    DataChange,
    /// Schema mutation (CREATE/ALTER/DROP/TRUNCATE/RENAME).
    StructureChange,
    /// Privilege or server-level statements (GRANT/REVOKE/SET GLOBAL/...).
    SystemChange,
}

/// Request priority, informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Kind of mutation that produced a version snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Approve,
    Rollback,
}

/// Action recorded in the approval audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalAction {
    Submit,
    Approve,
    Reject,
    Withdraw,
    Rollback,
}

/// Durable mapping of a user identity to one authorization role.
///
/// One per `user_id`; created lazily on first authenticated access (as
/// VIEWER) or explicitly by a privileged caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Stable external identity, unique key.
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    /// User id of the granter ("system" for lazy provisioning).
    pub assigned_by: String,
    /// Timestamp of the original grant; preserved across re-grants.
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A governed SQL script.
///
/// `approval_status` mirrors the most recent non-withdrawn ApprovalRequest
/// for this script and is updated alongside every accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Immutable, human-chosen slug, globally unique.
    pub script_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_en: Option<String>,
    /// Business scope the script operates on.
    pub scope: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub sql_content: String,
    pub approval_status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<String>,
    pub is_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One approver's recorded decision on a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverDecision {
    pub user_id: String,
    pub email: String,
    pub action: ApprovalAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Unit of work tracking a script's path from submission to a terminal
/// decision. At most one non-terminal request exists per script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: String,
    pub script_id: String,
    pub script_type: ScriptType,
    pub status: ApprovalStatus,
    pub title: String,
    pub description: String,
    pub requester_id: String,
    pub requester_email: String,
    /// Roles allowed to decide this request, derived from `script_type`.
    pub required_approvers: Vec<UserRole>,
    /// Decisions recorded so far.
    #[serde(default)]
    pub current_approvers: Vec<ApproverDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub priority: Priority,
}

/// Append-only audit record, one per accepted decision. Never mutated or
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalHistory {
    pub history_id: String,
    pub request_id: String,
    pub script_id: String,
    pub action_by: String,
    pub action_by_email: String,
    pub action: ApprovalAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub action_at: DateTime<Utc>,
}

/// Immutable, numbered snapshot of a script at one point in time.
///
/// Versions per script form a gap-free increasing sequence starting at 1;
/// rollback appends a new version rather than editing an old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptVersion {
    pub script_id: String,
    pub version: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_en: Option<String>,
    pub scope: String,
    pub author: String,
    pub is_scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    pub sql_content: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub change_description: String,
    pub change_kind: ChangeKind,
}

impl ScriptVersion {
    /// Snapshot the tracked fields of `script` as version `version`.
    pub fn snapshot_of(
        script: &Script,
        version: u32,
        created_by: impl Into<String>,
        change_kind: ChangeKind,
        change_description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            script_id: script.script_id.clone(),
            version,
            name: script.name.clone(),
            name_en: script.name_en.clone(),
            description: script.description.clone(),
            description_en: script.description_en.clone(),
            scope: script.scope.clone(),
            author: script.author.clone(),
            is_scheduled: script.is_scheduled,
            cron_expression: script.cron_expression.clone(),
            sql_content: script.sql_content.clone(),
            created_by: created_by.into(),
            created_at,
            change_description: change_description.into(),
            change_kind,
        }
    }

    /// Write this snapshot's tracked fields back onto a live script.
    /// Used by rollback; identity, status, and timestamps are untouched.
    pub fn restore_onto(&self, script: &mut Script) {
        script.name = self.name.clone();
        script.name_en = self.name_en.clone();
        script.description = self.description.clone();
        script.description_en = self.description_en.clone();
        script.scope = self.scope.clone();
        script.author = self.author.clone();
        script.is_scheduled = self.is_scheduled;
        script.cron_expression = self.cron_expression.clone();
        script.sql_content = self.sql_content.clone();
    }
}
