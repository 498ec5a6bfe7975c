//! In-memory store implementations
//!
//! Used by the test suite and by single-process deployments. Every guard
//! the PostgreSQL implementations express as a conditional SQL write is
//! enforced here under the collection's write lock, so racing callers
//! observe exactly the same `Conflict` outcomes.

use crate::error::{GovernanceError, Result};
use crate::store::{
    ApprovalStore, HistoryStore, ReviewUpdate, RoleStore, ScriptStore, VersionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scriptgov_core::{
    ApprovalHistory, ApprovalRequest, ApprovalStatus, RoleAssignment, Script, ScriptVersion,
    UserRole,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory role assignment store.
#[derive(Default)]
pub struct MemoryRoleStore {
    assignments: Arc<RwLock<HashMap<String, RoleAssignment>>>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for MemoryRoleStore {
    async fn get(&self, user_id: &str) -> Result<Option<RoleAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(user_id).cloned())
    }

    async fn upsert(&self, assignment: RoleAssignment) -> Result<()> {
        let mut assignments = self.assignments.write().await;
        assignments.insert(assignment.user_id.clone(), assignment);
        Ok(())
    }

    async fn deactivate(&self, user_id: &str) -> Result<bool> {
        let mut assignments = self.assignments.write().await;
        match assignments.get_mut(user_id) {
            Some(assignment) => {
                assignment.is_active = false;
                assignment.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active(&self, skip: u64, limit: u64) -> Result<Vec<RoleAssignment>> {
        let assignments = self.assignments.read().await;
        let mut active: Vec<RoleAssignment> = assignments
            .values()
            .filter(|a| a.is_active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(active, skip, limit))
    }
}

/// In-memory script store.
#[derive(Default)]
pub struct MemoryScriptStore {
    scripts: Arc<RwLock<HashMap<String, Script>>>,
}

impl MemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn get(&self, script_id: &str) -> Result<Option<Script>> {
        let scripts = self.scripts.read().await;
        Ok(scripts.get(script_id).cloned())
    }

    async fn upsert(&self, script: Script) -> Result<()> {
        let mut scripts = self.scripts.write().await;
        scripts.insert(script.script_id.clone(), script);
        Ok(())
    }

    async fn set_approval_state(
        &self,
        script_id: &str,
        status: ApprovalStatus,
        request_id: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut scripts = self.scripts.write().await;
        match scripts.get_mut(script_id) {
            Some(script) => {
                script.approval_status = status;
                script.approval_request_id = request_id;
                script.updated_at = updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory approval request store.
#[derive(Default)]
pub struct MemoryApprovalStore {
    requests: Arc<RwLock<HashMap<String, ApprovalRequest>>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(request_id).cloned())
    }

    async fn insert_pending(&self, request: ApprovalRequest) -> Result<()> {
        let mut requests = self.requests.write().await;

        // single-PENDING-per-script guard, checked under the write lock
        if let Some(existing) = requests
            .values()
            .find(|r| r.script_id == request.script_id && r.status == ApprovalStatus::Pending)
        {
            return Err(GovernanceError::Conflict(format!(
                "script '{}' already has pending request '{}'",
                request.script_id, existing.request_id
            )));
        }

        requests.insert(request.request_id.clone(), request);
        Ok(())
    }

    async fn complete_if_pending(
        &self,
        request_id: &str,
        update: ReviewUpdate,
    ) -> Result<ApprovalRequest> {
        let mut requests = self.requests.write().await;

        let request = requests
            .get_mut(request_id)
            .ok_or_else(|| GovernanceError::NotFound(format!("approval request '{request_id}'")))?;

        if request.status != ApprovalStatus::Pending {
            return Err(GovernanceError::Conflict(format!(
                "request '{}' expected PENDING but is {}",
                request_id, request.status
            )));
        }

        request.status = update.status;
        request.reviewed_by = Some(update.reviewed_by);
        request.reviewer_email = Some(update.reviewer_email);
        request.review_comment = update.review_comment;
        request.reviewed_at = Some(update.reviewed_at);
        request.updated_at = update.reviewed_at;
        request.current_approvers.push(update.decision);

        Ok(request.clone())
    }

    async fn list_pending_for_role(
        &self,
        role: UserRole,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        let mut pending: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending && r.required_approvers.contains(&role))
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(page(pending, skip, limit))
    }

    async fn list_completed(&self, skip: u64, limit: u64) -> Result<Vec<ApprovalRequest>> {
        let requests = self.requests.read().await;
        let mut completed: Vec<ApprovalRequest> = requests
            .values()
            .filter(|r| r.status.is_terminal())
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(page(completed, skip, limit))
    }
}

/// In-memory append-only history store.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Arc<RwLock<Vec<ApprovalHistory>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, record: ApprovalHistory) -> Result<()> {
        let mut records = self.records.write().await;
        records.push(record);
        Ok(())
    }

    async fn for_script(&self, script_id: &str, limit: u64) -> Result<Vec<ApprovalHistory>> {
        let records = self.records.read().await;
        let mut matching: Vec<ApprovalHistory> = records
            .iter()
            .filter(|r| r.script_id == script_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.action_at.cmp(&a.action_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// In-memory append-only version store.
#[derive(Default)]
pub struct MemoryVersionStore {
    versions: Arc<RwLock<HashMap<String, Vec<ScriptVersion>>>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn latest_version(&self, script_id: &str) -> Result<u32> {
        let versions = self.versions.read().await;
        Ok(versions
            .get(script_id)
            .and_then(|list| list.iter().map(|v| v.version).max())
            .unwrap_or(0))
    }

    async fn append(&self, version: ScriptVersion) -> Result<()> {
        let mut versions = self.versions.write().await;
        let list = versions.entry(version.script_id.clone()).or_default();

        // monotonicity guard: the new number must be exactly max + 1
        let max = list.iter().map(|v| v.version).max().unwrap_or(0);
        if version.version != max + 1 {
            return Err(GovernanceError::Conflict(format!(
                "version {} for script '{}' expected {} (current max {})",
                version.version,
                version.script_id,
                max + 1,
                max
            )));
        }

        list.push(version);
        Ok(())
    }

    async fn list(&self, script_id: &str, limit: u64) -> Result<Vec<ScriptVersion>> {
        let versions = self.versions.read().await;
        let mut list = versions.get(script_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| b.version.cmp(&a.version));
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn get(&self, script_id: &str, version: u32) -> Result<Option<ScriptVersion>> {
        let versions = self.versions.read().await;
        Ok(versions
            .get(script_id)
            .and_then(|list| list.iter().find(|v| v.version == version))
            .cloned())
    }
}

fn page<T>(items: Vec<T>, skip: u64, limit: u64) -> Vec<T> {
    items
        .into_iter()
        .skip(skip as usize)
        .take(limit as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scriptgov_core::{ChangeKind, Priority, ScriptType};

    fn pending_request(request_id: &str, script_id: &str) -> ApprovalRequest {
        let now = Utc::now();
        ApprovalRequest {
            request_id: request_id.to_string(),
            script_id: script_id.to_string(),
            script_type: ScriptType::DataChange,
            status: ApprovalStatus::Pending,
            title: "test".to_string(),
            description: String::new(),
            requester_id: "u1".to_string(),
            requester_email: "u1@example.com".to_string(),
            required_approvers: vec![UserRole::Manager, UserRole::Admin],
            current_approvers: vec![],
            reviewed_by: None,
            reviewer_email: None,
            review_comment: None,
            reviewed_at: None,
            requested_at: now,
            updated_at: now,
            priority: Priority::Normal,
        }
    }

    fn version(script_id: &str, number: u32) -> ScriptVersion {
        ScriptVersion {
            script_id: script_id.to_string(),
            version: number,
            name: "n".to_string(),
            name_en: None,
            description: String::new(),
            description_en: None,
            scope: "s".to_string(),
            author: "a".to_string(),
            is_scheduled: false,
            cron_expression: None,
            sql_content: "SELECT 1".to_string(),
            created_by: "u1".to_string(),
            created_at: Utc::now(),
            change_description: "test".to_string(),
            change_kind: ChangeKind::Update,
        }
    }

    #[tokio::test]
    async fn test_single_pending_guard() {
        let store = MemoryApprovalStore::new();
        store.insert_pending(pending_request("r1", "s1")).await.unwrap();

        let err = store
            .insert_pending(pending_request("r2", "s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Conflict(_)));

        // a different script is unaffected
        store.insert_pending(pending_request("r3", "s2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cas_rejects_second_completion() {
        let store = MemoryApprovalStore::new();
        store.insert_pending(pending_request("r1", "s1")).await.unwrap();

        let update = |status| ReviewUpdate {
            status,
            reviewed_by: "m1".to_string(),
            reviewer_email: "m1@example.com".to_string(),
            review_comment: None,
            reviewed_at: Utc::now(),
            decision: scriptgov_core::ApproverDecision {
                user_id: "m1".to_string(),
                email: "m1@example.com".to_string(),
                action: scriptgov_core::ApprovalAction::Approve,
                comment: None,
                decided_at: Utc::now(),
            },
        };

        let approved = store
            .complete_if_pending("r1", update(ApprovalStatus::Approved))
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);

        let err = store
            .complete_if_pending("r1", update(ApprovalStatus::Rejected))
            .await
            .unwrap_err();
        match err {
            GovernanceError::Conflict(reason) => {
                assert!(reason.contains("APPROVED"), "reason was: {reason}")
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_version_append_guard() {
        let store = MemoryVersionStore::new();
        store.append(version("s1", 1)).await.unwrap();
        store.append(version("s1", 2)).await.unwrap();

        // duplicate
        assert!(matches!(
            store.append(version("s1", 2)).await.unwrap_err(),
            GovernanceError::Conflict(_)
        ));
        // gap
        assert!(matches!(
            store.append(version("s1", 4)).await.unwrap_err(),
            GovernanceError::Conflict(_)
        ));

        assert_eq!(store.latest_version("s1").await.unwrap(), 2);
        assert_eq!(store.latest_version("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_listing_filters_by_role() {
        let store = MemoryApprovalStore::new();
        let mut admin_only = pending_request("r1", "s1");
        admin_only.required_approvers = vec![UserRole::Admin];
        store.insert_pending(admin_only).await.unwrap();
        store.insert_pending(pending_request("r2", "s2")).await.unwrap();

        let for_manager = store
            .list_pending_for_role(UserRole::Manager, 0, 10)
            .await
            .unwrap();
        assert_eq!(for_manager.len(), 1);
        assert_eq!(for_manager[0].request_id, "r2");

        let for_admin = store
            .list_pending_for_role(UserRole::Admin, 0, 10)
            .await
            .unwrap();
        assert_eq!(for_admin.len(), 2);
    }
}
