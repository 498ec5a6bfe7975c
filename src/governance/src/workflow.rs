//! Approval workflow state machine
//!
//! `DRAFT → PENDING → {APPROVED, REJECTED}`, with `WITHDRAWN` reachable from
//! PENDING. DRAFT only exists before a request is created; terminal requests
//! are immutable.
//!
//! Every transition is a guarded write against the approval store; the
//! compare-and-swap on `status` is what makes double-approval a `Conflict`
//! for the loser instead of a silent second success. Each accepted
//! transition appends one history record, updates the script's denormalized
//! status mirror, and (for submission and approval) snapshots a version.
//!
//! Permission checks happen at the boundary via the authorization engine;
//! this component still validates structural preconditions itself:
//! existence, state, reviewer eligibility, and the self-approval ban.

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::store::{ApprovalStore, HistoryStore, ReviewUpdate, RoleStore, ScriptStore};
use crate::versioning::VersionControl;
use chrono::Utc;
use scriptgov_core::{
    ApprovalAction, ApprovalHistory, ApprovalRequest, ApprovalStatus, ApproverDecision,
    ChangeKind, Priority, Script, ScriptClassifier, ScriptType, UserRole,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Approver ranks required for a risk class. Higher risk narrows the set.
pub fn required_approvers_for(script_type: ScriptType) -> Vec<UserRole> {
    match script_type {
        ScriptType::ReadQuery | ScriptType::DataChange => {
            vec![UserRole::Manager, UserRole::Admin]
        }
        ScriptType::StructureChange | ScriptType::SystemChange => vec![UserRole::Admin],
    }
}

/// Input to [`ApprovalWorkflow::create_approval_request`].
#[derive(Debug, Clone)]
pub struct CreateRequestParams {
    pub script_id: String,
    pub requester_id: String,
    pub requester_email: String,
    pub sql_content: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    /// Business scope shown on the script document.
    pub scope: String,
    pub name_en: Option<String>,
    pub description_en: Option<String>,
    pub tags: Vec<String>,
    pub is_scheduled: bool,
    pub cron_expression: Option<String>,
}

/// Outcome of an accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub request_id: String,
    pub script_id: String,
    pub status: ApprovalStatus,
    pub message: String,
    /// Version appended by this transition, if it snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u32>,
}

/// The approval request lifecycle over guarded store writes.
pub struct ApprovalWorkflow {
    approvals: Arc<dyn ApprovalStore>,
    scripts: Arc<dyn ScriptStore>,
    roles: Arc<dyn RoleStore>,
    history: Arc<dyn HistoryStore>,
    versions: Arc<VersionControl>,
    classifier: Arc<dyn ScriptClassifier>,
    config: GovernanceConfig,
}

impl ApprovalWorkflow {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        scripts: Arc<dyn ScriptStore>,
        roles: Arc<dyn RoleStore>,
        history: Arc<dyn HistoryStore>,
        versions: Arc<VersionControl>,
        classifier: Arc<dyn ScriptClassifier>,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            approvals,
            scripts,
            roles,
            history,
            versions,
            classifier,
            config,
        }
    }

    /// Submit a script for approval.
    ///
    /// Classifies the SQL, derives the required approver ranks, and inserts
    /// the request PENDING. The insert is guarded, so a second submission while one is
    /// pending returns `Conflict`. The script document is created or
    /// updated to mirror the new state and a version is snapshotted.
    pub async fn create_approval_request(
        &self,
        params: CreateRequestParams,
    ) -> Result<ApprovalRequest> {
        if params.sql_content.trim().is_empty() {
            return Err(GovernanceError::InvalidState(
                "sqlContent must not be empty".to_string(),
            ));
        }
        if params.title.trim().is_empty() {
            return Err(GovernanceError::InvalidState(
                "title must not be empty".to_string(),
            ));
        }

        let script_type = self.classifier.classify(&params.sql_content);
        let required_approvers = required_approvers_for(script_type);
        let now = Utc::now();

        let request = ApprovalRequest {
            request_id: Uuid::new_v4().to_string(),
            script_id: params.script_id.clone(),
            script_type,
            status: ApprovalStatus::Pending,
            title: params.title.clone(),
            description: params.description.clone(),
            requester_id: params.requester_id.clone(),
            requester_email: params.requester_email.clone(),
            required_approvers,
            current_approvers: vec![],
            reviewed_by: None,
            reviewer_email: None,
            review_comment: None,
            reviewed_at: None,
            requested_at: now,
            updated_at: now,
            priority: params.priority,
        };

        // the single-PENDING-per-script guard lives in the store
        self.approvals.insert_pending(request.clone()).await?;

        let script = match self.scripts.get(&params.script_id).await? {
            Some(mut existing) => {
                existing.name = params.title.clone();
                existing.name_en = params.name_en.clone();
                existing.description = params.description.clone();
                existing.description_en = params.description_en.clone();
                existing.sql_content = params.sql_content.clone();
                existing.tags = params.tags.clone();
                existing.is_scheduled = params.is_scheduled;
                existing.cron_expression = params.cron_expression.clone();
                existing.approval_status = ApprovalStatus::Pending;
                existing.approval_request_id = Some(request.request_id.clone());
                existing.updated_at = now;
                existing
            }
            None => Script {
                script_id: params.script_id.clone(),
                name: params.title.clone(),
                name_en: params.name_en.clone(),
                description: params.description.clone(),
                description_en: params.description_en.clone(),
                scope: params.scope.clone(),
                author: params.requester_id.clone(),
                tags: params.tags.clone(),
                sql_content: params.sql_content.clone(),
                approval_status: ApprovalStatus::Pending,
                approval_request_id: Some(request.request_id.clone()),
                is_scheduled: params.is_scheduled,
                cron_expression: params.cron_expression.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        // a script resubmitted after rejection already has versions
        let (kind, note) = if self.versions.latest_version(&params.script_id).await? == 0 {
            (ChangeKind::Create, "Submitted for approval")
        } else {
            (ChangeKind::Update, "Resubmitted for approval")
        };
        self.versions
            .record_snapshot(
                &script,
                &params.requester_id,
                kind,
                format!("{}: {}", note, params.title),
            )
            .await?;

        self.scripts.upsert(script).await?;

        self.append_history(
            &request,
            &params.requester_id,
            &params.requester_email,
            ApprovalAction::Submit,
            Some(params.description.clone()),
        )
        .await?;

        info!(
            request_id = %request.request_id,
            script_id = %request.script_id,
            ?script_type,
            "approval request created"
        );

        Ok(request)
    }

    /// Approve a pending request.
    ///
    /// The CAS on status guarantees exactly one of any set of concurrent
    /// decisions wins; all others see `Conflict` with the actual state.
    pub async fn approve_script(
        &self,
        request_id: &str,
        user_id: &str,
        user_email: &str,
        comment: Option<String>,
    ) -> Result<ApprovalOutcome> {
        let request = self.load_request(request_id).await?;
        self.check_reviewer(&request, user_id).await?;

        let now = Utc::now();
        let update = ReviewUpdate {
            status: ApprovalStatus::Approved,
            reviewed_by: user_id.to_string(),
            reviewer_email: user_email.to_string(),
            review_comment: comment.clone(),
            reviewed_at: now,
            decision: ApproverDecision {
                user_id: user_id.to_string(),
                email: user_email.to_string(),
                action: ApprovalAction::Approve,
                comment: comment.clone(),
                decided_at: now,
            },
        };

        let approved = self.approvals.complete_if_pending(request_id, update).await?;

        // the transition is committed; the audit record comes first, then
        // best-effort bookkeeping
        self.append_history(&approved, user_id, user_email, ApprovalAction::Approve, comment)
            .await?;

        let snapshot_version = self
            .finish_transition(&approved, ApprovalStatus::Approved, user_id, true)
            .await;

        info!(request_id, user_id, "request approved");

        Ok(ApprovalOutcome {
            request_id: request_id.to_string(),
            script_id: approved.script_id,
            status: ApprovalStatus::Approved,
            message: "approved".to_string(),
            snapshot_version,
        })
    }

    /// Reject a pending request. The comment is mandatory.
    pub async fn reject_script(
        &self,
        request_id: &str,
        user_id: &str,
        user_email: &str,
        comment: String,
    ) -> Result<ApprovalOutcome> {
        if comment.trim().is_empty() {
            return Err(GovernanceError::InvalidState(
                "a rejection requires a comment".to_string(),
            ));
        }

        let request = self.load_request(request_id).await?;
        self.check_reviewer(&request, user_id).await?;

        let now = Utc::now();
        let update = ReviewUpdate {
            status: ApprovalStatus::Rejected,
            reviewed_by: user_id.to_string(),
            reviewer_email: user_email.to_string(),
            review_comment: Some(comment.clone()),
            reviewed_at: now,
            decision: ApproverDecision {
                user_id: user_id.to_string(),
                email: user_email.to_string(),
                action: ApprovalAction::Reject,
                comment: Some(comment.clone()),
                decided_at: now,
            },
        };

        let rejected = self.approvals.complete_if_pending(request_id, update).await?;

        self.append_history(
            &rejected,
            user_id,
            user_email,
            ApprovalAction::Reject,
            Some(comment),
        )
        .await?;

        self.finish_transition(&rejected, ApprovalStatus::Rejected, user_id, false)
            .await;

        info!(request_id, user_id, "request rejected");

        Ok(ApprovalOutcome {
            request_id: request_id.to_string(),
            script_id: rejected.script_id,
            status: ApprovalStatus::Rejected,
            message: "rejected".to_string(),
            snapshot_version: None,
        })
    }

    /// Withdraw a pending request. Only the requester may withdraw; the
    /// script mirror reverts to DRAFT so a new request can be submitted.
    pub async fn withdraw_request(
        &self,
        request_id: &str,
        user_id: &str,
        user_email: &str,
    ) -> Result<ApprovalOutcome> {
        let request = self.load_request(request_id).await?;

        if request.requester_id != user_id {
            return Err(GovernanceError::Unauthorized(
                "only the requester may withdraw a request".to_string(),
            ));
        }

        let now = Utc::now();
        let update = ReviewUpdate {
            status: ApprovalStatus::Withdrawn,
            reviewed_by: user_id.to_string(),
            reviewer_email: user_email.to_string(),
            review_comment: None,
            reviewed_at: now,
            decision: ApproverDecision {
                user_id: user_id.to_string(),
                email: user_email.to_string(),
                action: ApprovalAction::Withdraw,
                comment: None,
                decided_at: now,
            },
        };

        let withdrawn = self.approvals.complete_if_pending(request_id, update).await?;

        self.append_history(&withdrawn, user_id, user_email, ApprovalAction::Withdraw, None)
            .await?;

        // a withdrawn request no longer governs the script
        match self
            .scripts
            .set_approval_state(&withdrawn.script_id, ApprovalStatus::Draft, None, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(script_id = %withdrawn.script_id, "script missing while withdrawing")
            }
            Err(e) => {
                warn!(script_id = %withdrawn.script_id, error = %e, "mirror update failed while withdrawing")
            }
        }

        info!(request_id, user_id, "request withdrawn");

        Ok(ApprovalOutcome {
            request_id: request_id.to_string(),
            script_id: withdrawn.script_id,
            status: ApprovalStatus::Withdrawn,
            message: "withdrawn".to_string(),
            snapshot_version: None,
        })
    }

    /// PENDING requests the caller is eligible to decide, newest first.
    pub async fn get_pending_approvals(
        &self,
        user_id: &str,
        page: u64,
        limit: u64,
    ) -> Result<Vec<ApprovalRequest>> {
        let role = self.reviewer_role(user_id).await?;
        let (skip, limit) = self.config.pagination(page, limit);
        self.approvals.list_pending_for_role(role, skip, limit).await
    }

    /// Terminal-state requests for audit views, newest first. Read access
    /// is gated at the boundary with a lower-bar permission, not here.
    pub async fn get_completed_approvals(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<Vec<ApprovalRequest>> {
        let (skip, limit) = self.config.pagination(page, limit);
        self.approvals.list_completed(skip, limit).await
    }

    /// Audit trail for one script, newest first.
    pub async fn get_approval_history(
        &self,
        script_id: &str,
        limit: u64,
    ) -> Result<Vec<ApprovalHistory>> {
        let limit = if limit == 0 {
            self.config.default_page_size
        } else {
            limit.min(self.config.max_page_size)
        };
        self.history.for_script(script_id, limit).await
    }

    async fn load_request(&self, request_id: &str) -> Result<ApprovalRequest> {
        self.approvals
            .get(request_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("approval request '{request_id}'")))
    }

    /// Structural preconditions for a reviewer: eligibility by rank and the
    /// self-approval ban. Runs before the CAS so an ineligible caller never
    /// consumes the transition.
    async fn check_reviewer(&self, request: &ApprovalRequest, user_id: &str) -> Result<()> {
        if !self.config.allow_self_approval && request.requester_id == user_id {
            return Err(GovernanceError::Unauthorized(
                "requesters may not review their own request".to_string(),
            ));
        }

        let role = self.reviewer_role(user_id).await?;
        if !request.required_approvers.contains(&role) {
            return Err(GovernanceError::Unauthorized(format!(
                "role {role} is not an eligible approver for this request"
            )));
        }

        Ok(())
    }

    async fn reviewer_role(&self, user_id: &str) -> Result<UserRole> {
        Ok(self
            .roles
            .get(user_id)
            .await?
            .filter(|a| a.is_active)
            .map(|a| a.role)
            .unwrap_or(UserRole::Viewer))
    }

    /// Post-CAS bookkeeping: mirror update and, for approvals, the version
    /// snapshot. The transition itself has already committed; problems here
    /// are logged, not turned into a misleading failure.
    async fn finish_transition(
        &self,
        request: &ApprovalRequest,
        status: ApprovalStatus,
        user_id: &str,
        snapshot: bool,
    ) -> Option<u32> {
        let now = Utc::now();
        match self
            .scripts
            .set_approval_state(
                &request.script_id,
                status,
                Some(request.request_id.clone()),
                now,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(script_id = %request.script_id, "script missing while updating mirror");
                return None;
            }
            Err(e) => {
                warn!(script_id = %request.script_id, error = %e, "mirror update failed after transition");
                return None;
            }
        }

        if !snapshot {
            return None;
        }

        let script = match self.scripts.get(&request.script_id).await {
            Ok(Some(script)) => script,
            Ok(None) => return None,
            Err(e) => {
                warn!(script_id = %request.script_id, error = %e, "script read failed after transition");
                return None;
            }
        };

        match self
            .versions
            .record_snapshot(
                &script,
                user_id,
                ChangeKind::Approve,
                format!("Approved request {}", request.request_id),
            )
            .await
        {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(script_id = %request.script_id, error = %e, "snapshot failed after transition");
                None
            }
        }
    }

    async fn append_history(
        &self,
        request: &ApprovalRequest,
        action_by: &str,
        action_by_email: &str,
        action: ApprovalAction,
        comment: Option<String>,
    ) -> Result<()> {
        self.history
            .append(ApprovalHistory {
                history_id: Uuid::new_v4().to_string(),
                request_id: request.request_id.clone(),
                script_id: request.script_id.clone(),
                action_by: action_by.to_string(),
                action_by_email: action_by_email.to_string(),
                action,
                comment,
                action_at: Utc::now(),
            })
            .await
    }
}
