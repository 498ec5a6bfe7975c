//! Authorization engine
//!
//! Resolves a caller's role, checks it against the static permission
//! registry, and manages role assignments under the strict hierarchy.
//!
//! Two rules are absolute:
//!
//! - permission checks **fail closed**: if the role store is unreachable,
//!   the answer is "not authorized", never an error the caller might map to
//!   "allow"
//! - denial is a value, not an error: `require_permission` only reports,
//!   it never returns `Err` for a missing capability

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::store::RoleStore;
use chrono::Utc;
use scriptgov_core::{can_manage_role, role_has_permission, Permission, RoleAssignment, UserRole};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub authorized: bool,
    /// The caller's resolved role; `None` when the store was unreachable.
    pub user_role: Option<UserRole>,
    /// Denial reason, absent on success. Never names the permission-table
    /// entry, only the caller's role.
    pub reason: Option<String>,
}

impl PermissionCheck {
    fn granted(role: UserRole) -> Self {
        Self {
            authorized: true,
            user_role: Some(role),
            reason: None,
        }
    }

    fn denied(role: UserRole) -> Self {
        Self {
            authorized: false,
            user_role: Some(role),
            reason: Some(format!("insufficient permission for role {role}")),
        }
    }

    fn failed_closed(detail: &str) -> Self {
        Self {
            authorized: false,
            user_role: None,
            reason: Some(format!("role store unavailable: {detail}")),
        }
    }
}

/// Role resolution and role management.
pub struct AuthorizationEngine {
    roles: Arc<dyn RoleStore>,
    config: GovernanceConfig,
}

impl AuthorizationEngine {
    pub fn new(roles: Arc<dyn RoleStore>, config: GovernanceConfig) -> Self {
        Self { roles, config }
    }

    /// Check whether `user_id` carries `permission`.
    ///
    /// An unknown user is lazily provisioned as VIEWER; that write is the
    /// only side effect. Store failure fails closed.
    pub async fn require_permission(
        &self,
        user_id: &str,
        email: &str,
        permission: Permission,
    ) -> PermissionCheck {
        let role = match self.resolve_role(user_id, email).await {
            Ok(role) => role,
            Err(e) => {
                warn!(user_id, error = %e, "permission check failed closed");
                return PermissionCheck::failed_closed(&e.to_string());
            }
        };

        if role_has_permission(role, permission) {
            debug!(user_id, %role, ?permission, "permission granted");
            PermissionCheck::granted(role)
        } else {
            debug!(user_id, %role, ?permission, "permission denied");
            PermissionCheck::denied(role)
        }
    }

    /// The caller's effective role: their active assignment, or VIEWER for
    /// unknown and deactivated users. Provisions the VIEWER assignment on
    /// first sight.
    pub async fn resolve_role(&self, user_id: &str, email: &str) -> Result<UserRole> {
        match self.roles.get(user_id).await? {
            Some(assignment) if assignment.is_active => Ok(assignment.role),
            Some(_) => Ok(UserRole::Viewer),
            None => {
                let now = Utc::now();
                let assignment = RoleAssignment {
                    user_id: user_id.to_string(),
                    email: email.to_string(),
                    role: UserRole::Viewer,
                    assigned_by: "system".to_string(),
                    assigned_at: now,
                    updated_at: now,
                    is_active: true,
                };
                self.roles.upsert(assignment).await?;
                info!(user_id, "provisioned default VIEWER assignment");
                Ok(UserRole::Viewer)
            }
        }
    }

    /// Current assignment for a user, if any.
    pub async fn get_user_role(&self, user_id: &str) -> Result<Option<RoleAssignment>> {
        self.roles.get(user_id).await
    }

    /// First-run bootstrap: grant ADMIN directly, permitted only while no
    /// active ADMIN assignment exists. Deployments seed their first
    /// administrator through this instead of editing the store by hand.
    pub async fn bootstrap_admin(&self, user_id: &str, email: &str) -> Result<RoleAssignment> {
        let active = self.roles.list_active(0, u64::MAX).await?;
        if let Some(admin) = active.iter().find(|a| a.role == UserRole::Admin) {
            return Err(GovernanceError::InvalidState(format!(
                "an active ADMIN already exists ('{}')",
                admin.user_id
            )));
        }

        let existing = self.roles.get(user_id).await?;
        let now = Utc::now();
        let assignment = RoleAssignment {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role: UserRole::Admin,
            assigned_by: "bootstrap".to_string(),
            assigned_at: existing.as_ref().map(|a| a.assigned_at).unwrap_or(now),
            updated_at: now,
            is_active: true,
        };
        self.roles.upsert(assignment.clone()).await?;
        info!(user_id, "bootstrapped first ADMIN");
        Ok(assignment)
    }

    /// Assign `role` to `target_user_id`.
    ///
    /// The assigner must outrank both the new role and the target's current
    /// role; self-modification is reserved for ADMIN. The original
    /// `assigned_at` survives a re-grant, only `updated_at` moves.
    pub async fn set_user_role(
        &self,
        target_user_id: &str,
        target_email: &str,
        role: UserRole,
        assigned_by: &str,
    ) -> Result<RoleAssignment> {
        let assigner_role = self.assigner_role(assigned_by).await?;

        if target_user_id == assigned_by && assigner_role != UserRole::Admin {
            return Err(GovernanceError::Unauthorized(format!(
                "role {assigner_role} may not modify its own assignment"
            )));
        }

        if !can_manage_role(assigner_role, role) {
            return Err(GovernanceError::Unauthorized(format!(
                "role {assigner_role} may not assign {role}"
            )));
        }

        let existing = self.roles.get(target_user_id).await?;
        if let Some(current) = &existing {
            if current.is_active && !can_manage_role(assigner_role, current.role) {
                return Err(GovernanceError::Unauthorized(format!(
                    "role {assigner_role} may not change a {} assignment",
                    current.role
                )));
            }
        }

        let now = Utc::now();
        let assignment = RoleAssignment {
            user_id: target_user_id.to_string(),
            email: target_email.to_string(),
            role,
            assigned_by: assigned_by.to_string(),
            // first-grant time is part of the audit trail
            assigned_at: existing.as_ref().map(|a| a.assigned_at).unwrap_or(now),
            updated_at: now,
            is_active: true,
        };

        self.roles.upsert(assignment.clone()).await?;
        info!(target_user_id, %role, assigned_by, "role assigned");
        Ok(assignment)
    }

    /// Deactivate a user's assignment. Never permitted on oneself.
    pub async fn remove_user_role(&self, target_user_id: &str, removed_by: &str) -> Result<()> {
        if target_user_id == removed_by {
            return Err(GovernanceError::Unauthorized(
                "callers may not remove their own role".to_string(),
            ));
        }

        let remover_role = self.assigner_role(removed_by).await?;

        let target = self
            .roles
            .get(target_user_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("role assignment '{target_user_id}'")))?;

        if !can_manage_role(remover_role, target.role) {
            return Err(GovernanceError::Unauthorized(format!(
                "role {remover_role} may not remove a {} assignment",
                target.role
            )));
        }

        if !self.roles.deactivate(target_user_id).await? {
            return Err(GovernanceError::NotFound(format!(
                "role assignment '{target_user_id}'"
            )));
        }

        info!(target_user_id, removed_by, "role assignment deactivated");
        Ok(())
    }

    /// Active assignments, newest-updated first, 1-based page.
    pub async fn get_all_user_roles(&self, page: u64, limit: u64) -> Result<Vec<RoleAssignment>> {
        let (skip, limit) = self.config.pagination(page, limit);
        self.roles.list_active(skip, limit).await
    }

    async fn assigner_role(&self, user_id: &str) -> Result<UserRole> {
        Ok(self
            .roles
            .get(user_id)
            .await?
            .filter(|a| a.is_active)
            .map(|a| a.role)
            .unwrap_or(UserRole::Viewer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRoleStore;

    fn engine() -> AuthorizationEngine {
        AuthorizationEngine::new(Arc::new(MemoryRoleStore::new()), GovernanceConfig::default())
    }

    async fn seed(engine: &AuthorizationEngine, user_id: &str, role: UserRole) {
        let now = Utc::now();
        engine
            .roles
            .upsert(RoleAssignment {
                user_id: user_id.to_string(),
                email: format!("{user_id}@example.com"),
                role,
                assigned_by: "seed".to_string(),
                assigned_at: now,
                updated_at: now,
                is_active: true,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_user_provisioned_as_viewer() {
        let engine = engine();

        let check = engine
            .require_permission("new-user", "new@example.com", Permission::ScriptRead)
            .await;
        assert!(check.authorized);
        assert_eq!(check.user_role, Some(UserRole::Viewer));

        // the lazy write persisted
        let assignment = engine.get_user_role("new-user").await.unwrap().unwrap();
        assert_eq!(assignment.role, UserRole::Viewer);
        assert_eq!(assignment.assigned_by, "system");
    }

    #[tokio::test]
    async fn test_denial_is_a_value_not_an_error() {
        let engine = engine();
        seed(&engine, "dev1", UserRole::Developer).await;

        let check = engine
            .require_permission("dev1", "dev1@example.com", Permission::ScriptApprove)
            .await;
        assert!(!check.authorized);
        assert_eq!(check.user_role, Some(UserRole::Developer));
        let reason = check.reason.unwrap();
        assert!(reason.contains("DEVELOPER"));
        // the denial must not leak the permission table entry
        assert!(!reason.contains("SCRIPT_APPROVE"));
    }

    #[tokio::test]
    async fn test_set_role_respects_hierarchy() {
        let engine = engine();
        seed(&engine, "admin1", UserRole::Admin).await;
        seed(&engine, "mgr1", UserRole::Manager).await;

        // manager can grant developer
        engine
            .set_user_role("u1", "u1@example.com", UserRole::Developer, "mgr1")
            .await
            .unwrap();

        // manager cannot grant manager or admin
        for role in [UserRole::Manager, UserRole::Admin] {
            let err = engine
                .set_user_role("u2", "u2@example.com", role, "mgr1")
                .await
                .unwrap_err();
            assert!(matches!(err, GovernanceError::Unauthorized(_)));
        }

        // manager cannot touch an existing admin assignment
        let err = engine
            .set_user_role("admin1", "admin1@example.com", UserRole::Viewer, "mgr1")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));

        // admin can do all of the above
        engine
            .set_user_role("u2", "u2@example.com", UserRole::Admin, "admin1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_self_modification_admin_only() {
        let engine = engine();
        seed(&engine, "admin1", UserRole::Admin).await;
        seed(&engine, "mgr1", UserRole::Manager).await;

        let err = engine
            .set_user_role("mgr1", "mgr1@example.com", UserRole::Viewer, "mgr1")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));

        engine
            .set_user_role("admin1", "admin1@example.com", UserRole::Admin, "admin1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_regrant_preserves_assigned_at() {
        let engine = engine();
        seed(&engine, "admin1", UserRole::Admin).await;

        let first = engine
            .set_user_role("u1", "u1@example.com", UserRole::Developer, "admin1")
            .await
            .unwrap();

        let second = engine
            .set_user_role("u1", "u1@example.com", UserRole::Manager, "admin1")
            .await
            .unwrap();

        assert_eq!(second.assigned_at, first.assigned_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(second.role, UserRole::Manager);
    }

    #[tokio::test]
    async fn test_remove_role_never_on_self() {
        let engine = engine();
        seed(&engine, "admin1", UserRole::Admin).await;
        seed(&engine, "dev1", UserRole::Developer).await;

        let err = engine.remove_user_role("admin1", "admin1").await.unwrap_err();
        assert!(matches!(err, GovernanceError::Unauthorized(_)));

        engine.remove_user_role("dev1", "admin1").await.unwrap();
        let assignment = engine.get_user_role("dev1").await.unwrap().unwrap();
        assert!(!assignment.is_active);

        // deactivated users fall back to VIEWER capabilities
        let check = engine
            .require_permission("dev1", "dev1@example.com", Permission::ScriptCreate)
            .await;
        assert!(!check.authorized);
        assert_eq!(check.user_role, Some(UserRole::Viewer));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_only_once() {
        let engine = engine();

        let first = engine
            .bootstrap_admin("root", "root@example.com")
            .await
            .unwrap();
        assert_eq!(first.role, UserRole::Admin);
        assert_eq!(first.assigned_by, "bootstrap");

        let err = engine
            .bootstrap_admin("other", "other@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_remove_unknown_user_is_not_found() {
        let engine = engine();
        seed(&engine, "admin1", UserRole::Admin).await;

        let err = engine.remove_user_role("ghost", "admin1").await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }
}
