//! PostgreSQL store implementations
//!
//! Each collection is a table with its key columns plus a JSONB `definition`
//! holding the wire-shaped document. The guards the engine depends on are
//! expressed in SQL:
//!
//! - single PENDING per script: partial unique index on
//!   `approval_requests(script_id) WHERE status = 'PENDING'`
//! - terminal transitions: `UPDATE ... WHERE status = 'PENDING'`
//! - gap-free versions: guarded `INSERT ... SELECT ... WHERE max = n - 1`
//!   with the `(script_id, version)` primary key as backstop
//!
//! Row-count checks turn a lost race into [`GovernanceError::Conflict`].

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
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Connect a pool with the settings shared by all governance stores.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(25)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .map_err(|e| GovernanceError::StoreUnavailable(format!("failed to connect: {e}")))
}

/// Run the governance schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| GovernanceError::StoreUnavailable(format!("migration failed: {e}")))?;
    Ok(())
}

fn limit_to_i64(limit: u64) -> i64 {
    limit.min(i64::MAX as u64) as i64
}

fn store_err(context: &str) -> impl FnOnce(sqlx::Error) -> GovernanceError + '_ {
    move |e| match &e {
        // 23505 = unique_violation; a guard lost a race, not an outage
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            GovernanceError::Conflict(format!("{context}: concurrent write ({db})"))
        }
        _ => GovernanceError::StoreUnavailable(format!("{context}: {e}")),
    }
}

fn to_json<T: Serialize>(value: &T, context: &str) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| GovernanceError::StoreUnavailable(format!("{context}: serialize: {e}")))
}

fn from_row<T: DeserializeOwned>(row: &sqlx::postgres::PgRow, context: &str) -> Result<T> {
    let definition: serde_json::Value = row
        .try_get("definition")
        .map_err(|e| GovernanceError::StoreUnavailable(format!("{context}: read column: {e}")))?;
    serde_json::from_value(definition)
        .map_err(|e| GovernanceError::StoreUnavailable(format!("{context}: deserialize: {e}")))
}

/// Role assignments backed by the `role_assignments` table.
pub struct PostgresRoleStore {
    pool: PgPool,
}

impl PostgresRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStore for PostgresRoleStore {
    async fn get(&self, user_id: &str) -> Result<Option<RoleAssignment>> {
        let row = sqlx::query("SELECT definition FROM role_assignments WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("get role assignment"))?;

        row.map(|r| from_row(&r, "get role assignment")).transpose()
    }

    async fn upsert(&self, assignment: RoleAssignment) -> Result<()> {
        let definition = to_json(&assignment, "upsert role assignment")?;

        sqlx::query(
            r#"
            INSERT INTO role_assignments (user_id, definition, is_active, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id)
            DO UPDATE SET
                definition = EXCLUDED.definition,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&assignment.user_id)
        .bind(&definition)
        .bind(assignment.is_active)
        .bind(assignment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("upsert role assignment"))?;

        Ok(())
    }

    async fn deactivate(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE role_assignments
            SET definition = jsonb_set(definition, '{isActive}', 'false'),
                is_active = false,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(store_err("deactivate role assignment"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_active(&self, skip: u64, limit: u64) -> Result<Vec<RoleAssignment>> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM role_assignments
            WHERE is_active = true
            ORDER BY updated_at DESC
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(skip as i64)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("list role assignments"))?;

        rows.iter()
            .map(|r| from_row(r, "list role assignments"))
            .collect()
    }
}

/// Scripts backed by the `scripts` table.
pub struct PostgresScriptStore {
    pool: PgPool,
}

impl PostgresScriptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScriptStore for PostgresScriptStore {
    async fn get(&self, script_id: &str) -> Result<Option<Script>> {
        let row = sqlx::query("SELECT definition FROM scripts WHERE script_id = $1")
            .bind(script_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("get script"))?;

        row.map(|r| from_row(&r, "get script")).transpose()
    }

    async fn upsert(&self, script: Script) -> Result<()> {
        let definition = to_json(&script, "upsert script")?;

        sqlx::query(
            r#"
            INSERT INTO scripts (script_id, definition, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (script_id)
            DO UPDATE SET
                definition = EXCLUDED.definition,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&script.script_id)
        .bind(&definition)
        .bind(script.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("upsert script"))?;

        Ok(())
    }

    async fn set_approval_state(
        &self,
        script_id: &str,
        status: ApprovalStatus,
        request_id: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let patch = serde_json::json!({
            "approvalStatus": status,
            "approvalRequestId": request_id,
            "updatedAt": updated_at,
        });

        let result = sqlx::query(
            r#"
            UPDATE scripts
            SET definition = definition || $2,
                updated_at = $3
            WHERE script_id = $1
            "#,
        )
        .bind(script_id)
        .bind(&patch)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("set approval state"))?;

        Ok(result.rows_affected() > 0)
    }
}

/// Approval requests backed by the `approval_requests` table.
pub struct PostgresApprovalStore {
    pool: PgPool,
}

impl PostgresApprovalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalStore for PostgresApprovalStore {
    async fn get(&self, request_id: &str) -> Result<Option<ApprovalRequest>> {
        let row = sqlx::query("SELECT definition FROM approval_requests WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("get approval request"))?;

        row.map(|r| from_row(&r, "get approval request")).transpose()
    }

    async fn insert_pending(&self, request: ApprovalRequest) -> Result<()> {
        let definition = to_json(&request, "insert approval request")?;

        // the partial unique index on (script_id) WHERE status = 'PENDING'
        // turns a concurrent duplicate into a 23505, mapped to Conflict
        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (request_id, script_id, status, definition, requested_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&request.request_id)
        .bind(&request.script_id)
        .bind(request.status.to_string())
        .bind(&definition)
        .bind(request.requested_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("insert approval request"))?;

        Ok(())
    }

    async fn complete_if_pending(
        &self,
        request_id: &str,
        update: ReviewUpdate,
    ) -> Result<ApprovalRequest> {
        let current = self.get(request_id).await?.ok_or_else(|| {
            GovernanceError::NotFound(format!("approval request '{request_id}'"))
        })?;

        let mut updated = current;
        updated.status = update.status;
        updated.reviewed_by = Some(update.reviewed_by);
        updated.reviewer_email = Some(update.reviewer_email);
        updated.review_comment = update.review_comment;
        updated.reviewed_at = Some(update.reviewed_at);
        updated.updated_at = update.reviewed_at;
        updated.current_approvers.push(update.decision);

        let definition = to_json(&updated, "complete approval request")?;

        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = $2, definition = $3, updated_at = $4
            WHERE request_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(request_id)
        .bind(updated.status.to_string())
        .bind(&definition)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("complete approval request"))?;

        if result.rows_affected() == 0 {
            // the guard failed under us; re-read for the actual status
            let actual = self
                .get(request_id)
                .await?
                .map(|r| r.status.to_string())
                .unwrap_or_else(|| "missing".to_string());
            return Err(GovernanceError::Conflict(format!(
                "request '{request_id}' expected PENDING but is {actual}"
            )));
        }

        Ok(updated)
    }

    async fn list_pending_for_role(
        &self,
        role: UserRole,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM approval_requests
            WHERE status = 'PENDING'
              AND jsonb_exists(definition->'requiredApprovers', $1)
            ORDER BY requested_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(role.to_string())
        .bind(skip as i64)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("list pending approvals"))?;

        rows.iter()
            .map(|r| from_row(r, "list pending approvals"))
            .collect()
    }

    async fn list_completed(&self, skip: u64, limit: u64) -> Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM approval_requests
            WHERE status IN ('APPROVED', 'REJECTED', 'WITHDRAWN')
            ORDER BY updated_at DESC
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(skip as i64)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("list completed approvals"))?;

        rows.iter()
            .map(|r| from_row(r, "list completed approvals"))
            .collect()
    }
}

/// Approval history backed by the append-only `approval_history` table.
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(&self, record: ApprovalHistory) -> Result<()> {
        let definition = to_json(&record, "append history")?;

        sqlx::query(
            r#"
            INSERT INTO approval_history (history_id, script_id, definition, action_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.history_id)
        .bind(&record.script_id)
        .bind(&definition)
        .bind(record.action_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("append history"))?;

        Ok(())
    }

    async fn for_script(&self, script_id: &str, limit: u64) -> Result<Vec<ApprovalHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM approval_history
            WHERE script_id = $1
            ORDER BY action_at DESC
            LIMIT $2
            "#,
        )
        .bind(script_id)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("list history"))?;

        rows.iter().map(|r| from_row(r, "list history")).collect()
    }
}

/// Script versions backed by the append-only `script_versions` table.
pub struct PostgresVersionStore {
    pool: PgPool,
}

impl PostgresVersionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VersionStore for PostgresVersionStore {
    async fn latest_version(&self, script_id: &str) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max FROM script_versions WHERE script_id = $1",
        )
        .bind(script_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err("latest version"))?;

        let max: i32 = row
            .try_get("max")
            .map_err(|e| GovernanceError::StoreUnavailable(format!("latest version: {e}")))?;
        Ok(max as u32)
    }

    async fn append(&self, version: ScriptVersion) -> Result<()> {
        let definition = to_json(&version, "append version")?;

        // insert only if this is the next number in sequence; the primary
        // key on (script_id, version) backstops the duplicate case
        let result = sqlx::query(
            r#"
            INSERT INTO script_versions (script_id, version, definition, created_at)
            SELECT $1, $2, $3, $4
            WHERE COALESCE(
                (SELECT MAX(version) FROM script_versions WHERE script_id = $1), 0
            ) = $2 - 1
            "#,
        )
        .bind(&version.script_id)
        .bind(version.version as i32)
        .bind(&definition)
        .bind(version.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("append version"))?;

        if result.rows_affected() == 0 {
            let max = self.latest_version(&version.script_id).await?;
            return Err(GovernanceError::Conflict(format!(
                "version {} for script '{}' expected {} (current max {})",
                version.version,
                version.script_id,
                max + 1,
                max
            )));
        }

        Ok(())
    }

    async fn list(&self, script_id: &str, limit: u64) -> Result<Vec<ScriptVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT definition FROM script_versions
            WHERE script_id = $1
            ORDER BY version DESC
            LIMIT $2
            "#,
        )
        .bind(script_id)
        .bind(limit_to_i64(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("list versions"))?;

        rows.iter().map(|r| from_row(r, "list versions")).collect()
    }

    async fn get(&self, script_id: &str, version: u32) -> Result<Option<ScriptVersion>> {
        let row = sqlx::query(
            "SELECT definition FROM script_versions WHERE script_id = $1 AND version = $2",
        )
        .bind(script_id)
        .bind(version as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("get version"))?;

        row.map(|r| from_row(&r, "get version")).transpose()
    }
}
