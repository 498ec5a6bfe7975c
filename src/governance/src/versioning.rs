//! Version control and rollback
//!
//! A monotonic append log consumed by the approval workflow: every accepted
//! create/update/approve/rollback appends exactly one [`ScriptVersion`].
//! Rollback is forward-only: it writes an old snapshot's fields onto the
//! live script and appends a brand-new version, never touching the records
//! behind it.

use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::store::{HistoryStore, ScriptStore, VersionStore};
use chrono::Utc;
use scriptgov_core::{ApprovalAction, ApprovalHistory, ChangeKind, Script, ScriptVersion};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Fields compared by [`VersionControl::compare_versions`] and restored by
/// rollback, with their wire names.
const TRACKED_FIELDS: &[&str] = &[
    "name",
    "nameEn",
    "description",
    "descriptionEn",
    "scope",
    "author",
    "isScheduled",
    "cronExpression",
    "sqlContent",
];

/// How one tracked field changed between two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FieldChange {
    Unchanged,
    Changed { old: Value, new: Value },
    Added { new: Value },
    Removed { old: Value },
}

/// Per-field entry in a version comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    #[serde(flatten)]
    pub change: FieldChange,
}

/// Result of comparing two versions of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub script_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub fields: Vec<FieldDiff>,
}

impl VersionComparison {
    /// Diffs that actually changed something.
    pub fn changed_fields(&self) -> impl Iterator<Item = &FieldDiff> {
        self.fields
            .iter()
            .filter(|d| d.change != FieldChange::Unchanged)
    }
}

/// Aggregate report over a script's version log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStatistics {
    pub script_id: String,
    pub total_versions: u64,
    pub latest_version: u32,
    /// Distinct `createdBy` values, sorted.
    pub authors: Vec<String>,
    /// Snapshot counts per change kind (create/update/approve/rollback).
    pub change_counts: HashMap<ChangeKind, u64>,
}

/// Outcome of a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub script_id: String,
    pub rolled_back_to: u32,
    /// The freshly appended version carrying the restored fields.
    pub new_version: u32,
}

/// Append-only versioning over a [`VersionStore`].
pub struct VersionControl {
    versions: Arc<dyn VersionStore>,
    scripts: Arc<dyn ScriptStore>,
    history: Arc<dyn HistoryStore>,
    config: GovernanceConfig,
}

impl VersionControl {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        scripts: Arc<dyn ScriptStore>,
        history: Arc<dyn HistoryStore>,
        config: GovernanceConfig,
    ) -> Self {
        Self {
            versions,
            scripts,
            history,
            config,
        }
    }

    /// Append the next version for `script`. The store's sequence guard
    /// turns a concurrent writer into a `Conflict`; there is no retry here.
    pub async fn record_snapshot(
        &self,
        script: &Script,
        created_by: &str,
        change_kind: ChangeKind,
        change_description: impl Into<String>,
    ) -> Result<u32> {
        let next = self.versions.latest_version(&script.script_id).await? + 1;
        let snapshot = ScriptVersion::snapshot_of(
            script,
            next,
            created_by,
            change_kind,
            change_description,
            Utc::now(),
        );
        self.versions.append(snapshot).await?;
        debug!(script_id = %script.script_id, version = next, ?change_kind, "version recorded");
        Ok(next)
    }

    /// Highest recorded version for a script, 0 if none.
    pub async fn latest_version(&self, script_id: &str) -> Result<u32> {
        self.versions.latest_version(script_id).await
    }

    /// Versions for a script, newest first.
    pub async fn get_script_versions(
        &self,
        script_id: &str,
        limit: u64,
    ) -> Result<Vec<ScriptVersion>> {
        let limit = if limit == 0 {
            self.config.default_page_size
        } else {
            limit.min(self.config.max_page_size)
        };
        self.versions.list(script_id, limit).await
    }

    /// Point lookup of one version.
    pub async fn get_script_version(&self, script_id: &str, version: u32) -> Result<ScriptVersion> {
        self.versions.get(script_id, version).await?.ok_or_else(|| {
            GovernanceError::NotFound(format!("version {version} of script '{script_id}'"))
        })
    }

    /// Field-level diff between two versions. `from` newer than `to` is
    /// allowed; the diff is directional from→to either way.
    pub async fn compare_versions(
        &self,
        script_id: &str,
        from: u32,
        to: u32,
    ) -> Result<VersionComparison> {
        let from_snapshot = self.get_script_version(script_id, from).await?;
        let to_snapshot = self.get_script_version(script_id, to).await?;

        let from_fields = tracked_values(&from_snapshot);
        let to_fields = tracked_values(&to_snapshot);

        let fields = TRACKED_FIELDS
            .iter()
            .map(|&field| {
                let old = from_fields.get(field).cloned().unwrap_or(Value::Null);
                let new = to_fields.get(field).cloned().unwrap_or(Value::Null);
                let change = match (old.is_null(), new.is_null()) {
                    (true, true) => FieldChange::Unchanged,
                    (true, false) => FieldChange::Added { new },
                    (false, true) => FieldChange::Removed { old },
                    (false, false) if old == new => FieldChange::Unchanged,
                    (false, false) => FieldChange::Changed { old, new },
                };
                FieldDiff {
                    field: field.to_string(),
                    change,
                }
            })
            .collect();

        Ok(VersionComparison {
            script_id: script_id.to_string(),
            from_version: from,
            to_version: to,
            fields,
        })
    }

    /// Restore the live script to the state of `target_version`.
    ///
    /// Appends a new version (`max + 1`) carrying the restored fields; the
    /// target record and everything after it remain untouched.
    pub async fn rollback_to_version(
        &self,
        script_id: &str,
        target_version: u32,
        user_id: &str,
        user_email: &str,
        reason: &str,
    ) -> Result<RollbackOutcome> {
        let target = self.get_script_version(script_id, target_version).await?;

        let mut script = self
            .scripts
            .get(script_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound(format!("script '{script_id}'")))?;

        target.restore_onto(&mut script);
        script.updated_at = Utc::now();

        let new_version = self
            .record_snapshot(
                &script,
                user_id,
                ChangeKind::Rollback,
                format!("Rolled back to version {target_version}: {reason}"),
            )
            .await?;

        self.scripts.upsert(script.clone()).await?;

        self.history
            .append(ApprovalHistory {
                history_id: Uuid::new_v4().to_string(),
                request_id: script.approval_request_id.clone().unwrap_or_default(),
                script_id: script_id.to_string(),
                action_by: user_id.to_string(),
                action_by_email: user_email.to_string(),
                action: ApprovalAction::Rollback,
                comment: Some(reason.to_string()),
                action_at: Utc::now(),
            })
            .await?;

        info!(script_id, target_version, new_version, user_id, "script rolled back");

        Ok(RollbackOutcome {
            script_id: script_id.to_string(),
            rolled_back_to: target_version,
            new_version,
        })
    }

    /// Aggregate version count, authors, and per-kind operation counts.
    pub async fn get_version_statistics(&self, script_id: &str) -> Result<VersionStatistics> {
        let all = self.versions.list(script_id, u64::MAX).await?;
        if all.is_empty() {
            return Err(GovernanceError::NotFound(format!(
                "versions of script '{script_id}'"
            )));
        }

        let latest_version = all.iter().map(|v| v.version).max().unwrap_or(0);

        let mut authors: Vec<String> = all.iter().map(|v| v.created_by.clone()).collect();
        authors.sort();
        authors.dedup();

        let mut change_counts: HashMap<ChangeKind, u64> = HashMap::new();
        for version in &all {
            *change_counts.entry(version.change_kind).or_insert(0) += 1;
        }

        Ok(VersionStatistics {
            script_id: script_id.to_string(),
            total_versions: all.len() as u64,
            latest_version,
            authors,
            change_counts,
        })
    }
}

fn tracked_values(version: &ScriptVersion) -> HashMap<&'static str, Value> {
    HashMap::from([
        ("name", json!(version.name)),
        ("nameEn", json!(version.name_en)),
        ("description", json!(version.description)),
        ("descriptionEn", json!(version.description_en)),
        ("scope", json!(version.scope)),
        ("author", json!(version.author)),
        ("isScheduled", json!(version.is_scheduled)),
        ("cronExpression", json!(version.cron_expression)),
        ("sqlContent", json!(version.sql_content)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryHistoryStore, MemoryScriptStore, MemoryVersionStore, ScriptStore};
    use scriptgov_core::ApprovalStatus;

    fn control() -> (VersionControl, Arc<MemoryScriptStore>, Arc<MemoryHistoryStore>) {
        let scripts = Arc::new(MemoryScriptStore::new());
        let history = Arc::new(MemoryHistoryStore::new());
        let control = VersionControl::new(
            Arc::new(MemoryVersionStore::new()),
            scripts.clone(),
            history.clone(),
            GovernanceConfig::default(),
        );
        (control, scripts, history)
    }

    fn script(script_id: &str, sql: &str) -> Script {
        let now = Utc::now();
        Script {
            script_id: script_id.to_string(),
            name: "report".to_string(),
            name_en: None,
            description: "weekly report".to_string(),
            description_en: None,
            scope: "sales".to_string(),
            author: "alice".to_string(),
            tags: vec![],
            sql_content: sql.to_string(),
            approval_status: ApprovalStatus::Draft,
            approval_request_id: None,
            is_scheduled: false,
            cron_expression: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_snapshots_number_from_one() {
        let (control, _, _) = control();
        let s = script("s1", "SELECT 1");

        assert_eq!(
            control
                .record_snapshot(&s, "alice", ChangeKind::Create, "initial")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            control
                .record_snapshot(&s, "alice", ChangeKind::Update, "edit")
                .await
                .unwrap(),
            2
        );

        let versions = control.get_script_versions("s1", 10).await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[tokio::test]
    async fn test_point_lookup_not_found() {
        let (control, _, _) = control();
        let err = control.get_script_version("s1", 7).await.unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_compare_reports_all_field_states() {
        let (control, _, _) = control();

        let v1 = script("s1", "SELECT 1");
        control
            .record_snapshot(&v1, "alice", ChangeKind::Create, "initial")
            .await
            .unwrap();

        let mut v2 = v1.clone();
        v2.sql_content = "SELECT 2".to_string();
        v2.name_en = Some("Weekly report".to_string());
        v2.cron_expression = None;
        control
            .record_snapshot(&v2, "bob", ChangeKind::Update, "tweak")
            .await
            .unwrap();

        let comparison = control.compare_versions("s1", 1, 2).await.unwrap();
        assert_eq!(comparison.fields.len(), TRACKED_FIELDS.len());

        let by_field: HashMap<&str, &FieldChange> = comparison
            .fields
            .iter()
            .map(|d| (d.field.as_str(), &d.change))
            .collect();

        assert_eq!(
            by_field["sqlContent"],
            &FieldChange::Changed {
                old: json!("SELECT 1"),
                new: json!("SELECT 2"),
            }
        );
        assert_eq!(
            by_field["nameEn"],
            &FieldChange::Added {
                new: json!("Weekly report")
            }
        );
        assert_eq!(by_field["scope"], &FieldChange::Unchanged);

        // reverse direction flips added into removed
        let reverse = control.compare_versions("s1", 2, 1).await.unwrap();
        let by_field: HashMap<&str, &FieldChange> = reverse
            .fields
            .iter()
            .map(|d| (d.field.as_str(), &d.change))
            .collect();
        assert_eq!(
            by_field["nameEn"],
            &FieldChange::Removed {
                old: json!("Weekly report")
            }
        );
    }

    #[tokio::test]
    async fn test_compare_missing_version_not_found() {
        let (control, _, _) = control();
        let s = script("s1", "SELECT 1");
        control
            .record_snapshot(&s, "alice", ChangeKind::Create, "initial")
            .await
            .unwrap();

        assert!(matches!(
            control.compare_versions("s1", 1, 9).await.unwrap_err(),
            GovernanceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_rollback_appends_and_preserves_history() {
        let (control, scripts, history) = control();

        let v1 = script("s1", "SELECT 1");
        scripts.upsert(v1.clone()).await.unwrap();
        control
            .record_snapshot(&v1, "alice", ChangeKind::Create, "initial")
            .await
            .unwrap();

        let mut v2 = v1.clone();
        v2.sql_content = "SELECT broken".to_string();
        scripts.upsert(v2.clone()).await.unwrap();
        control
            .record_snapshot(&v2, "alice", ChangeKind::Update, "bad edit")
            .await
            .unwrap();

        let before = control.get_script_version("s1", 1).await.unwrap();

        let outcome = control
            .rollback_to_version("s1", 1, "mgr1", "mgr1@example.com", "revert bad edit")
            .await
            .unwrap();
        assert_eq!(outcome.rolled_back_to, 1);
        assert_eq!(outcome.new_version, 3);

        // live script carries the restored content
        let live = scripts.get("s1").await.unwrap().unwrap();
        assert_eq!(live.sql_content, "SELECT 1");

        // the target record is byte-identical to its pre-rollback value
        let after = control.get_script_version("s1", 1).await.unwrap();
        assert_eq!(before, after);

        // new version is a Rollback snapshot of v1's fields
        let v3 = control.get_script_version("s1", 3).await.unwrap();
        assert_eq!(v3.change_kind, ChangeKind::Rollback);
        assert_eq!(v3.sql_content, "SELECT 1");
        assert!(v3.change_description.contains("version 1"));

        // audit record appended
        let records = history.for_script("s1", 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, ApprovalAction::Rollback);
        assert_eq!(records[0].comment.as_deref(), Some("revert bad edit"));
    }

    #[tokio::test]
    async fn test_rollback_to_missing_version_fails() {
        let (control, scripts, _) = control();
        scripts.upsert(script("s1", "SELECT 1")).await.unwrap();

        let err = control
            .rollback_to_version("s1", 4, "u1", "u1@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, GovernanceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_statistics_aggregate_kinds_and_authors() {
        let (control, scripts, _) = control();
        let s = script("s1", "SELECT 1");
        scripts.upsert(s.clone()).await.unwrap();

        control
            .record_snapshot(&s, "alice", ChangeKind::Create, "initial")
            .await
            .unwrap();
        control
            .record_snapshot(&s, "bob", ChangeKind::Update, "edit")
            .await
            .unwrap();
        control
            .record_snapshot(&s, "alice", ChangeKind::Approve, "approved")
            .await
            .unwrap();
        control
            .rollback_to_version("s1", 1, "carol", "carol@example.com", "revert")
            .await
            .unwrap();

        let stats = control.get_version_statistics("s1").await.unwrap();
        assert_eq!(stats.total_versions, 4);
        assert_eq!(stats.latest_version, 4);
        assert_eq!(stats.authors, vec!["alice", "bob", "carol"]);
        assert_eq!(stats.change_counts[&ChangeKind::Create], 1);
        assert_eq!(stats.change_counts[&ChangeKind::Update], 1);
        assert_eq!(stats.change_counts[&ChangeKind::Approve], 1);
        assert_eq!(stats.change_counts[&ChangeKind::Rollback], 1);

        assert!(matches!(
            control.get_version_statistics("ghost").await.unwrap_err(),
            GovernanceError::NotFound(_)
        ));
    }
}
