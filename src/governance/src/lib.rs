//! # Script Governance Engine
//!
//! Role-based authorization, an approval state machine, and an immutable
//! version/rollback log for governed SQL scripts.
//!
//! ## Features
//!
//! - **Fail-closed authorization** over a static role→permission registry
//! - **Guarded transitions**: concurrent approvals serialize through
//!   compare-and-swap writes, the loser gets a `Conflict`, never a silent
//!   second success
//! - **Append-only audit**: every accepted decision adds one history
//!   record, every accepted mutation one numbered version snapshot
//! - **Forward-only rollback**: going back appends, it never rewrites
//! - **Pluggable stores**: in-memory for tests, PostgreSQL via the
//!   `postgres` feature
//!
//! ## Example
//!
//! ```rust
//! use scriptgov_governance::{CreateRequestParams, GovernanceEngine};
//! use scriptgov_core::{Permission, Priority, UserRole};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = GovernanceEngine::in_memory();
//!
//!     // seed the first admin, then grant a manager
//!     engine.authz.bootstrap_admin("boss", "boss@example.com").await?;
//!     engine
//!         .authz
//!         .set_user_role("mgr", "mgr@example.com", UserRole::Manager, "boss")
//!         .await?;
//!
//!     let request = engine
//!         .workflow
//!         .create_approval_request(CreateRequestParams {
//!             script_id: "daily-report".into(),
//!             requester_id: "dev".into(),
//!             requester_email: "dev@example.com".into(),
//!             sql_content: "SELECT count(*) FROM orders".into(),
//!             title: "Daily order count".into(),
//!             description: "counts yesterday's orders".into(),
//!             priority: Priority::Normal,
//!             scope: "sales".into(),
//!             name_en: None,
//!             description_en: None,
//!             tags: vec![],
//!             is_scheduled: false,
//!             cron_expression: None,
//!         })
//!         .await?;
//!
//!     let check = engine
//!         .authz
//!         .require_permission("mgr", "mgr@example.com", Permission::ScriptApprove)
//!         .await;
//!     assert!(check.authorized);
//!
//!     let outcome = engine
//!         .workflow
//!         .approve_script(&request.request_id, "mgr", "mgr@example.com", None)
//!         .await?;
//!     assert_eq!(outcome.snapshot_version, Some(2));
//!     Ok(())
//! }
//! ```

pub mod authz;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod versioning;
pub mod workflow;

pub use authz::{AuthorizationEngine, PermissionCheck};
pub use scriptgov_core::can_manage_role;
pub use config::GovernanceConfig;
pub use engine::{GovernanceEngine, StoreSet};
pub use error::{GovernanceError, Result};
pub use versioning::{
    FieldChange, FieldDiff, RollbackOutcome, VersionComparison, VersionControl, VersionStatistics,
};
pub use workflow::{
    required_approvers_for, ApprovalOutcome, ApprovalWorkflow, CreateRequestParams,
};
