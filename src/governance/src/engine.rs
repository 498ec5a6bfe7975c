//! Governance engine facade
//!
//! Wires the authorization engine, approval workflow, and version control
//! over one set of stores, in the dependency order the route layer expects:
//! authorize first, then transition, with every accepted mutation appending
//! to the audit collections.

use crate::authz::AuthorizationEngine;
use crate::config::GovernanceConfig;
use crate::store::{
    ApprovalStore, HistoryStore, MemoryApprovalStore, MemoryHistoryStore, MemoryRoleStore,
    MemoryScriptStore, MemoryVersionStore, RoleStore, ScriptStore, VersionStore,
};
use crate::versioning::VersionControl;
use crate::workflow::ApprovalWorkflow;
use scriptgov_core::{ScriptClassifier, SqlRiskClassifier};
use std::sync::Arc;

/// All three governance components over a shared store set.
pub struct GovernanceEngine {
    pub authz: AuthorizationEngine,
    pub workflow: ApprovalWorkflow,
    pub versions: Arc<VersionControl>,
}

/// Store handles used to assemble an engine.
pub struct StoreSet {
    pub roles: Arc<dyn RoleStore>,
    pub scripts: Arc<dyn ScriptStore>,
    pub approvals: Arc<dyn ApprovalStore>,
    pub history: Arc<dyn HistoryStore>,
    pub versions: Arc<dyn VersionStore>,
}

impl StoreSet {
    /// Fresh in-memory stores, used by tests and single-process setups.
    pub fn in_memory() -> Self {
        Self {
            roles: Arc::new(MemoryRoleStore::new()),
            scripts: Arc::new(MemoryScriptStore::new()),
            approvals: Arc::new(MemoryApprovalStore::new()),
            history: Arc::new(MemoryHistoryStore::new()),
            versions: Arc::new(MemoryVersionStore::new()),
        }
    }

    /// PostgreSQL-backed stores over one pool.
    #[cfg(feature = "postgres")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::store::{
            PostgresApprovalStore, PostgresHistoryStore, PostgresRoleStore, PostgresScriptStore,
            PostgresVersionStore,
        };
        Self {
            roles: Arc::new(PostgresRoleStore::new(pool.clone())),
            scripts: Arc::new(PostgresScriptStore::new(pool.clone())),
            approvals: Arc::new(PostgresApprovalStore::new(pool.clone())),
            history: Arc::new(PostgresHistoryStore::new(pool.clone())),
            versions: Arc::new(PostgresVersionStore::new(pool)),
        }
    }
}

impl GovernanceEngine {
    /// Assemble an engine over `stores` with the default SQL classifier.
    pub fn new(stores: StoreSet, config: GovernanceConfig) -> Self {
        Self::with_classifier(stores, Arc::new(SqlRiskClassifier::new()), config)
    }

    /// Assemble an engine with a custom classifier seam.
    pub fn with_classifier(
        stores: StoreSet,
        classifier: Arc<dyn ScriptClassifier>,
        config: GovernanceConfig,
    ) -> Self {
        let versions = Arc::new(VersionControl::new(
            stores.versions,
            stores.scripts.clone(),
            stores.history.clone(),
            config.clone(),
        ));

        let workflow = ApprovalWorkflow::new(
            stores.approvals,
            stores.scripts,
            stores.roles.clone(),
            stores.history,
            versions.clone(),
            classifier,
            config.clone(),
        );

        let authz = AuthorizationEngine::new(stores.roles, config);

        Self {
            authz,
            workflow,
            versions,
        }
    }

    /// In-memory engine with default configuration.
    pub fn in_memory() -> Self {
        Self::new(StoreSet::in_memory(), GovernanceConfig::default())
    }
}
