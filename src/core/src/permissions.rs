//! Static role→permission registry
//!
//! The mapping is a compiled-in constant table, not runtime state, so it
//! cannot be tampered with after startup. Handlers never compare permission
//! strings; they go through [`role_has_permission`].

use crate::types::{Permission, UserRole};

/// Permissions granted to ADMIN.
const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ScriptCreate,
    Permission::ScriptRead,
    Permission::ScriptUpdate,
    Permission::ScriptDelete,
    Permission::ScriptApprove,
    Permission::ScriptReject,
    Permission::ScriptRollback,
    Permission::UserManage,
    Permission::UserRoleAssign,
];

/// Permissions granted to MANAGER.
const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::ScriptCreate,
    Permission::ScriptRead,
    Permission::ScriptUpdate,
    Permission::ScriptApprove,
    Permission::ScriptReject,
    Permission::ScriptRollback,
];

/// Permissions granted to DEVELOPER.
const DEVELOPER_PERMISSIONS: &[Permission] = &[
    Permission::ScriptCreate,
    Permission::ScriptRead,
    Permission::ScriptUpdate,
];

/// Permissions granted to VIEWER.
const VIEWER_PERMISSIONS: &[Permission] = &[Permission::ScriptRead];

/// Permission set for a role.
pub fn permissions_for(role: UserRole) -> &'static [Permission] {
    match role {
        UserRole::Admin => ADMIN_PERMISSIONS,
        UserRole::Manager => MANAGER_PERMISSIONS,
        UserRole::Developer => DEVELOPER_PERMISSIONS,
        UserRole::Viewer => VIEWER_PERMISSIONS,
    }
}

/// Whether `role` carries `permission`.
pub fn role_has_permission(role: UserRole, permission: Permission) -> bool {
    permissions_for(role).contains(&permission)
}
