//! Role hierarchy
//!
//! Total order ADMIN > MANAGER > DEVELOPER > VIEWER. Role management is
//! strict: a role may only assign roles strictly below its own rank, with a
//! single exception (ADMIN may assign ADMIN). This is the one place rank
//! comparison lives; callers never compare roles ad hoc.

use crate::types::UserRole;

/// Whether `current` may assign or remove `target`.
///
/// Returns true only if `current` strictly outranks `target`, except that
/// ADMIN may manage ADMIN.
pub fn can_manage_role(current: UserRole, target: UserRole) -> bool {
    if current == UserRole::Admin {
        return true;
    }
    current > target
}
