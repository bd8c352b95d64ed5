//! Authorization gate: which principals may hold an administrative session

use admin_auth::{Principal, Role};

use crate::error::{Error, Result};

/// Roles allowed to hold a session. `Role::Client` never is.
pub const PRIVILEGED_ROLES: [Role; 3] = [Role::Staff, Role::Admin, Role::SuperAdmin];

pub fn is_privileged(role: Role) -> bool {
    PRIVILEGED_ROLES.contains(&role)
}

/// `Ok` for privileged principals, `AccessDenied` otherwise.
pub fn authorize(principal: &Principal) -> Result<()> {
    if is_privileged(principal.role) {
        Ok(())
    } else {
        Err(Error::AccessDenied(principal.role))
    }
}
