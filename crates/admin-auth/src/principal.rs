//! Authenticated identity as returned by the API

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role carried by a principal. Only `Staff`, `Admin` and `SuperAdmin` may
/// hold an administrative session; `Client` is an end-user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Staff,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Wire label, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Staff => "staff",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current user record.
///
/// Only `id` and `role` drive session behavior; the remaining fields are
/// carried for display and default when the server omits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: String,
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default, alias = "profilePhotoUrl", skip_serializing_if = "Option::is_none")]
    pub profile_photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Principal {
    /// "First Last", falling back to the email when both names are blank.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }
}
