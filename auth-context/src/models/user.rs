use serde::{Deserialize, Serialize};

use super::OrgRole;

/// Locally stored user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub name: String,
    pub default_org_id: i64,
    pub is_disabled: bool,
}

/// User as described by an external source (directory or auth proxy),
/// before it is synced into the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUserInfo {
    pub auth_module: String,
    pub auth_id: String,
    pub login: String,
    pub email: String,
    pub name: String,
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<OrgRole>,
}

/// Username/password pair presented to a directory.
#[derive(Debug, Clone)]
pub struct LoginQuery {
    pub username: String,
    pub password: crate::utils::Password,
}
