//! Resolved identity attached to every request.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How often a signed-in user's last-seen timestamp is refreshed.
pub const LAST_SEEN_REFRESH_INTERVAL_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrgRole {
    #[default]
    None,
    Viewer,
    Editor,
    Admin,
}

impl std::str::FromStr for OrgRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(OrgRole::None),
            "viewer" => Ok(OrgRole::Viewer),
            "editor" => Ok(OrgRole::Editor),
            "admin" => Ok(OrgRole::Admin),
            _ => Err(format!("Invalid org role: {}", s)),
        }
    }
}

impl std::fmt::Display for OrgRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrgRole::None => "None",
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        };
        f.write_str(s)
    }
}

/// Who is making the request. Built fresh per request, filled in by at most
/// one strategy and dropped with the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Identity {
    pub is_signed_in: bool,
    pub is_anonymous: bool,
    pub is_render_call: bool,
    pub allow_anonymous: bool,
    pub user_id: i64,
    pub org_id: i64,
    pub org_name: String,
    pub org_role: OrgRole,
    pub login: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// True when a real user is attached and its last-seen stamp is older
    /// than the refresh interval.
    pub fn should_update_last_seen(&self, now: DateTime<Utc>) -> bool {
        if self.user_id <= 0 {
            return false;
        }
        match self.last_seen_at {
            Some(seen) => now - seen > Duration::minutes(LAST_SEEN_REFRESH_INTERVAL_MINUTES),
            None => true,
        }
    }

    pub fn signed_in(mut self) -> Self {
        self.is_signed_in = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Org {
    pub id: i64,
    pub name: String,
}

/// User an internal render callback acts on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderUser {
    pub org_id: i64,
    pub user_id: i64,
    pub org_role: OrgRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_seen_refresh_window() {
        let now = Utc::now();
        let mut identity = Identity {
            user_id: 7,
            last_seen_at: Some(now - Duration::minutes(4)),
            ..Default::default()
        };
        assert!(!identity.should_update_last_seen(now));

        identity.last_seen_at = Some(now - Duration::minutes(6));
        assert!(identity.should_update_last_seen(now));

        identity.user_id = 0;
        assert!(!identity.should_update_last_seen(now));
    }

    #[test]
    fn test_org_role_parse() {
        assert_eq!("viewer".parse::<OrgRole>().unwrap(), OrgRole::Viewer);
        assert_eq!(" Admin ".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        assert!("root".parse::<OrgRole>().is_err());
    }
}
