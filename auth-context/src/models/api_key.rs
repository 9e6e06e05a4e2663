use chrono::{DateTime, Utc};

use super::OrgRole;

/// Server-side half of an API key. `hashed_key` is a one-way hash of the
/// secret; the secret itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredApiKey {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub hashed_key: String,
    pub role: OrgRole,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl StoredApiKey {
    /// A key expiring exactly now is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if expires <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(expires_at: Option<DateTime<Utc>>) -> StoredApiKey {
        StoredApiKey {
            id: 1,
            owner_id: 1,
            name: "ci".to_string(),
            hashed_key: String::new(),
            role: OrgRole::Viewer,
            expires_at,
            revoked: false,
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(key(Some(now)).is_expired(now));
        assert!(key(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!key(Some(now + Duration::seconds(1))).is_expired(now));
        assert!(!key(None).is_expired(now));
    }
}
