//! Long-lived browser session tokens.

use chrono::{DateTime, Utc};

/// Server-side session record. `hashed_token` never leaves the server;
/// `unhashed_token` is only populated on the copy handed back from a
/// lookup, creation or rotation so the cookie can be (re)written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub id: i64,
    pub user_id: i64,
    pub hashed_token: String,
    pub unhashed_token: String,
    pub auth_token_seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub rotated_at: DateTime<Utc>,
}

/// Arguments of a conditional rotation. The store swaps the hash only when
/// `expected_hash` is still current and the token was last rotated before
/// `rotated_before`.
#[derive(Debug, Clone)]
pub struct RotateCommand {
    pub token_id: i64,
    pub expected_hash: String,
    pub new_hash: String,
    pub client_ip: String,
    pub user_agent: String,
    pub now: DateTime<Utc>,
    pub rotated_before: DateTime<Utc>,
}
