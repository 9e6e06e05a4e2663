//! Contracts of the collaborators the resolver reads identities from.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use crate::models::{
    ExternalUserInfo, Identity, Org, RenderUser, RotateCommand, SessionToken, StoredApiKey, User,
};
use crate::utils::Password;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// `InvalidCredentials` covers both an unknown login and a wrong password.
    async fn get_user_by_credentials(
        &self,
        login: &str,
        password: &Password,
    ) -> Result<User, StoreError>;

    /// Expands a user id into an identity for `org_id`, or for the user's
    /// default org when `None`.
    async fn get_signed_in_user(
        &self,
        user_id: i64,
        org_id: Option<i64>,
    ) -> Result<Identity, StoreError>;

    async fn get_api_key_by_name(&self, name: &str, owner_id: i64)
        -> Result<StoredApiKey, StoreError>;

    /// Creates or refreshes a local user from an external description.
    /// Creation is refused with `SignupNotAllowed` unless `signup_allowed`.
    async fn upsert_external_user(
        &self,
        info: &ExternalUserInfo,
        signup_allowed: bool,
    ) -> Result<User, StoreError>;

    async fn get_org_by_name(&self, name: &str) -> Result<Org, StoreError>;

    async fn update_last_seen(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persists a new token and returns it with its assigned id.
    async fn insert(&self, token: SessionToken) -> Result<SessionToken, StoreError>;

    async fn find_by_hash(&self, hashed_token: &str) -> Result<SessionToken, StoreError>;

    async fn mark_seen(&self, token_id: i64, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Swaps the token hash when `expected_hash` is still current and the
    /// token was last rotated before `rotated_before`. Returns whether the
    /// swap happened; concurrent callers see at most one `true`.
    async fn rotate(&self, command: &RotateCommand) -> Result<bool, StoreError>;

    async fn revoke(&self, token_id: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RenderService: Send + Sync {
    async fn get_render_user(&self, render_key: &str) -> Option<RenderUser>;
}
