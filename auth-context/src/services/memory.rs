//! In-process implementation of the user store, token store and render
//! service. Used by the binary when no database is wired in and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::api_key::ApiKeyCodec;
use super::error::StoreError;
use super::store::{RenderService, TokenStore, UserStore};
use crate::models::{
    ExternalUserInfo, Identity, Org, OrgRole, RenderUser, RotateCommand, SessionToken,
    StoredApiKey, User,
};
use crate::utils::{hash_password, verify_password, Password};

pub const DEFAULT_ORG_NAME: &str = "Main Org.";

#[derive(Debug, Clone)]
struct UserRecord {
    user: User,
    password_hash: Option<String>,
    last_seen_at: Option<DateTime<Utc>>,
}

pub struct MemoryStore {
    ids: AtomicI64,
    default_org_id: i64,
    users: DashMap<i64, UserRecord>,
    orgs: DashMap<i64, Org>,
    memberships: DashMap<(i64, i64), OrgRole>,
    api_keys: DashMap<i64, StoredApiKey>,
    tokens: DashMap<i64, SessionToken>,
    render_keys: DashMap<String, RenderUser>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store holding only the default org.
    pub fn new() -> Self {
        let store = Self {
            ids: AtomicI64::new(1),
            default_org_id: 0,
            users: DashMap::new(),
            orgs: DashMap::new(),
            memberships: DashMap::new(),
            api_keys: DashMap::new(),
            tokens: DashMap::new(),
            render_keys: DashMap::new(),
        };
        let default_org_id = store.add_org(DEFAULT_ORG_NAME);
        Self {
            default_org_id,
            ..store
        }
    }

    fn next_id(&self) -> i64 {
        self.ids.fetch_add(1, Ordering::SeqCst)
    }

    pub fn default_org_id(&self) -> i64 {
        self.default_org_id
    }

    pub fn add_org(&self, name: &str) -> i64 {
        let id = self.next_id();
        self.orgs.insert(
            id,
            Org {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    /// Adds a local user with a password, member of the default org.
    pub fn add_user(
        &self,
        login: &str,
        email: &str,
        password: &str,
        role: OrgRole,
    ) -> Result<User, anyhow::Error> {
        let password_hash = hash_password(&Password::new(password))?;
        let user = User {
            id: self.next_id(),
            login: login.to_string(),
            email: email.to_string(),
            name: login.to_string(),
            default_org_id: self.default_org_id,
            is_disabled: false,
        };

        self.users.insert(
            user.id,
            UserRecord {
                user: user.clone(),
                password_hash: Some(password_hash),
                last_seen_at: None,
            },
        );
        self.memberships
            .insert((user.id, self.default_org_id), role);

        tracing::debug!(user_id = user.id, login = %login, "Seeded user");
        Ok(user)
    }

    pub fn add_membership(&self, user_id: i64, org_id: i64, role: OrgRole) {
        self.memberships.insert((user_id, org_id), role);
    }

    pub fn disable_user(&self, user_id: i64) {
        if let Some(mut record) = self.users.get_mut(&user_id) {
            record.user.is_disabled = true;
        }
    }

    pub fn delete_user(&self, user_id: i64) {
        self.users.remove(&user_id);
        self.memberships.retain(|(member, _), _| *member != user_id);
        self.tokens.retain(|_, token| token.user_id != user_id);
    }

    pub fn last_seen(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.users.get(&user_id).and_then(|r| r.last_seen_at)
    }

    pub fn find_user_by_login(&self, login: &str) -> Option<User> {
        self.users
            .iter()
            .find(|r| r.user.login == login)
            .map(|r| r.user.clone())
    }

    /// Generates a key for `owner_id` (an org id) and returns the token to
    /// hand to the client together with the stored record.
    pub fn add_api_key(
        &self,
        owner_id: i64,
        name: &str,
        role: OrgRole,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(String, StoredApiKey), anyhow::Error> {
        let generated = ApiKeyCodec::generate(owner_id, name)?;
        let key = StoredApiKey {
            id: self.next_id(),
            owner_id,
            name: name.to_string(),
            hashed_key: generated.hashed_key,
            role,
            expires_at,
            revoked: false,
        };
        self.api_keys.insert(key.id, key.clone());
        Ok((generated.encoded_token, key))
    }

    pub fn revoke_api_key(&self, key_id: i64) {
        if let Some(mut key) = self.api_keys.get_mut(&key_id) {
            key.revoked = true;
        }
    }

    pub fn add_render_key(&self, render_key: &str, user: RenderUser) {
        self.render_keys.insert(render_key.to_string(), user);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    fn find_user(&self, info: &ExternalUserInfo) -> Option<UserRecord> {
        self.users
            .iter()
            .find(|r| {
                (!info.login.is_empty() && r.user.login == info.login)
                    || (!info.email.is_empty() && r.user.email == info.email)
            })
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user_by_credentials(
        &self,
        login: &str,
        password: &Password,
    ) -> Result<User, StoreError> {
        let record = self
            .users
            .iter()
            .find(|r| r.user.login == login || r.user.email == login)
            .map(|r| r.value().clone())
            .ok_or(StoreError::InvalidCredentials)?;

        let Some(hash) = record.password_hash.as_deref() else {
            return Err(StoreError::InvalidCredentials);
        };
        if !verify_password(password, hash)? {
            return Err(StoreError::InvalidCredentials);
        }
        if record.user.is_disabled {
            return Err(StoreError::UserDisabled);
        }

        Ok(record.user)
    }

    async fn get_signed_in_user(
        &self,
        user_id: i64,
        org_id: Option<i64>,
    ) -> Result<Identity, StoreError> {
        let record = self
            .users
            .get(&user_id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)?;

        let org_id = org_id.unwrap_or(record.user.default_org_id);
        let org = self
            .orgs
            .get(&org_id)
            .map(|o| o.value().clone())
            .ok_or(StoreError::NotFound)?;
        let org_role = self
            .memberships
            .get(&(user_id, org_id))
            .map(|role| *role)
            .unwrap_or(OrgRole::None);

        Ok(Identity {
            user_id,
            org_id: org.id,
            org_name: org.name,
            org_role,
            login: record.user.login,
            name: record.user.name,
            email: record.user.email,
            last_seen_at: record.last_seen_at,
            ..Default::default()
        })
    }

    async fn get_api_key_by_name(
        &self,
        name: &str,
        owner_id: i64,
    ) -> Result<StoredApiKey, StoreError> {
        self.api_keys
            .iter()
            .find(|k| k.name == name && k.owner_id == owner_id)
            .map(|k| k.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn upsert_external_user(
        &self,
        info: &ExternalUserInfo,
        signup_allowed: bool,
    ) -> Result<User, StoreError> {
        if let Some(existing) = self.find_user(info) {
            let mut record = self
                .users
                .get_mut(&existing.user.id)
                .ok_or(StoreError::NotFound)?;
            if record.user.is_disabled {
                return Err(StoreError::UserDisabled);
            }
            if !info.email.is_empty() {
                record.user.email = info.email.clone();
            }
            if !info.name.is_empty() {
                record.user.name = info.name.clone();
            }
            let user = record.user.clone();
            drop(record);

            if let Some(role) = info.role {
                self.memberships.insert((user.id, user.default_org_id), role);
            }
            return Ok(user);
        }

        if !signup_allowed {
            return Err(StoreError::SignupNotAllowed);
        }

        let login = if info.login.is_empty() {
            info.email.clone()
        } else {
            info.login.clone()
        };
        let user = User {
            id: self.next_id(),
            name: if info.name.is_empty() {
                login.clone()
            } else {
                info.name.clone()
            },
            login,
            email: info.email.clone(),
            default_org_id: self.default_org_id,
            is_disabled: false,
        };

        self.users.insert(
            user.id,
            UserRecord {
                user: user.clone(),
                password_hash: None,
                last_seen_at: None,
            },
        );
        self.memberships.insert(
            (user.id, self.default_org_id),
            info.role.unwrap_or(OrgRole::Viewer),
        );

        tracing::info!(
            user_id = user.id,
            auth_module = %info.auth_module,
            "Provisioned external user"
        );
        Ok(user)
    }

    async fn get_org_by_name(&self, name: &str) -> Result<Org, StoreError> {
        self.orgs
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_last_seen(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut record = self.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        record.last_seen_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert(&self, mut token: SessionToken) -> Result<SessionToken, StoreError> {
        token.id = self.next_id();
        self.tokens.insert(token.id, token.clone());
        Ok(token)
    }

    async fn find_by_hash(&self, hashed_token: &str) -> Result<SessionToken, StoreError> {
        self.tokens
            .iter()
            .find(|t| t.hashed_token == hashed_token)
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn mark_seen(&self, token_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut token = self.tokens.get_mut(&token_id).ok_or(StoreError::NotFound)?;
        token.auth_token_seen = true;
        token.seen_at = Some(at);
        Ok(())
    }

    async fn rotate(&self, command: &RotateCommand) -> Result<bool, StoreError> {
        // The shard lock held by get_mut makes check-and-swap atomic.
        let Some(mut token) = self.tokens.get_mut(&command.token_id) else {
            return Ok(false);
        };
        if token.hashed_token != command.expected_hash || token.rotated_at >= command.rotated_before
        {
            return Ok(false);
        }

        token.hashed_token = command.new_hash.clone();
        token.rotated_at = command.now;
        token.auth_token_seen = false;
        token.seen_at = None;
        token.client_ip = command.client_ip.clone();
        token.user_agent = command.user_agent.clone();
        Ok(true)
    }

    async fn revoke(&self, token_id: i64) -> Result<(), StoreError> {
        self.tokens
            .remove(&token_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl RenderService for MemoryStore {
    async fn get_render_user(&self, render_key: &str) -> Option<RenderUser> {
        self.render_keys.get(render_key).map(|u| u.value().clone())
    }
}
