//! Browser session tokens: issue, look up, rotate and revoke.
//!
//! The client holds a random token; the server keeps only its HMAC. A
//! rotation swaps both, after which the previous client value no longer
//! resolves.

use axum_extra::extract::cookie::Cookie;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::error::{SessionError, StoreError};
use super::store::TokenStore;
use crate::config::{CookieConfig, SessionConfig};
use crate::models::{RotateCommand, SessionToken};
use crate::utils::cookies;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 16;

pub struct SessionTokenManager {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    session: SessionConfig,
    cookie: CookieConfig,
    secret_key: Secret<String>,
}

impl SessionTokenManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        session: SessionConfig,
        cookie: CookieConfig,
        secret_key: Secret<String>,
    ) -> Self {
        Self {
            store,
            clock,
            session,
            cookie,
            secret_key,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.session.cookie_name
    }

    pub async fn create_token(
        &self,
        user_id: i64,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<SessionToken, SessionError> {
        let unhashed = random_token();
        let now = self.clock.now();

        let mut token = self
            .store
            .insert(SessionToken {
                id: 0,
                user_id,
                hashed_token: self.hash_token(&unhashed)?,
                unhashed_token: String::new(),
                auth_token_seen: false,
                seen_at: None,
                client_ip: client_ip.to_string(),
                user_agent: user_agent.to_string(),
                created_at: now,
                rotated_at: now,
            })
            .await?;

        tracing::info!(user_id, token_id = token.id, "Issued session token");
        token.unhashed_token = unhashed;
        Ok(token)
    }

    /// Resolves a client-held token. `NotFound` and `Expired` are distinct
    /// so callers can log them apart; both mean "not signed in".
    pub async fn lookup_token(&self, unhashed: &str) -> Result<SessionToken, SessionError> {
        let hashed = self.hash_token(unhashed)?;
        let mut token = match self.store.find_by_hash(&hashed).await {
            Ok(token) => token,
            Err(StoreError::NotFound) => return Err(SessionError::NotFound),
            Err(e) => return Err(e.into()),
        };

        let now = self.clock.now();
        if token.created_at + self.session.max_lifetime <= now {
            return Err(SessionError::Expired);
        }
        if self.session.max_inactive_lifetime > chrono::Duration::zero()
            && token.rotated_at + self.session.max_inactive_lifetime <= now
        {
            return Err(SessionError::Expired);
        }

        if !token.auth_token_seen {
            self.store.mark_seen(token.id, now).await?;
            token.auth_token_seen = true;
            token.seen_at = Some(now);
        }

        token.unhashed_token = unhashed.to_string();
        Ok(token)
    }

    /// Rotates `token` in place when its rotation window has elapsed.
    /// Returns whether this call rotated it. Nothing reaches the store when
    /// `cancel` has already fired.
    pub async fn try_rotate_token(
        &self,
        token: &mut SessionToken,
        client_ip: &str,
        user_agent: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, SessionError> {
        if cancel.is_cancelled() {
            tracing::debug!(token_id = token.id, "Request canceled, skipping token rotation");
            return Ok(false);
        }

        let now = self.clock.now();
        let rotated_before = now - self.session.rotation_interval;
        if token.rotated_at >= rotated_before {
            return Ok(false);
        }

        let unhashed = random_token();
        let new_hash = self.hash_token(&unhashed)?;
        let command = RotateCommand {
            token_id: token.id,
            expected_hash: token.hashed_token.clone(),
            new_hash: new_hash.clone(),
            client_ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            now,
            rotated_before,
        };

        if !self.store.rotate(&command).await? {
            tracing::debug!(token_id = token.id, "Token already rotated by another request");
            return Ok(false);
        }

        token.hashed_token = new_hash;
        token.unhashed_token = unhashed;
        token.rotated_at = now;
        token.auth_token_seen = false;
        token.seen_at = None;
        token.client_ip = command.client_ip;
        token.user_agent = command.user_agent;

        tracing::debug!(token_id = token.id, user_id = token.user_id, "Rotated session token");
        Ok(true)
    }

    pub async fn revoke_token(&self, token: &SessionToken) -> Result<(), SessionError> {
        match self.store.revoke(token.id).await {
            Ok(()) | Err(StoreError::NotFound) => {
                tracing::info!(token_id = token.id, user_id = token.user_id, "Revoked session token");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cookie carrying `token`, valid for the session max lifetime.
    pub fn session_cookie(&self, token: &SessionToken) -> Cookie<'static> {
        cookies::session_cookie(
            &self.cookie,
            &self.session.cookie_name,
            &token.unhashed_token,
            self.session.max_lifetime,
        )
    }

    pub fn clear_cookie(&self) -> Cookie<'static> {
        cookies::expired_session_cookie(&self.cookie, &self.session.cookie_name)
    }

    fn hash_token(&self, unhashed: &str) -> Result<String, SessionError> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| SessionError::Hashing(format!("Invalid key length: {}", e)))?;
        mac.update(unhashed.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
