use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::error::StoreError;
use super::memory::MemoryStore;
use super::store::UserStore;
use crate::models::{ExternalUserInfo, Identity, Org, StoredApiKey, User};
use crate::utils::Password;

/// Memory-backed user store that counts calls and can be told to fail
/// identity expansion.
#[derive(Default)]
pub struct CountingUserStore {
    pub inner: MemoryStore,
    pub signed_in_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
    pub credential_calls: AtomicUsize,
    pub fail_signed_in: AtomicBool,
}

impl CountingUserStore {
    pub fn signed_in_calls(&self) -> usize {
        self.signed_in_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn credential_calls(&self) -> usize {
        self.credential_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for CountingUserStore {
    async fn get_user_by_credentials(
        &self,
        login: &str,
        password: &Password,
    ) -> Result<User, StoreError> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get_user_by_credentials(login, password).await
    }

    async fn get_signed_in_user(
        &self,
        user_id: i64,
        org_id: Option<i64>,
    ) -> Result<Identity, StoreError> {
        self.signed_in_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_signed_in.load(Ordering::SeqCst) {
            return Err(StoreError::NotFound);
        }
        self.inner.get_signed_in_user(user_id, org_id).await
    }

    async fn get_api_key_by_name(
        &self,
        name: &str,
        owner_id: i64,
    ) -> Result<StoredApiKey, StoreError> {
        self.inner.get_api_key_by_name(name, owner_id).await
    }

    async fn upsert_external_user(
        &self,
        info: &ExternalUserInfo,
        signup_allowed: bool,
    ) -> Result<User, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_external_user(info, signup_allowed).await
    }

    async fn get_org_by_name(&self, name: &str) -> Result<Org, StoreError> {
        self.inner.get_org_by_name(name).await
    }

    async fn update_last_seen(&self, user_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.update_last_seen(user_id, at).await
    }
}
