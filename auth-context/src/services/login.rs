//! Username/password authentication shared by basic auth and the login
//! endpoint: local store first, then the directory.

use std::sync::Arc;

use service_core::error::AppError;

use super::directory::DirectoryProvider;
use super::error::StoreError;
use super::login_attempts::LoginAttempts;
use super::store::UserStore;
use crate::models::{LoginQuery, User};
use crate::utils::Password;

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";
const TOO_MANY_ATTEMPTS: &str =
    "Too many consecutive incorrect login attempts for user - login for user temporarily blocked";

#[derive(Clone)]
pub struct LoginService {
    users: Arc<dyn UserStore>,
    directory: Arc<DirectoryProvider>,
    attempts: LoginAttempts,
}

impl LoginService {
    pub fn new(
        users: Arc<dyn UserStore>,
        directory: Arc<DirectoryProvider>,
        attempts: LoginAttempts,
    ) -> Self {
        Self {
            users,
            directory,
            attempts,
        }
    }

    /// Verifies `username`/`password`. Blocked usernames get 429 before any
    /// credential check; only a rejected credential counts as an attempt.
    pub async fn authenticate(&self, username: &str, password: &Password) -> Result<User, AppError> {
        if let Err(retry_after) = self.attempts.check(username) {
            tracing::warn!(username = %username, "Login attempts exhausted");
            return Err(AppError::TooManyRequests(
                TOO_MANY_ATTEMPTS.to_string(),
                Some(retry_after),
            ));
        }

        let result = self.verify(username, password).await;
        if matches!(result, Err(AppError::AuthError { .. })) {
            self.attempts.record_failure(username);
        }
        result
    }

    async fn verify(&self, username: &str, password: &Password) -> Result<User, AppError> {
        if password.is_empty() {
            return Err(AppError::auth(INVALID_CREDENTIALS));
        }

        match self.users.get_user_by_credentials(username, password).await {
            Ok(user) => Ok(user),
            Err(StoreError::InvalidCredentials) if self.directory.is_enabled() => {
                self.authenticate_with_directory(username, password).await
            }
            Err(e) => {
                tracing::debug!(username = %username, error = %e, "Local login failed");
                Err(AppError::auth_with_cause(INVALID_CREDENTIALS, e))
            }
        }
    }

    async fn authenticate_with_directory(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<User, AppError> {
        let client = self
            .directory
            .client()
            .await
            .map_err(|e| AppError::internal("Failed to get the user", e))?;

        let query = LoginQuery {
            username: username.to_string(),
            password: password.clone(),
        };
        let info = client.login(&query).await.map_err(|e| {
            tracing::debug!(username = %username, error = %e, "Directory login failed");
            AppError::auth_with_cause(INVALID_CREDENTIALS, e)
        })?;

        let user = self
            .users
            .upsert_external_user(&info, self.directory.allow_sign_up())
            .await
            .map_err(|e| AppError::auth_with_cause(INVALID_CREDENTIALS, e))?;

        tracing::info!(user_id = user.id, "Authenticated user via directory");
        Ok(user)
    }
}
