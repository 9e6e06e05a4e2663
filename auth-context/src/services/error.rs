use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User is disabled")]
    UserDisabled,

    #[error("Sign up is not allowed")]
    SignupNotAllowed,

    #[error("Store error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache item not found")]
    NotFound,

    #[error("Cache error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ApiKeyError {
    #[error("Invalid API key format")]
    InvalidFormat,

    #[error("Failed to hash API key: {0}")]
    Hashing(String),
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("No directory servers configured")]
    NoServers,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Could not find user in directory")]
    UserNotFound,

    #[error("Failed to connect to directory server {host}:{port}: {source}")]
    Dial {
        host: String,
        port: u16,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to bind to directory server: {0}")]
    Bind(anyhow::Error),

    #[error("Directory search failed: {0}")]
    Search(anyhow::Error),

    #[error("Failed to load directory settings: {0}")]
    Settings(anyhow::Error),
}

impl DirectoryError {
    /// Errors that only mean "not on this server" and let the next one try.
    pub fn is_silent(&self) -> bool {
        matches!(
            self,
            DirectoryError::InvalidCredentials | DirectoryError::UserNotFound
        )
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("User token not found")]
    NotFound,

    #[error("User token expired")]
    Expired,

    #[error("Failed to hash token: {0}")]
    Hashing(String),

    #[error("Token store error: {0}")]
    Store(#[from] StoreError),
}

/// Auth proxy failure: `message` is the client-facing reason, `details`
/// the underlying cause, which stays server-side outside dev.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProxyAuthError {
    pub message: String,
    #[source]
    pub details: Option<anyhow::Error>,
}

impl ProxyAuthError {
    pub fn new(message: impl Into<String>, details: impl Into<anyhow::Error>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }

    pub fn details_string(&self) -> Option<String> {
        self.details.as_ref().map(|e| e.to_string())
    }
}

impl From<ProxyAuthError> for AppError {
    fn from(err: ProxyAuthError) -> Self {
        let details = err.details_string();
        AppError::proxy_auth_required(err.message, details)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound(anyhow::anyhow!("Not found")),
            StoreError::InvalidCredentials | StoreError::UserDisabled => {
                AppError::auth_with_cause("Invalid username or password", err)
            }
            StoreError::SignupNotAllowed => {
                AppError::Forbidden(anyhow::anyhow!("Sign up is not allowed"))
            }
            StoreError::Backend(e) => AppError::InternalError(e),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}
