use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// HTTP-facing error. Every variant renders a terminal response, so a
/// handler that returns one has fully answered the request.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    /// 401 carrying a client-safe message plus an internal cause that is
    /// logged but never rendered.
    #[error("Authentication error: {message}")]
    AuthError {
        message: String,
        #[source]
        cause: Option<anyhow::Error>,
    },

    /// 407 from the auth proxy strategy. `details` is logged; it reaches
    /// the body only when `expose_details` is set.
    #[error("Proxy authentication required: {message}")]
    ProxyAuthRequired {
        message: String,
        details: Option<String>,
        expose_details: bool,
    },

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    /// 500 whose message is safe to render; the cause is only logged.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn auth(message: impl Into<String>) -> Self {
        AppError::AuthError {
            message: message.into(),
            cause: None,
        }
    }

    pub fn auth_with_cause(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        AppError::AuthError {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn internal(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        AppError::Internal {
            message: message.into(),
            cause: cause.into(),
        }
    }

    pub fn proxy_auth_required(message: impl Into<String>, details: Option<String>) -> Self {
        AppError::ProxyAuthRequired {
            message: message.into(),
            details,
            expose_details: false,
        }
    }

    /// Lets a 407 carry its details into the response body. Other
    /// variants are returned unchanged.
    pub fn with_exposed_details(self) -> Self {
        match self {
            AppError::ProxyAuthRequired {
                message, details, ..
            } => AppError::ProxyAuthRequired {
                message,
                details,
                expose_details: true,
            },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthError { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ProxyAuthRequired { .. } => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            AppError::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_)
            | AppError::Internal { .. }
            | AppError::RedisError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error_message, details, retry_after) = match self {
            AppError::NotFound(err) | AppError::Forbidden(err) => (err.to_string(), None, None),
            AppError::AuthError { message, cause } => {
                if let Some(cause) = cause {
                    tracing::debug!(error = %cause, "{}", message);
                }
                (message, None, None)
            }
            AppError::ProxyAuthRequired {
                message,
                details,
                expose_details,
            } => {
                if let Some(details) = &details {
                    tracing::error!(details = %details, "{}", message);
                }
                (message, details.filter(|_| expose_details), None)
            }
            AppError::TooManyRequests(msg, retry) => (msg, None, retry),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal server error");
                ("Internal server error".to_string(), None, None)
            }
            AppError::Internal { message, cause } => {
                tracing::error!(error = ?cause, "{}", message);
                (message, None, None)
            }
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None, None),
            AppError::RedisError(err) => {
                tracing::error!(error = %err, "Cache error");
                ("Cache error".to_string(), None, None)
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                ("Configuration error".to_string(), None, None)
            }
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry));
        }

        res
    }
}
