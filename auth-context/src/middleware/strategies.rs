//! The individual ways a request can identify itself, in the order the
//! resolver tries them.

use async_trait::async_trait;
use axum::http::header;
use axum_extra::extract::cookie::Cookie;
use service_core::error::AppError;
use std::sync::Arc;

use super::context::{AuthRequest, AuthStrategy, StrategyOutcome};
use crate::config::AnonymousConfig;
use crate::models::Identity;
use crate::services::{
    ApiKeyCodec, Clock, LoginService, ProxyAuthenticator, RenderService, SessionTokenManager,
    UserStore,
};
use crate::utils::cookies::read_cookie;
use crate::utils::decode_basic_auth_header;

pub const RENDER_KEY_COOKIE: &str = "renderKey";
const API_KEY_BASIC_USER: &str = "api_key";
const INVALID_API_KEY: &str = "Invalid API key";

pub struct RenderKeyStrategy {
    render: Arc<dyn RenderService>,
    clock: Arc<dyn Clock>,
}

impl RenderKeyStrategy {
    pub fn new(render: Arc<dyn RenderService>, clock: Arc<dyn Clock>) -> Self {
        Self { render, clock }
    }
}

#[async_trait]
impl AuthStrategy for RenderKeyStrategy {
    fn name(&self) -> &'static str {
        "render_key"
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        _cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        let Some(key) = read_cookie(&request.headers, RENDER_KEY_COOKIE) else {
            return StrategyOutcome::NotApplicable;
        };

        match self.render.get_render_user(&key).await {
            Some(render_user) => StrategyOutcome::resolved(Identity {
                is_signed_in: true,
                is_render_call: true,
                user_id: render_user.user_id,
                org_id: render_user.org_id,
                org_role: render_user.org_role,
                last_seen_at: Some(self.clock.now()),
                ..Default::default()
            }),
            None => StrategyOutcome::Rejected(AppError::auth("Invalid Render Key")),
        }
    }
}

pub struct ApiKeyStrategy {
    users: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
}

impl ApiKeyStrategy {
    pub fn new(users: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Self {
        Self { users, clock }
    }

    /// `Bearer <key>`, or basic auth whose username is `api_key`.
    fn presented_key(request: &AuthRequest) -> Option<String> {
        let value = request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())?;

        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }

        match decode_basic_auth_header(value) {
            Ok((username, password)) if username == API_KEY_BASIC_USER => {
                Some(password.expose().to_string())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl AuthStrategy for ApiKeyStrategy {
    fn name(&self) -> &'static str {
        "api_key"
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        _cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        let Some(presented) = Self::presented_key(request) else {
            return StrategyOutcome::NotApplicable;
        };

        let decoded = match ApiKeyCodec::decode(&presented) {
            Ok(decoded) => decoded,
            Err(e) => {
                return StrategyOutcome::Rejected(AppError::auth_with_cause(INVALID_API_KEY, e))
            }
        };

        let key = match self
            .users
            .get_api_key_by_name(&decoded.name, decoded.owner_id)
            .await
        {
            Ok(key) => key,
            Err(e) => {
                return StrategyOutcome::Rejected(AppError::auth_with_cause(INVALID_API_KEY, e))
            }
        };

        match ApiKeyCodec::is_valid(&decoded, &key.hashed_key) {
            Ok(true) => {}
            Ok(false) => {
                return StrategyOutcome::Rejected(AppError::auth_with_cause(
                    INVALID_API_KEY,
                    anyhow::anyhow!("API key hash mismatch"),
                ))
            }
            Err(e) => {
                return StrategyOutcome::Rejected(AppError::internal(
                    "Validating API key failed",
                    e,
                ))
            }
        }

        if key.revoked {
            return StrategyOutcome::Rejected(AppError::auth_with_cause(
                INVALID_API_KEY,
                anyhow::anyhow!("API key {} is revoked", key.id),
            ));
        }
        if key.is_expired(self.clock.now()) {
            return StrategyOutcome::Rejected(AppError::auth_with_cause(
                INVALID_API_KEY,
                anyhow::anyhow!("API key {} has expired", key.id),
            ));
        }

        tracing::debug!(api_key_id = key.id, org_id = key.owner_id, "Resolved API key");
        StrategyOutcome::resolved(Identity {
            is_signed_in: true,
            org_id: key.owner_id,
            org_role: key.role,
            api_key_id: Some(key.id),
            ..Default::default()
        })
    }
}

pub struct BasicAuthStrategy {
    enabled: bool,
    login: LoginService,
    users: Arc<dyn UserStore>,
}

impl BasicAuthStrategy {
    pub fn new(enabled: bool, login: LoginService, users: Arc<dyn UserStore>) -> Self {
        Self {
            enabled,
            login,
            users,
        }
    }
}

#[async_trait]
impl AuthStrategy for BasicAuthStrategy {
    fn name(&self) -> &'static str {
        "basic"
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        _cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        if !self.enabled {
            return StrategyOutcome::NotApplicable;
        }
        let Some(value) = request.headers.get(header::AUTHORIZATION) else {
            return StrategyOutcome::NotApplicable;
        };

        let decoded = value
            .to_str()
            .map_err(anyhow::Error::from)
            .and_then(decode_basic_auth_header);
        let (username, password) = match decoded {
            Ok(pair) => pair,
            Err(e) => {
                return StrategyOutcome::Rejected(AppError::auth_with_cause(
                    "Invalid Basic Auth Header",
                    e,
                ))
            }
        };

        let user = match self.login.authenticate(&username, &password).await {
            Ok(user) => user,
            Err(e) => return StrategyOutcome::Rejected(e),
        };

        match self.users.get_signed_in_user(user.id, request.org_id).await {
            Ok(identity) => StrategyOutcome::resolved(identity.signed_in()),
            Err(e) => {
                tracing::error!(user_id = user.id, error = %e, "Failed to get signed in user");
                StrategyOutcome::Rejected(AppError::auth_with_cause(
                    crate::services::login::INVALID_CREDENTIALS,
                    e,
                ))
            }
        }
    }
}

pub struct ProxyStrategy {
    proxy: Arc<ProxyAuthenticator>,
    /// Render 407 details in the body. Dev deployments only.
    expose_details: bool,
}

impl ProxyStrategy {
    pub fn new(proxy: Arc<ProxyAuthenticator>, expose_details: bool) -> Self {
        Self {
            proxy,
            expose_details,
        }
    }
}

#[async_trait]
impl AuthStrategy for ProxyStrategy {
    fn name(&self) -> &'static str {
        "auth_proxy"
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        _cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        if !self.proxy.is_enabled() {
            return StrategyOutcome::NotApplicable;
        }
        let Some(proxy_request) =
            self.proxy
                .request(&request.headers, &request.remote_addr, request.org_id)
        else {
            return StrategyOutcome::NotApplicable;
        };

        match self.proxy.authenticate(&proxy_request).await {
            Ok(identity) => StrategyOutcome::resolved(identity),
            Err(e) => {
                tracing::warn!(user = %proxy_request.header, error = %e, "Auth proxy login failed");
                if self.expose_details {
                    StrategyOutcome::Rejected(e.with_exposed_details())
                } else {
                    StrategyOutcome::Rejected(e)
                }
            }
        }
    }
}

pub struct SessionStrategy {
    sessions: Arc<SessionTokenManager>,
    users: Arc<dyn UserStore>,
}

impl SessionStrategy {
    pub fn new(sessions: Arc<SessionTokenManager>, users: Arc<dyn UserStore>) -> Self {
        Self { sessions, users }
    }
}

#[async_trait]
impl AuthStrategy for SessionStrategy {
    fn name(&self) -> &'static str {
        "session"
    }

    async fn resolve(
        &self,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        let Some(raw) = read_cookie(&request.headers, self.sessions.cookie_name()) else {
            return StrategyOutcome::NotApplicable;
        };

        let token = match self.sessions.lookup_token(&raw).await {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to look up session token");
                cookies.push(self.sessions.clear_cookie());
                return StrategyOutcome::NotApplicable;
            }
        };

        match self
            .users
            .get_signed_in_user(token.user_id, request.org_id)
            .await
        {
            Ok(identity) => StrategyOutcome::Resolved {
                identity: identity.signed_in(),
                session: Some(token),
            },
            Err(e) => {
                tracing::error!(user_id = token.user_id, error = %e, "Failed to get user for session");
                StrategyOutcome::NotApplicable
            }
        }
    }
}

pub struct AnonymousStrategy {
    config: AnonymousConfig,
    users: Arc<dyn UserStore>,
}

impl AnonymousStrategy {
    pub fn new(config: AnonymousConfig, users: Arc<dyn UserStore>) -> Self {
        Self { config, users }
    }
}

#[async_trait]
impl AuthStrategy for AnonymousStrategy {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    async fn resolve(
        &self,
        _request: &AuthRequest,
        _cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome {
        if !self.config.enabled {
            return StrategyOutcome::NotApplicable;
        }

        match self.users.get_org_by_name(&self.config.org_name).await {
            Ok(org) => StrategyOutcome::resolved(Identity {
                is_anonymous: true,
                allow_anonymous: true,
                org_id: org.id,
                org_name: org.name,
                org_role: self.config.org_role,
                ..Default::default()
            }),
            Err(e) => {
                tracing::error!(
                    org_name = %self.config.org_name,
                    error = %e,
                    "Anonymous access enabled but org not found"
                );
                StrategyOutcome::NotApplicable
            }
        }
    }
}
