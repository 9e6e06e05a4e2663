//! Request identity resolution.
//!
//! [`AuthResolver`] runs the strategies in order until one claims the
//! request. [`context_handler`] wires it into axum: it attaches the
//! resulting [`ReqContext`] to the request, runs the handler, then applies
//! cookie updates and the deferred session rotation to the response.

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::Cookie;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{Identity, SessionToken};
use crate::services::{Clock, SessionTokenManager, UserStore};
use crate::utils::cookies::append_cookies;

/// Header selecting the org the identity is resolved for.
pub const ORG_ID_HEADER: &str = "x-org-id";

/// What the strategies get to see of a request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub headers: HeaderMap,
    /// `ip:port` of the peer, empty when unknown.
    pub remote_addr: String,
    pub org_id: Option<i64>,
}

impl AuthRequest {
    pub fn from_request(req: &Request) -> Self {
        let remote_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let org_id = req
            .headers()
            .get(ORG_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0);

        Self {
            headers: req.headers().clone(),
            remote_addr,
            org_id,
        }
    }

    pub fn client_ip(&self) -> String {
        match self.remote_addr.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => self.remote_addr.clone(),
        }
    }

    pub fn user_agent(&self) -> String {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

/// Result of one strategy. `Rejected` is terminal: the error is the
/// response and no later strategy runs.
#[derive(Debug)]
pub enum StrategyOutcome {
    NotApplicable,
    Resolved {
        identity: Identity,
        session: Option<SessionToken>,
    },
    Rejected(AppError),
}

impl StrategyOutcome {
    pub fn resolved(identity: Identity) -> Self {
        StrategyOutcome::Resolved {
            identity,
            session: None,
        }
    }
}

#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cookies pushed onto `cookies` are written to the response even when
    /// the strategy does not apply.
    async fn resolve(
        &self,
        request: &AuthRequest,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> StrategyOutcome;
}

/// Outcome of a full resolution.
#[derive(Debug, Default)]
pub struct Resolution {
    pub identity: Identity,
    /// Strategy that claimed the request, if any.
    pub strategy: Option<&'static str>,
    pub session: Option<SessionToken>,
    pub cookies: Vec<Cookie<'static>>,
}

pub struct AuthResolver {
    strategies: Vec<Box<dyn AuthStrategy>>,
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionTokenManager>,
    clock: Arc<dyn Clock>,
}

impl AuthResolver {
    /// `strategies` are tried in the given order.
    pub fn new(
        strategies: Vec<Box<dyn AuthStrategy>>,
        users: Arc<dyn UserStore>,
        sessions: Arc<SessionTokenManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategies,
            users,
            sessions,
            clock,
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn sessions(&self) -> &Arc<SessionTokenManager> {
        &self.sessions
    }

    pub async fn resolve(&self, request: &AuthRequest) -> Result<Resolution, AppError> {
        let mut cookies = Vec::new();

        for strategy in &self.strategies {
            match strategy.resolve(request, &mut cookies).await {
                StrategyOutcome::NotApplicable => continue,
                StrategyOutcome::Rejected(e) => {
                    tracing::debug!(strategy = strategy.name(), error = %e, "Request rejected");
                    return Err(e);
                }
                StrategyOutcome::Resolved { identity, session } => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        user_id = identity.user_id,
                        org_id = identity.org_id,
                        "Resolved request identity"
                    );
                    self.touch_last_seen(&identity);
                    return Ok(Resolution {
                        identity,
                        strategy: Some(strategy.name()),
                        session,
                        cookies,
                    });
                }
            }
        }

        Ok(Resolution {
            cookies,
            ..Default::default()
        })
    }

    /// Fire-and-forget refresh of the user's last-seen stamp.
    fn touch_last_seen(&self, identity: &Identity) {
        let now = self.clock.now();
        if !identity.should_update_last_seen(now) {
            return;
        }

        let users = self.users.clone();
        let user_id = identity.user_id;
        tokio::spawn(async move {
            if let Err(e) = users.update_last_seen(user_id, now).await {
                tracing::error!(user_id, error = %e, "Failed to update last seen");
            }
        });
    }
}

/// Session rotation bound to one request, applied after the handler has
/// produced its response.
pub struct RotationHook {
    sessions: Arc<SessionTokenManager>,
    token: SessionToken,
    client_ip: String,
    user_agent: String,
    cancel: CancellationToken,
}

impl RotationHook {
    pub fn new(
        sessions: Arc<SessionTokenManager>,
        token: SessionToken,
        request: &AuthRequest,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            token,
            client_ip: request.client_ip(),
            user_agent: request.user_agent(),
            cancel,
        }
    }

    /// Returns the cookie carrying the new token when a rotation happened.
    pub async fn apply(mut self) -> Option<Cookie<'static>> {
        match self
            .sessions
            .try_rotate_token(&mut self.token, &self.client_ip, &self.user_agent, &self.cancel)
            .await
        {
            Ok(true) => Some(self.sessions.session_cookie(&self.token)),
            Ok(false) => None,
            Err(e) => {
                tracing::error!(token_id = self.token.id, error = %e, "Failed to rotate session token");
                None
            }
        }
    }
}

/// Per-request identity, available to handlers through extensions.
#[derive(Debug, Clone, Default)]
pub struct ReqContext {
    pub identity: Identity,
    pub strategy: Option<&'static str>,
    pub session: Option<SessionToken>,
}

impl ReqContext {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_signed_in
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ReqContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<ReqContext>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Request context missing from request extensions"
            ))
        })
    }
}

/// Gives each request a child of the server's shutdown token unless an
/// outer layer already supplied one.
pub async fn request_cancellation(
    State(shutdown): State<CancellationToken>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.extensions().get::<CancellationToken>().is_none() {
        req.extensions_mut().insert(shutdown.child_token());
    }
    next.run(req).await
}

/// Resolves the identity, runs the rest of the stack and finishes the
/// response with cookie updates and session rotation.
///
/// Rotation is skipped once the request's [`CancellationToken`] has fired.
/// A client that disconnects drops this future, so the hook never runs.
pub async fn context_handler(
    State(resolver): State<Arc<AuthResolver>>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth_request = AuthRequest::from_request(&req);
    let cancel = req
        .extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default();

    let resolution = match resolver.resolve(&auth_request).await {
        Ok(resolution) => resolution,
        Err(e) => return e.into_response(),
    };

    let hook = resolution.session.clone().map(|token| {
        RotationHook::new(resolver.sessions().clone(), token, &auth_request, cancel)
    });

    req.extensions_mut().insert(ReqContext {
        identity: resolution.identity,
        strategy: resolution.strategy,
        session: resolution.session,
    });

    let mut response = next.run(req).await;
    append_cookies(response.headers_mut(), &resolution.cookies);

    if let Some(hook) = hook {
        if let Some(cookie) = hook.apply().await {
            append_cookies(response.headers_mut(), [&cookie]);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CookieConfig, SessionConfig};
    use crate::services::{FixedClock, MemoryStore, SystemClock};
    use chrono::Utc;
    use secrecy::Secret;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        outcome: fn() -> StrategyOutcome,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AuthStrategy for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(
            &self,
            _request: &AuthRequest,
            cookies: &mut Vec<Cookie<'static>>,
        ) -> StrategyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            cookies.push(Cookie::new(self.name, "seen"));
            (self.outcome)()
        }
    }

    fn scripted(
        name: &'static str,
        outcome: fn() -> StrategyOutcome,
    ) -> (Box<dyn AuthStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Scripted {
                name,
                outcome,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn resolver(strategies: Vec<Box<dyn AuthStrategy>>) -> AuthResolver {
        let store = Arc::new(MemoryStore::new());
        let sessions = Arc::new(SessionTokenManager::new(
            store.clone(),
            Arc::new(SystemClock),
            SessionConfig::default(),
            CookieConfig::default(),
            Secret::new("secret".to_string()),
        ));
        AuthResolver::new(strategies, store, sessions, Arc::new(SystemClock))
    }

    fn signed_in() -> StrategyOutcome {
        StrategyOutcome::resolved(Identity {
            is_signed_in: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_first_claiming_strategy_wins() {
        let (first, first_calls) = scripted("first", || StrategyOutcome::NotApplicable);
        let (second, _) = scripted("second", signed_in);
        let (third, third_calls) = scripted("third", signed_in);

        let resolution = resolver(vec![first, second, third])
            .resolve(&AuthRequest::default())
            .await
            .unwrap();

        assert_eq!(resolution.strategy, Some("second"));
        assert!(resolution.identity.is_signed_in);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolution.cookies.len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let (first, _) = scripted("first", || {
            StrategyOutcome::Rejected(AppError::auth("Invalid Render Key"))
        });
        let (second, second_calls) = scripted("second", signed_in);

        let err = resolver(vec![first, second])
            .resolve(&AuthRequest::default())
            .await
            .unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unclaimed_request_is_unsigned() {
        let (only, _) = scripted("only", || StrategyOutcome::NotApplicable);

        let resolution = resolver(vec![only])
            .resolve(&AuthRequest::default())
            .await
            .unwrap();

        assert_eq!(resolution.strategy, None);
        assert_eq!(resolution.identity, Identity::default());
    }

    #[tokio::test]
    async fn test_resolution_touches_last_seen() {
        let store = Arc::new(MemoryStore::new());
        let user = store
            .add_user("admin", "admin@example.com", "pw", crate::models::OrgRole::Admin)
            .unwrap();
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let sessions = Arc::new(SessionTokenManager::new(
            store.clone(),
            clock.clone(),
            SessionConfig::default(),
            CookieConfig::default(),
            Secret::new("secret".to_string()),
        ));

        struct Fixed(i64);

        #[async_trait]
        impl AuthStrategy for Fixed {
            fn name(&self) -> &'static str {
                "fixed"
            }

            async fn resolve(
                &self,
                _request: &AuthRequest,
                _cookies: &mut Vec<Cookie<'static>>,
            ) -> StrategyOutcome {
                StrategyOutcome::resolved(Identity {
                    is_signed_in: true,
                    user_id: self.0,
                    ..Default::default()
                })
            }
        }

        let resolver = AuthResolver::new(
            vec![Box::new(Fixed(user.id)) as Box<dyn AuthStrategy>],
            store.clone(),
            sessions,
            clock.clone(),
        );
        resolver.resolve(&AuthRequest::default()).await.unwrap();

        for _ in 0..50 {
            if store.last_seen(user.id).is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.last_seen(user.id), Some(clock.now()));
    }

    #[test]
    fn test_org_header_and_client_ip() {
        let mut req = Request::builder()
            .header(ORG_ID_HEADER, "3")
            .header(header::USER_AGENT, "curl/8")
            .body(axum::body::Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("10.1.2.3:4567".parse::<SocketAddr>().unwrap()));

        let auth_request = AuthRequest::from_request(&req);
        assert_eq!(auth_request.org_id, Some(3));
        assert_eq!(auth_request.remote_addr, "10.1.2.3:4567");
        assert_eq!(auth_request.client_ip(), "10.1.2.3");
        assert_eq!(auth_request.user_agent(), "curl/8");

        let req = Request::builder()
            .header(ORG_ID_HEADER, "abc")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(AuthRequest::from_request(&req).org_id, None);
    }
}
