pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::{AuthContextConfig, Environment};
use crate::middleware::{
    context_handler, request_cancellation, AnonymousStrategy, ApiKeyStrategy, AuthResolver, AuthStrategy,
    BasicAuthStrategy, ProxyStrategy, RenderKeyStrategy, SessionStrategy,
};
use crate::services::{
    CacheStore, Clock, DirectoryProvider, IdentityCache, LoginAttempts, LoginService, MemoryStore,
    ProxyAuthenticator, RenderService, SessionTokenManager, SystemClock, TokenStore, UserStore,
};

/// External collaborators the service is assembled from.
pub struct Collaborators {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub render: Arc<dyn RenderService>,
    pub cache: Arc<dyn CacheStore>,
    pub directory: DirectoryProvider,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Users, tokens and render keys all served by one memory store.
    pub fn in_memory(
        store: Arc<MemoryStore>,
        cache: Arc<dyn CacheStore>,
        directory: DirectoryProvider,
    ) -> Self {
        Self {
            users: store.clone(),
            tokens: store.clone(),
            render: store,
            cache,
            directory,
            clock: Arc::new(SystemClock),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthContextConfig>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionTokenManager>,
    pub login: LoginService,
    pub cache: IdentityCache,
    pub resolver: Arc<AuthResolver>,
    /// Fired on shutdown; in-flight requests then skip session rotation.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AuthContextConfig, deps: Collaborators) -> Self {
        let cache = IdentityCache::new(deps.cache);
        let directory = Arc::new(deps.directory);

        let sessions = Arc::new(SessionTokenManager::new(
            deps.tokens,
            deps.clock.clone(),
            config.session.clone(),
            config.cookie.clone(),
            config.secret_key.clone(),
        ));
        let login = LoginService::new(
            deps.users.clone(),
            directory.clone(),
            LoginAttempts::new(&config.login_attempts, deps.clock.clone()),
        );
        let proxy = Arc::new(ProxyAuthenticator::new(
            config.auth_proxy.clone(),
            cache.clone(),
            deps.users.clone(),
            directory,
        ));

        let strategies: Vec<Box<dyn AuthStrategy>> = vec![
            Box::new(RenderKeyStrategy::new(deps.render, deps.clock.clone())),
            Box::new(ApiKeyStrategy::new(deps.users.clone(), deps.clock.clone())),
            Box::new(BasicAuthStrategy::new(
                config.basic_auth.enabled,
                login.clone(),
                deps.users.clone(),
            )),
            Box::new(ProxyStrategy::new(
                proxy,
                config.environment == Environment::Dev,
            )),
            Box::new(SessionStrategy::new(sessions.clone(), deps.users.clone())),
            Box::new(AnonymousStrategy::new(
                config.anonymous.clone(),
                deps.users.clone(),
            )),
        ];
        let resolver = Arc::new(AuthResolver::new(
            strategies,
            deps.users.clone(),
            sessions.clone(),
            deps.clock,
        ));

        Self {
            config: Arc::new(config),
            users: deps.users,
            sessions,
            login,
            cache,
            resolver,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/user", get(handlers::user::current_user))
        .route("/api/login", post(handlers::session::login))
        .route("/api/logout", post(handlers::session::logout))
        .layer(from_fn_with_state(state.resolver.clone(), context_handler))
        .layer(from_fn_with_state(
            state.shutdown.clone(),
            request_cancellation,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(handlers::health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(service_core::middleware::REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}
