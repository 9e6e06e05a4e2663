//! Shared harness for auth-context integration tests: the real router over
//! a memory store, an in-process cache and a controllable clock.

#![allow(dead_code)]

use auth_context::{
    build_router,
    config::AuthContextConfig,
    services::{DirectoryProvider, FixedClock, MemoryCache, MemoryStore},
    AppState, Collaborators,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const PEER_ADDR: &str = "192.168.1.10:52000";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<FixedClock>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// Value of the `Set-Cookie` header for `name`, if any.
    pub fn set_cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{}=", name);
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&prefix))
            .map(String::from)
    }

    /// Just the cookie value of the `Set-Cookie` header for `name`.
    pub fn cookie_value(&self, name: &str) -> Option<String> {
        self.set_cookie(name).map(|raw| {
            raw.split(';')
                .next()
                .unwrap_or_default()
                .split_once('=')
                .map(|(_, v)| v.to_string())
                .unwrap_or_default()
        })
    }
}

pub fn test_config() -> AuthContextConfig {
    let mut config = AuthContextConfig::default();
    config.log_level = "error".to_string();
    config.service_name = "auth-context-test".to_string();
    config
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AuthContextConfig) -> Self {
        Self::with_directory(config, DirectoryProvider::disabled())
    }

    pub fn with_directory(config: AuthContextConfig, directory: DirectoryProvider) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));

        let mut deps = Collaborators::in_memory(store.clone(), cache.clone(), directory);
        deps.clock = clock.clone();

        let state = AppState::new(config, deps);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            store,
            cache,
            clock,
        }
    }

    /// Sends `request` from [`PEER_ADDR`] unless it already carries a peer.
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .is_none()
        {
            request
                .extensions_mut()
                .insert(ConnectInfo(PEER_ADDR.parse::<SocketAddr>().unwrap()));
        }

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get_user(&self, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().uri("/api/user");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn login(&self, user: &str, password: &str) -> TestResponse {
        let body = serde_json::json!({ "user": user, "password": password });
        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}
