use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::middleware::ReqContext;
use crate::utils::Password;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user: String,
    pub password: String,
}

/// Checks credentials and starts a cookie session.
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<Value>), AppError> {
    let user = state
        .login
        .authenticate(&req.user, &Password::new(req.password))
        .await?;

    let client_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let token = state
        .sessions
        .create_token(user.id, &client_ip, user_agent)
        .await
        .map_err(|e| AppError::internal("Failed to create session", e))?;

    tracing::info!(user_id = user.id, "User logged in");

    let jar = CookieJar::new().add(state.sessions.session_cookie(&token));
    Ok((jar, Json(json!({ "message": "Logged in", "id": user.id }))))
}

/// Revokes the current session, if any, and clears the cookie.
pub async fn logout(
    State(state): State<AppState>,
    ctx: ReqContext,
) -> Result<(CookieJar, Json<Value>), AppError> {
    if let Some(token) = &ctx.session {
        state
            .sessions
            .revoke_token(token)
            .await
            .map_err(|e| AppError::internal("Failed to revoke session", e))?;
    }

    let jar = CookieJar::new().add(state.sessions.clear_cookie());
    Ok((jar, Json(json!({ "message": "Logged out" }))))
}
