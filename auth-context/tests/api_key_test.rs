mod common;

use auth_context::{
    models::OrgRole,
    services::{ApiKeyCodec, Clock},
    utils::encode_basic_auth_header,
};
use axum::http::{header, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Duration;
use common::TestApp;

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

#[tokio::test]
async fn test_bearer_key_resolves_org_identity() {
    let app = TestApp::new();
    let org = app.store.default_org_id();
    let (token, key) = app
        .store
        .add_api_key(org, "ci", OrgRole::Editor, None)
        .unwrap();

    let res = app
        .get_user(&[(header::AUTHORIZATION.as_str(), &bearer(&token))])
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["is_signed_in"], true);
    assert_eq!(res.body["org_id"], org);
    assert_eq!(res.body["org_role"], "Editor");
    assert_eq!(res.body["api_key_id"], key.id);
    assert_eq!(res.body["user_id"], 0);
}

#[tokio::test]
async fn test_key_as_basic_auth_password() {
    let app = TestApp::new();
    let org = app.store.default_org_id();
    let (token, key) = app
        .store
        .add_api_key(org, "ci", OrgRole::Viewer, None)
        .unwrap();
    let auth = encode_basic_auth_header("api_key", &token);

    let res = app.get_user(&[(header::AUTHORIZATION.as_str(), &auth)]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["api_key_id"], key.id);
}

#[tokio::test]
async fn test_malformed_key_is_rejected() {
    let app = TestApp::new();

    let res = app
        .get_user(&[(header::AUTHORIZATION.as_str(), "Bearer not-a-key")])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}

#[tokio::test]
async fn test_unknown_key_is_rejected() {
    let app = TestApp::new();
    let generated = ApiKeyCodec::generate(app.store.default_org_id(), "never-stored").unwrap();

    let res = app
        .get_user(&[(
            header::AUTHORIZATION.as_str(),
            &bearer(&generated.encoded_token),
        )])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let app = TestApp::new();
    let org = app.store.default_org_id();
    app.store
        .add_api_key(org, "ci", OrgRole::Viewer, None)
        .unwrap();

    // Same name and owner, different secret.
    let forged = STANDARD.encode(
        serde_json::json!({ "k": "guessed", "n": "ci", "id": org }).to_string(),
    );

    let res = app
        .get_user(&[(header::AUTHORIZATION.as_str(), &bearer(&forged))])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}

#[tokio::test]
async fn test_revoked_key_is_rejected() {
    let app = TestApp::new();
    let (token, key) = app
        .store
        .add_api_key(app.store.default_org_id(), "ci", OrgRole::Viewer, None)
        .unwrap();
    app.store.revoke_api_key(key.id);

    let res = app
        .get_user(&[(header::AUTHORIZATION.as_str(), &bearer(&token))])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}

#[tokio::test]
async fn test_key_expires_at_its_deadline() {
    let app = TestApp::new();
    let expires = app.clock.now() + Duration::hours(1);
    let (token, _) = app
        .store
        .add_api_key(
            app.store.default_org_id(),
            "short-lived",
            OrgRole::Viewer,
            Some(expires),
        )
        .unwrap();
    let auth = bearer(&token);

    let res = app.get_user(&[(header::AUTHORIZATION.as_str(), &auth)]).await;
    assert_eq!(res.status, StatusCode::OK);

    app.clock.set(expires);
    let res = app.get_user(&[(header::AUTHORIZATION.as_str(), &auth)]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}

#[tokio::test]
async fn test_renamed_key_is_rejected() {
    let app = TestApp::new();
    let (token, _) = app
        .store
        .add_api_key(app.store.default_org_id(), "ci", OrgRole::Admin, None)
        .unwrap();

    let mut decoded = ApiKeyCodec::decode(&token).unwrap();
    decoded.name = "ci-renamed".to_string();
    let renamed = STANDARD.encode(serde_json::to_vec(&decoded).unwrap());

    let res = app
        .get_user(&[(header::AUTHORIZATION.as_str(), &bearer(&renamed))])
        .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "Invalid API key");
}
