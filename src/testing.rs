//! Helpers for tests that need a live HTTP peer.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Form, Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose};
use serde_json::{Value, json};

use crate::{AppState, args::Args, db::memory::MemoryStore};

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_fake(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub const AMAZON_JSON: &str = r#"[{"amount": 89.99, "type": "debit", "category": "Shopping", "merchant": "Amazon", "description": "Online purchase", "transaction_date": "2024-11-05"}]"#;

const VALID_ACCESS_TOKENS: [&str; 3] = ["valid-access", "fresh-access", "refreshed-access"];

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

async fn auth_user(headers: HeaderMap) -> Response {
    match bearer(&headers).and_then(|token| token.strip_prefix("session-")) {
        Some(user_id) => Json(json!({ "id": user_id })).into_response(),
        None => (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" }))).into_response(),
    }
}

async fn token(Form(form): Form<HashMap<String, String>>) -> Response {
    let grant = form.get("grant_type").map(String::as_str);
    let code = form.get("code").map(String::as_str);
    let refresh = form.get("refresh_token").map(String::as_str);
    match (grant, code, refresh) {
        (Some("authorization_code"), Some("good-code"), _) => Json(json!({
            "access_token": "fresh-access",
            "expires_in": 3600,
            "refresh_token": "refresh-1",
            "token_type": "Bearer"
        }))
        .into_response(),
        (Some("refresh_token"), _, Some("refresh-1")) => Json(json!({
            "access_token": "refreshed-access",
            "expires_in": 3600,
            "token_type": "Bearer"
        }))
        .into_response(),
        _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" }))).into_response(),
    }
}

async fn list_messages(headers: HeaderMap) -> Response {
    if !bearer(&headers).is_some_and(|token| VALID_ACCESS_TOKENS.contains(&token)) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "messages": [{ "id": "m1" }, { "id": "m2" }] })).into_response()
}

async fn get_message(Path(id): Path<String>) -> Response {
    let (subject, body) = match id.as_str() {
        "m1" => ("Your Amazon order", "Paid $89.99 to Amazon on 2024-11-05"),
        _ => ("Newsletter", "BROKEN content"),
    };
    Json(json!({
        "id": id,
        "snippet": subject,
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                { "name": "Subject", "value": subject },
                { "name": "From", "value": "noreply@example.com" }
            ],
            "body": { "data": general_purpose::URL_SAFE.encode(body) }
        }
    }))
    .into_response()
}

fn reply(text: &str) -> Json<Value> {
    Json(json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }))
}

async fn generate(Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .unwrap_or_default();

    if prompt.starts_with("You are a financial assistant") {
        return reply("You spent the most at Amazon.");
    }
    if prompt.contains("BROKEN") {
        return reply("[{\"amount\": oops}]");
    }
    if prompt.contains("Amazon") {
        return reply(&format!("Here are the transactions:\n{}", AMAZON_JSON));
    }
    reply("No transactions found.")
}

/// One router standing in for the auth provider, Google OAuth, Gmail and Gemini.
pub fn fake_upstream() -> Router {
    Router::new()
        .route("/auth/v1/user", get(auth_user))
        .route("/token", post(token))
        .route("/gmail/users/me/messages", get(list_messages))
        .route("/gmail/users/me/messages/{id}", get(get_message))
        .route("/generate", post(generate))
}

pub fn test_args(upstream: &str) -> Args {
    Args {
        base_log_dir: String::new(),
        base_url: String::from("https://ledger.example.com"),
        port: 0,
        database_url: String::from("postgresql://unused"),
        google_client_id: String::from("client-id"),
        google_client_secret: String::from("client-secret"),
        gemini_api_key: Some(String::from("test-key")),
        gemini_url: format!("{}/generate", upstream),
        gmail_api_url: format!("{}/gmail", upstream),
        google_token_url: format!("{}/token", upstream),
        google_auth_url: format!("{}/auth", upstream),
        auth_url: upstream.to_string(),
        auth_api_key: None,
        token_refresh_interval: 300,
        token_refresh_threshold: 600,
    }
}

/// App state wired to a freshly spawned fake upstream.
pub async fn test_state(store: Arc<MemoryStore>) -> Arc<AppState> {
    let upstream = spawn_fake(fake_upstream()).await;
    Arc::new(AppState::new(test_args(&upstream), store))
}
