mod args;
mod auth;
mod db;
mod domain;
mod error;
mod gemini;
mod gmail;
mod google;
mod handlers;
mod jobs;
mod logging;
mod model;
mod summary;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use args::{Args, parse_args};
use auth::AuthClient;
use axum::{
    Router,
    routing::{delete, get, post},
};
use db::{PgStore, Store};
use gemini::GeminiClient;
use gmail::GmailClient;
use google::GoogleOAuth;
use handlers::{
    authorise, callback, chat, disconnect, fetch_emails, get_summary, get_transactions,
    gmail_status, import_emails, oauth_redirect_url, parse_transactions, save_transactions,
};
use jobs::token_refresh_task;
use logging::setup_logging;

pub struct AppState {
    base_url: String,
    store: Arc<dyn Store>,
    auth: AuthClient,
    gemini: GeminiClient,
    gmail: GmailClient,
    google: GoogleOAuth,
    token_refresh_interval: u64,
    token_refresh_threshold: u64,
}

impl AppState {
    fn new(args: Args, store: Arc<dyn Store>) -> Self {
        let client = reqwest::Client::new();
        let base_url = args.base_url.trim_end_matches('/').to_string();

        AppState {
            auth: AuthClient::new(client.clone(), &args.auth_url, args.auth_api_key),
            gemini: GeminiClient::new(client.clone(), args.gemini_url, args.gemini_api_key),
            gmail: GmailClient::new(client.clone(), args.gmail_api_url),
            google: GoogleOAuth::new(
                client,
                args.google_client_id,
                args.google_client_secret,
                args.google_auth_url,
                args.google_token_url,
                oauth_redirect_url(&base_url),
            ),
            base_url,
            store,
            token_refresh_interval: args.token_refresh_interval,
            token_refresh_threshold: args.token_refresh_threshold,
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/gmail/emails", get(fetch_emails))
        .route("/api/gmail/import", post(import_emails))
        .route("/api/gmail/authorise", get(authorise))
        .route("/api/gmail/status", get(gmail_status))
        .route("/api/gmail", delete(disconnect))
        .route("/api/transactions/parse", post(parse_transactions))
        .route("/api/transactions", get(get_transactions).post(save_transactions))
        .route("/api/summary", get(get_summary))
        .route("/api/chat", post(chat))
        .route("/oauth/callback", get(callback))
        .route("/", get(|| async { "Ledgerlens is running" }))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let args = parse_args();

    setup_logging(&args.base_log_dir);

    let store = PgStore::connect(&args.database_url)
        .await
        .expect("Failed to connect to PostgreSQL and apply migrations");

    let port = args.port;
    let app_state = Arc::new(AppState::new(args, Arc::new(store)));

    tracing::info!("Spawning background tasks...");
    tokio::spawn(token_refresh_task(app_state.clone()));

    let app = build_router(app_state);

    let bind_address = format!("0.0.0.0:{}", port);
    tracing::info!("Server listening on {}...", bind_address);

    let listener = tokio::net::TcpListener::bind(bind_address).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
