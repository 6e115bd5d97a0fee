use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    auth::AuthUser,
    domain::{Email, ParsedTransaction, Transaction},
    error::{ApiError, AppError},
    model::{self, ImportReport},
    summary::{Filter, Summary, summarize},
};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub filter: Filter,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub emails: Vec<Email>,
}

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    #[serde(default)]
    pub text: String,
    pub transactions: Vec<ParsedTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct AuthoriseResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
}

pub fn oauth_redirect_url(base_url: &str) -> String {
    format!("{}/oauth/callback", base_url)
}

fn bad_request(err: AppError) -> ApiError {
    err.with_status(StatusCode::BAD_REQUEST)
}

pub async fn fetch_emails(
    State(state): State<Arc<AppState>>,
    user: Result<AuthUser, ApiError>,
) -> Result<Json<Vec<Email>>, ApiError> {
    let user = user.map_err(|rejection| bad_request(rejection.error))?;

    let emails = model::fetch_inbox_emails(&state, &user.user_id)
        .await
        .map_err(bad_request)?;

    Ok(Json(emails))
}

pub async fn import_emails(
    State(state): State<Arc<AppState>>,
    user: Result<AuthUser, ApiError>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<ImportReport>, ApiError> {
    let user = user.map_err(|rejection| bad_request(rejection.error))?;
    let Json(payload) = payload.map_err(|rejection| bad_request(rejection.into()))?;

    let report = model::import_emails(&state, &user.user_id, &payload.emails)
        .await
        .map_err(bad_request)?;

    Ok(Json(report))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let (Some(code), Some(user_id)) = (
        params.code.filter(|code| !code.is_empty()),
        params.state.filter(|state| !state.is_empty()),
    ) else {
        return Err(bad_request(AppError::BadRequest(String::from(
            "Missing code or state",
        ))));
    };

    tracing::info!("Received OAuth callback for user_id={}", &user_id);

    model::connect_gmail(&state, &user_id, &code)
        .await
        .map_err(|err| err.with_status(StatusCode::INTERNAL_SERVER_ERROR))?;

    let redirect_url = format!("{}/?gmail_connected=true", &state.base_url);

    tracing::info!("Redirecting to {}", &redirect_url);

    Ok((StatusCode::FOUND, [(LOCATION, redirect_url)]).into_response())
}

pub async fn authorise(State(state): State<Arc<AppState>>, user: AuthUser) -> Json<AuthoriseResponse> {
    Json(AuthoriseResponse {
        url: state.google.authorisation_url(&user.user_id),
    })
}

pub async fn gmail_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<StatusResponse>, ApiError> {
    let connected = model::gmail_connected(&state, &user.user_id).await?;
    Ok(Json(StatusResponse { connected }))
}

pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<StatusCode, ApiError> {
    model::disconnect_gmail(&state, &user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn parse_transactions(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    payload: Result<Json<ParseRequest>, JsonRejection>,
) -> Result<Json<Vec<ParsedTransaction>>, ApiError> {
    let Json(payload) = payload.map_err(AppError::from)?;
    let parsed = model::parse_text(&state, &payload.text).await?;
    Ok(Json(parsed))
}

pub async fn save_transactions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<SaveRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<Transaction>>), ApiError> {
    let Json(payload) = payload.map_err(AppError::from)?;
    let stored =
        model::save_parsed(&state, &user.user_id, &payload.text, payload.transactions).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let Query(params) = params.map_err(AppError::from)?;
    let transactions = model::list_transactions(&state, &user.user_id, params.filter)
        .await
        .inspect_err(|err| tracing::error!("Error querying transactions: {:#?}", err))?;
    Ok(Json(transactions))
}

pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> Result<Json<Summary>, ApiError> {
    let Query(params) = params.map_err(AppError::from)?;
    let transactions = model::list_transactions(&state, &user.user_id, params.filter).await?;
    Ok(Json(summarize(&transactions, params.filter, chrono::Utc::now())))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload.map_err(AppError::from)?;
    let answer = model::ask_assistant(&state, &user.user_id, &payload.question).await?;
    Ok(Json(ChatResponse { answer }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::{StatusCode as HttpStatus, redirect::Policy};
    use serde_json::{Value, json};

    use crate::{
        build_router,
        db::memory::MemoryStore,
        testing::{spawn_fake, test_state},
    };

    struct TestApp {
        base: String,
        client: reqwest::Client,
    }

    impl TestApp {
        async fn start() -> Self {
            let state = test_state(Arc::new(MemoryStore::default())).await;
            let base = spawn_fake(build_router(state)).await;
            let client = reqwest::Client::builder()
                .redirect(Policy::none())
                .build()
                .unwrap();
            TestApp { base, client }
        }

        fn get(&self, path: &str) -> reqwest::RequestBuilder {
            self.client
                .get(format!("{}{}", self.base, path))
                .bearer_auth("session-user-1")
        }

        fn post(&self, path: &str, body: Value) -> reqwest::RequestBuilder {
            self.client
                .post(format!("{}{}", self.base, path))
                .bearer_auth("session-user-1")
                .json(&body)
        }

        async fn connect(&self) {
            let res = self
                .client
                .get(format!(
                    "{}/oauth/callback?code=good-code&state=user-1",
                    self.base
                ))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), HttpStatus::FOUND);
        }
    }

    async fn error_of(res: reqwest::Response) -> (HttpStatus, String) {
        let status = res.status();
        let body: Value = res.json().await.unwrap();
        (status, body["error"].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn gmail_routes_answer_400_with_error_body() {
        let app = TestApp::start().await;

        let res = app
            .client
            .get(format!("{}/api/gmail/emails", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(res).await,
            (HttpStatus::BAD_REQUEST, "Missing authorization header".into())
        );

        let res = app.get("/api/gmail/emails").send().await.unwrap();
        assert_eq!(
            error_of(res).await,
            (
                HttpStatus::BAD_REQUEST,
                "No Gmail token found. Please connect your Gmail account.".into()
            )
        );

        let res = app
            .post("/api/gmail/import", json!({ "emails": [] }))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(res).await,
            (HttpStatus::BAD_REQUEST, "No emails provided".into())
        );
    }

    #[tokio::test]
    async fn malformed_import_body_is_a_json_400() {
        let app = TestApp::start().await;

        let res = app
            .post("/api/gmail/import", json!({ "emails": "nope" }))
            .send()
            .await
            .unwrap();
        let (status, error) = error_of(res).await;
        assert_eq!(status, HttpStatus::BAD_REQUEST);
        assert!(error.contains("emails"), "{}", error);

        let res = app
            .client
            .post(format!("{}/api/gmail/import", app.base))
            .bearer_auth("session-user-1")
            .header("content-type", "application/json")
            .body("not json")
            .send()
            .await
            .unwrap();
        let (status, error) = error_of(res).await;
        assert_eq!(status, HttpStatus::BAD_REQUEST);
        assert!(!error.is_empty());
    }

    #[tokio::test]
    async fn bad_filter_and_body_render_error_json() {
        let app = TestApp::start().await;

        let res = app.get("/api/summary?filter=year").send().await.unwrap();
        let (status, error) = error_of(res).await;
        assert_eq!(status, HttpStatus::BAD_REQUEST);
        assert!(error.contains("filter"), "{}", error);

        let res = app.get("/api/transactions?filter=year").send().await.unwrap();
        assert_eq!(error_of(res).await.0, HttpStatus::BAD_REQUEST);

        let res = app
            .post("/api/chat", json!({ "prompt": "hi" }))
            .send()
            .await
            .unwrap();
        let (status, error) = error_of(res).await;
        assert_eq!(status, HttpStatus::BAD_REQUEST);
        assert!(error.contains("question"), "{}", error);
    }

    #[tokio::test]
    async fn other_api_routes_require_authentication() {
        let app = TestApp::start().await;

        let res = app
            .client
            .get(format!("{}/api/summary", app.base))
            .bearer_auth("not-a-session")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oauth_callback_statuses() {
        let app = TestApp::start().await;

        let res = app
            .client
            .get(format!("{}/oauth/callback?code=good-code", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::BAD_REQUEST);

        let res = app
            .client
            .get(format!("{}/oauth/callback?code=bad-code&state=user-1", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(res).await,
            (
                HttpStatus::INTERNAL_SERVER_ERROR,
                "Failed to exchange authorization code".into()
            )
        );

        let res = app
            .client
            .get(format!("{}/oauth/callback?code=good-code&state=user-1", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::FOUND);
        assert_eq!(
            res.headers()["location"],
            "https://ledger.example.com/?gmail_connected=true"
        );
    }

    #[tokio::test]
    async fn fetch_import_summarize_and_disconnect() {
        let app = TestApp::start().await;
        app.connect().await;

        let status: Value = app.get("/api/gmail/status").send().await.unwrap().json().await.unwrap();
        assert_eq!(status["connected"], true);

        let emails: Value = app.get("/api/gmail/emails").send().await.unwrap().json().await.unwrap();
        let emails = emails.as_array().unwrap().clone();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0]["subject"], "Your Amazon order");
        assert_eq!(emails[0]["body"], "Paid $89.99 to Amazon on 2024-11-05");

        let res = app
            .post("/api/gmail/import", json!({ "emails": emails }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::OK);
        let report: Value = res.json().await.unwrap();
        assert_eq!(report["success"], true);
        assert_eq!(report["transactionsCount"], 1);
        assert_eq!(report["failedEmails"][0]["emailId"], "m2");

        let summary: Value = app
            .get("/api/summary?filter=all")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["totalDebit"].as_f64(), Some(89.99));
        assert_eq!(summary["balance"].as_f64(), Some(-89.99));
        assert_eq!(summary["topMerchants"][0]["label"], "Amazon");
        assert_eq!(summary["topMerchants"][0]["share"].as_f64(), Some(100.0));

        let res = app
            .client
            .delete(format!("{}/api/gmail", app.base))
            .bearer_auth("session-user-1")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::NO_CONTENT);

        let status: Value = app.get("/api/gmail/status").send().await.unwrap().json().await.unwrap();
        assert_eq!(status["connected"], false);

        let transactions: Value = app
            .get("/api/transactions?filter=all")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(transactions.as_array().unwrap().len(), 1);
        assert_eq!(transactions[0]["merchant"], "Amazon");
        assert_eq!(transactions[0]["type"], "debit");
        assert_eq!(transactions[0]["transaction_date"], "2024-11-05");
    }

    #[tokio::test]
    async fn manual_paste_round() {
        let app = TestApp::start().await;
        let text = "Paid $89.99 to Amazon on 2024-11-05";

        let parsed: Value = app
            .post("/api/transactions/parse", json!({ "text": text }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(parsed[0]["amount"].as_f64(), Some(89.99));
        assert_eq!(parsed[0]["category"], "Shopping");

        let res = app
            .post("/api/transactions", json!({ "text": text, "transactions": parsed }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), HttpStatus::CREATED);
        let stored: Value = res.json().await.unwrap();
        assert_eq!(stored[0]["raw_text"], text);
        assert_eq!(stored[0]["user_id"], "user-1");

        let res = app
            .post("/api/transactions/parse", json!({ "text": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(res).await,
            (HttpStatus::BAD_REQUEST, "Please enter transaction text".into())
        );
    }

    #[tokio::test]
    async fn chat_answers_with_transaction_context() {
        let app = TestApp::start().await;

        let answer: Value = app
            .post("/api/chat", json!({ "question": "Where do I spend the most?" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(answer["answer"], "You spent the most at Amazon.");
    }

    #[tokio::test]
    async fn authorise_returns_consent_url_for_caller() {
        let app = TestApp::start().await;

        let body: Value = app.get("/api/gmail/authorise").send().await.unwrap().json().await.unwrap();
        let url = url::Url::parse(body["url"].as_str().unwrap()).unwrap();
        let state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned());
        assert_eq!(state.as_deref(), Some("user-1"));
    }
}
