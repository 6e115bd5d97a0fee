use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::{AppState, error::ApiError, error::AppError};

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Option<String>,
}

/// Resolves session bearer tokens to user ids against the auth provider.
pub struct AuthClient {
    client: reqwest::Client,
    user_url: String,
    api_key: Option<String>,
}

impl AuthClient {
    pub fn new(client: reqwest::Client, auth_url: &str, api_key: Option<String>) -> Self {
        AuthClient {
            client,
            user_url: format!("{}/auth/v1/user", auth_url.trim_end_matches('/')),
            api_key,
        }
    }

    pub async fn user_id(&self, bearer_token: &str) -> Result<String, AppError> {
        let mut request = self.client.get(&self.user_url).bearer_auth(bearer_token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let res = request.send().await.inspect_err(|err| {
            tracing::error!("Error occurred in request to auth provider: {:#?}", err)
        })?;

        if !res.status().is_success() {
            return Err(AppError::Authentication(String::from("Unauthorized")));
        }

        res.json::<UserResponse>()
            .await
            .ok()
            .and_then(|user| user.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Authentication(String::from("Unauthorized")))
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Authentication(String::from("Missing authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Authentication(String::from("Missing authorization header")))
}

/// The authenticated caller of an `/api` route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user_id = state.auth.user_id(token).await?;
        tracing::debug!("Authenticated user_id={}", &user_id);
        Ok(AuthUser { user_id })
    }
}
