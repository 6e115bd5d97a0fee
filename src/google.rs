use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use url::form_urlencoded;

use crate::{domain::GmailToken, error::AppError};

const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u32,
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self, user_id: &str, now: DateTime<Utc>) -> GmailToken {
        GmailToken {
            user_id: user_id.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + Duration::seconds(self.expires_in.into()),
        }
    }
}

pub struct GoogleOAuth {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
}

impl GoogleOAuth {
    pub fn new(
        client: reqwest::Client,
        client_id: String,
        client_secret: String,
        auth_url: String,
        token_url: String,
        redirect_uri: String,
    ) -> Self {
        GoogleOAuth {
            client,
            client_id,
            client_secret,
            auth_url,
            token_url,
            redirect_uri,
        }
    }

    /// Consent URL for read-only Gmail access. The user id rides along as `state`.
    pub fn authorisation_url(&self, user_id: &str) -> String {
        form_urlencoded::Serializer::new(format!("{}?", self.auth_url))
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GMAIL_SCOPE)
            .append_pair("state", user_id)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .finish()
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AppError> {
        let res = self
            .client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .inspect_err(|err| {
                tracing::error!("Error occurred in request to Google token API: {:#?}", err);
            })?;

        if !res.status().is_success() {
            tracing::error!("Google token API returned status_code={}", res.status());
            return Err(AppError::ExternalService(format!(
                "Google token API request failed with status_code={}",
                res.status()
            )));
        }

        res.json::<TokenResponse>().await.map_err(|err| {
            tracing::error!("Error occurred while deserialising token response: {:#?}", err);
            AppError::ExternalService(String::from("Unreadable token response"))
        })
    }

    pub async fn exchange_auth_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
            ("code", code),
        ])
        .await
        .map_err(|err| match err {
            AppError::ExternalService(_) => {
                AppError::ExternalService(String::from("Failed to exchange authorization code"))
            }
            other => other,
        })
    }

    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("refresh_token", refresh_token),
        ])
        .await
        .map_err(|err| match err {
            AppError::ExternalService(_) => {
                AppError::ExternalService(String::from("Failed to refresh access token"))
            }
            other => other,
        })
    }
}
