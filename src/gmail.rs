use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose},
};
use futures::future::join_all;
use serde::Deserialize;

use crate::{domain::Email, error::AppError};

const LIST_LIMIT: &str = "20";
const FETCH_LIMIT: usize = 10;

// Gmail emits base64url, with or without padding depending on the endpoint.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<Body>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct Body {
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub mime_type: String,
    pub body: Option<Body>,
}

fn body_data(body: &Option<Body>) -> Option<&str> {
    body.as_ref()
        .and_then(|body| body.data.as_deref())
        .filter(|data| !data.is_empty())
}

pub fn decode_body_data(data: &str) -> String {
    URL_SAFE_LENIENT
        .decode(data)
        .or_else(|_| general_purpose::STANDARD.decode(data))
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| data.to_string())
}

/// Top-level body first, then the first `text/plain` part. HTML parts are ignored.
pub fn extract_body(payload: Option<&Payload>) -> String {
    let Some(payload) = payload else {
        return String::new();
    };

    if let Some(data) = body_data(&payload.body) {
        return decode_body_data(data);
    }

    payload
        .parts
        .iter()
        .filter(|part| part.mime_type == "text/plain")
        .find_map(|part| body_data(&part.body))
        .map(decode_body_data)
        .unwrap_or_default()
}

fn header_value(payload: Option<&Payload>, name: &str) -> String {
    payload
        .and_then(|payload| payload.headers.iter().find(|header| header.name == name))
        .map(|header| header.value.clone())
        .unwrap_or_default()
}

impl From<Message> for Email {
    fn from(message: Message) -> Self {
        let payload = message.payload.as_ref();
        Email {
            subject: header_value(payload, "Subject"),
            from: header_value(payload, "From"),
            body: extract_body(payload),
            snippet: message.snippet,
            id: message.id,
        }
    }
}

pub struct GmailClient {
    client: reqwest::Client,
    api_base: String,
}

impl GmailClient {
    pub fn new(client: reqwest::Client, api_base: String) -> Self {
        GmailClient { client, api_base }
    }

    async fn list_message_ids(&self, access_token: &str) -> Result<Vec<String>, AppError> {
        tracing::info!("Listing inbox messages...");

        let res = self
            .client
            .get(format!("{}/users/me/messages", self.api_base))
            .bearer_auth(access_token)
            .query(&[("q", "label:INBOX"), ("maxResults", LIST_LIMIT)])
            .send()
            .await
            .inspect_err(|err| {
                tracing::error!("Error occurred in request to Gmail list API: {:#?}", err)
            })?;

        if !res.status().is_success() {
            tracing::error!("Gmail list API returned status_code={}", res.status());
            return Err(AppError::ExternalService(String::from(
                "Failed to fetch Gmail messages",
            )));
        }

        let list = res.json::<ListMessagesResponse>().await.map_err(|err| {
            tracing::error!("Error occurred while deserialising message list: {:#?}", err);
            AppError::ExternalService(String::from("Failed to fetch Gmail messages"))
        })?;

        Ok(list.messages.into_iter().map(|message| message.id).collect())
    }

    async fn get_message(&self, access_token: &str, id: &str) -> Result<Message, AppError> {
        let res = self
            .client
            .get(format!("{}/users/me/messages/{}", self.api_base, id))
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json::<Message>().await?)
    }

    /// Fetch up to ten inbox messages concurrently. A message whose detail request
    /// fails is skipped.
    pub async fn fetch_inbox_emails(&self, access_token: &str) -> Result<Vec<Email>, AppError> {
        let ids = self.list_message_ids(access_token).await?;

        let results = join_all(
            ids.iter()
                .take(FETCH_LIMIT)
                .map(|id| self.get_message(access_token, id)),
        )
        .await;

        let emails: Vec<Email> = ids
            .iter()
            .zip(results)
            .filter_map(|(id, result)| {
                result
                    .inspect_err(|err| {
                        tracing::error!("Skipping message id={}: {}", id, err);
                    })
                    .ok()
            })
            .map(Email::from)
            .collect();

        tracing::info!("Fetched {} of {} listed messages", emails.len(), ids.len());
        Ok(emails)
    }
}
