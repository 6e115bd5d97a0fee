use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    AppState,
    domain::{Email, GmailToken, NewTransaction, ParsedTransaction, Transaction, round_amount},
    error::AppError,
    gemini::GeminiClient,
    summary::Filter,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailFailure {
    pub email_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success: bool,
    pub transactions_count: usize,
    pub failed_emails: Vec<EmailFailure>,
}

/// Exchange the stored refresh token for a new access token and persist it.
pub async fn refresh_token(state: &AppState, token: &GmailToken) -> Result<GmailToken, AppError> {
    let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
        AppError::Authentication(String::from(
            "Token expired and no refresh token available",
        ))
    })?;

    tracing::info!("Refreshing Gmail token for user_id={}", &token.user_id);

    let refreshed = state
        .google
        .refresh_access_token(refresh_token)
        .await?
        .into_token(&token.user_id, Utc::now());

    state.store.upsert_gmail_token(&refreshed).await?;

    Ok(GmailToken {
        refresh_token: refreshed
            .refresh_token
            .or_else(|| token.refresh_token.clone()),
        ..refreshed
    })
}

pub async fn valid_access_token(state: &AppState, user_id: &str) -> Result<String, AppError> {
    let token = state
        .store
        .query_gmail_token(user_id)
        .await?
        .ok_or_else(|| {
            AppError::BadRequest(String::from(
                "No Gmail token found. Please connect your Gmail account.",
            ))
        })?;

    if token.is_expired(Utc::now()) {
        return Ok(refresh_token(state, &token).await?.access_token);
    }

    Ok(token.access_token)
}

pub async fn fetch_inbox_emails(state: &AppState, user_id: &str) -> Result<Vec<Email>, AppError> {
    let access_token = valid_access_token(state, user_id).await?;
    state.gmail.fetch_inbox_emails(&access_token).await
}

/// Run each email through the extractor on its own; one bad email does not sink the rest.
pub async fn extract_from_emails(
    gemini: &GeminiClient,
    emails: &[Email],
) -> (Vec<NewTransaction>, Vec<EmailFailure>) {
    let mut transactions = Vec::new();
    let mut failures = Vec::new();

    for email in emails {
        let text = email.as_extraction_text();
        match gemini.parse(&text).await {
            Ok(parsed) => {
                tracing::info!(
                    "Extracted {} transactions from email id={}",
                    parsed.len(),
                    &email.id
                );
                transactions.extend(parsed.into_iter().map(|parsed| NewTransaction {
                    parsed,
                    raw_text: text.clone(),
                    source_id: Some(email.id.clone()),
                }));
            }
            Err(err) => {
                tracing::error!("Failed to extract email id={}: {}", &email.id, err);
                failures.push(EmailFailure {
                    email_id: email.id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    (transactions, failures)
}

pub async fn import_emails(
    state: &AppState,
    user_id: &str,
    emails: &[Email],
) -> Result<ImportReport, AppError> {
    if emails.is_empty() {
        return Err(AppError::BadRequest(String::from("No emails provided")));
    }

    tracing::info!(
        "Importing {} emails for user_id={}",
        emails.len(),
        user_id
    );

    let (transactions, failed_emails) = extract_from_emails(&state.gemini, emails).await;

    let stored = if transactions.is_empty() {
        Vec::new()
    } else {
        state.store.insert_transactions(user_id, transactions).await?
    };

    tracing::info!(
        "Imported {} transactions for user_id={} ({} emails failed)",
        stored.len(),
        user_id,
        failed_emails.len()
    );

    Ok(ImportReport {
        success: true,
        transactions_count: stored.len(),
        failed_emails,
    })
}

pub async fn parse_text(state: &AppState, text: &str) -> Result<Vec<ParsedTransaction>, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::BadRequest(String::from(
            "Please enter transaction text",
        )));
    }
    state.gemini.parse(text).await
}

pub async fn save_parsed(
    state: &AppState,
    user_id: &str,
    text: &str,
    parsed: Vec<ParsedTransaction>,
) -> Result<Vec<Transaction>, AppError> {
    if parsed.is_empty() {
        return Err(AppError::BadRequest(String::from("No transactions to save")));
    }
    if parsed
        .iter()
        .any(|parsed| round_amount(parsed.amount) <= Decimal::ZERO)
    {
        return Err(AppError::BadRequest(String::from(
            "Transaction amounts must be positive",
        )));
    }

    let transactions = parsed
        .into_iter()
        .map(|parsed| NewTransaction {
            parsed,
            raw_text: text.to_string(),
            source_id: None,
        })
        .collect();

    state.store.insert_transactions(user_id, transactions).await
}

pub async fn list_transactions(
    state: &AppState,
    user_id: &str,
    filter: Filter,
) -> Result<Vec<Transaction>, AppError> {
    state
        .store
        .query_transactions(user_id, filter.cutoff(Utc::now()))
        .await
}

pub async fn connect_gmail(state: &AppState, user_id: &str, code: &str) -> Result<(), AppError> {
    let token = state
        .google
        .exchange_auth_code(code)
        .await?
        .into_token(user_id, Utc::now());

    state.store.upsert_gmail_token(&token).await?;
    tracing::info!("Stored Gmail token for user_id={}", user_id);
    Ok(())
}

pub async fn gmail_connected(state: &AppState, user_id: &str) -> Result<bool, AppError> {
    Ok(state.store.query_gmail_token(user_id).await?.is_some())
}

/// Forget the Gmail grant. Imported transactions are kept.
pub async fn disconnect_gmail(state: &AppState, user_id: &str) -> Result<bool, AppError> {
    let deleted = state.store.delete_gmail_token(user_id).await?;
    tracing::info!(
        "Disconnected Gmail for user_id={} (token_deleted={})",
        user_id,
        deleted
    );
    Ok(deleted)
}

pub async fn ask_assistant(
    state: &AppState,
    user_id: &str,
    question: &str,
) -> Result<String, AppError> {
    if question.trim().is_empty() {
        return Err(AppError::BadRequest(String::from("Please enter a question")));
    }
    let transactions = state.store.query_transactions(user_id, None).await?;
    state.gemini.ask(question, &transactions).await
}
