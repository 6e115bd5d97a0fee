//! Free text to transaction records via the Gemini `generateContent` API.
//!
//! The model is asked for a bare JSON array. Responses are first read as strict
//! JSON; prose-wrapped answers fall back to scraping the outermost `[...]`.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{Category, ParsedTransaction, Transaction, round_amount},
    error::AppError,
};

const PLACEHOLDER_API_KEY: &str = "your_gemini_api_key_here";
const NO_ANSWER: &str = "Sorry, I could not generate a response.";

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("static regex is valid"));

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .next()?
            .text
    }
}

pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
        GeminiClient {
            client,
            endpoint,
            api_key,
        }
    }

    fn api_key(&self) -> Result<&str, AppError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() && key != PLACEHOLDER_API_KEY => Ok(key),
            _ => Err(AppError::Configuration(String::from(
                "Gemini API key is not configured",
            ))),
        }
    }

    async fn generate(&self, prompt: &str, json_response: bool) -> Result<Option<String>, AppError> {
        let key = self.api_key()?;

        let request = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: json_response.then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        let res = self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(&request)
            .send()
            .await
            .inspect_err(|err| {
                tracing::error!("Error occurred in request to Gemini API: {:#?}", err)
            })?;

        if !res.status().is_success() {
            tracing::error!("Gemini API returned status_code={}", res.status());
            return Err(AppError::ExternalService(format!(
                "Gemini API request failed with status_code={}",
                res.status()
            )));
        }

        let response = res.json::<GenerateResponse>().await.map_err(|err| {
            tracing::error!("Error occurred while deserialising Gemini response: {:#?}", err);
            AppError::MalformedResponse(format!("unreadable Gemini envelope: {}", err))
        })?;

        Ok(response.first_text())
    }

    /// Extract every transaction mentioned in `raw_text`.
    pub async fn parse(&self, raw_text: &str) -> Result<Vec<ParsedTransaction>, AppError> {
        let text = self
            .generate(&extraction_prompt(raw_text), true)
            .await?
            .unwrap_or_else(|| String::from("[]"));

        let transactions = parse_model_output(&text)?;
        tracing::info!("Extracted {} transactions from text", transactions.len());
        Ok(transactions)
    }

    /// Answer a free-form question about the user's transactions.
    pub async fn ask(&self, question: &str, transactions: &[Transaction]) -> Result<String, AppError> {
        let data =
            serde_json::to_string_pretty(transactions).unwrap_or_else(|_| String::from("[]"));
        let answer = self.generate(&assistant_prompt(question, &data), false).await?;
        Ok(answer
            .filter(|answer| !answer.trim().is_empty())
            .unwrap_or_else(|| String::from(NO_ANSWER)))
    }
}

fn extraction_prompt(raw_text: &str) -> String {
    let categories = Category::ALL
        .iter()
        .map(|category| format!("\"{}\"", category.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a financial transaction parser. Extract structured transaction data from the following text.
Return a JSON array of transactions with this exact format:
[{{
  "amount": number (positive value),
  "type": "credit" or "debit",
  "category": one of [{categories}],
  "merchant": string (store/company name),
  "description": string (brief description),
  "transaction_date": ISO date string (YYYY-MM-DD)
}}]

Text to parse:
{raw_text}

Return ONLY valid JSON, no markdown or explanations."#
    )
}

fn assistant_prompt(question: &str, transactions_json: &str) -> String {
    format!(
        "You are a financial assistant. Answer the user's question based on their transaction data.

Transaction Data:
{transactions_json}

User Question: {question}

Provide a clear, concise answer with specific numbers and insights."
    )
}

/// The greedy bracket scrape: first `[` through last `]`, or `[]` when absent.
pub fn extract_json_array(text: &str) -> &str {
    JSON_ARRAY
        .find(text)
        .map(|found| found.as_str())
        .unwrap_or("[]")
}

pub fn parse_model_output(text: &str) -> Result<Vec<ParsedTransaction>, AppError> {
    let values = match serde_json::from_str::<Vec<Value>>(text.trim()) {
        Ok(values) => values,
        Err(_) => serde_json::from_str::<Vec<Value>>(extract_json_array(text))
            .map_err(|err| AppError::MalformedResponse(err.to_string()))?,
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let mut parsed =
                serde_json::from_value::<ParsedTransaction>(value).map_err(|err| {
                    AppError::MalformedResponse(format!("transaction {}: {}", index, err))
                })?;
            parsed.amount = round_amount(parsed.amount);
            if parsed.amount <= Decimal::ZERO {
                return Err(AppError::MalformedResponse(format!(
                    "transaction {}: amount must be positive, got {}",
                    index, parsed.amount
                )));
            }
            Ok(parsed)
        })
        .collect()
}
