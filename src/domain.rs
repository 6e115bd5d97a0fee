use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

/// The closed set of spending labels the extractor may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Food & Dining")]
    FoodAndDining,
    Shopping,
    Transport,
    #[serde(rename = "Bills & Utilities")]
    BillsAndUtilities,
    Entertainment,
    Healthcare,
    Salary,
    Investment,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::FoodAndDining,
        Category::Shopping,
        Category::Transport,
        Category::BillsAndUtilities,
        Category::Entertainment,
        Category::Healthcare,
        Category::Salary,
        Category::Investment,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::FoodAndDining => "Food & Dining",
            Category::Shopping => "Shopping",
            Category::Transport => "Transport",
            Category::BillsAndUtilities => "Bills & Utilities",
            Category::Entertainment => "Entertainment",
            Category::Healthcare => "Healthcare",
            Category::Salary => "Salary",
            Category::Investment => "Investment",
            Category::Other => "Other",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|category| category.label() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

/// Amounts are stored to the cent, rounding half away from zero like Postgres `NUMERIC`.
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// A record as produced by the extractor, before it belongs to anyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category: Category,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub merchant: Option<String>,
    #[serde(default)]
    pub description: String,
    pub transaction_date: NaiveDate,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|merchant| !merchant.trim().is_empty()))
}

/// A parsed record tagged with where it came from, ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub parsed: ParsedTransaction,
    pub raw_text: String,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category: Category,
    pub merchant: Option<String>,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub raw_text: String,
    pub source_id: Option<String>,
}

impl Transaction {
    pub fn from_new(user_id: &str, new: NewTransaction, created_at: DateTime<Utc>) -> Self {
        Transaction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            amount: round_amount(new.parsed.amount),
            kind: new.parsed.kind,
            category: new.parsed.category,
            merchant: new.parsed.merchant,
            description: new.parsed.description,
            transaction_date: new.parsed.transaction_date,
            created_at,
            raw_text: new.raw_text,
            source_id: new.source_id,
        }
    }
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct GmailToken {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl GmailToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// An inbox message reduced to what the importer needs. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub body: String,
}

impl Email {
    pub fn as_extraction_text(&self) -> String {
        format!(
            "Subject: {}\n\nFrom: {}\n\nContent: {}",
            self.subject, self.from, self.body
        )
    }
}
