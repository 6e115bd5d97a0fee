use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    domain::{GmailToken, NewTransaction, Transaction},
    error::AppError,
};

/// Persistence for the two tables the service owns.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace the user's token. A `None` refresh token keeps the stored one.
    async fn upsert_gmail_token(&self, token: &GmailToken) -> Result<(), AppError>;

    async fn query_gmail_token(&self, user_id: &str) -> Result<Option<GmailToken>, AppError>;

    /// Returns whether a row was deleted.
    async fn delete_gmail_token(&self, user_id: &str) -> Result<bool, AppError>;

    async fn query_tokens_expiring_before(
        &self,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<GmailToken>, AppError>;

    /// Stores every record or none of them.
    async fn insert_transactions(
        &self,
        user_id: &str,
        transactions: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Newest `transaction_date` first, optionally only those on or after `since`.
    async fn query_transactions(
        &self,
        user_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>, AppError>;
}

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPool::connect(database_url).await
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = create_pool(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(PgStore { pool })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: String,
    amount: Decimal,
    #[sqlx(rename = "type")]
    kind: String,
    category: String,
    merchant: Option<String>,
    description: String,
    transaction_date: NaiveDate,
    created_at: DateTime<Utc>,
    raw_text: String,
    source_id: Option<String>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            amount: row.amount,
            kind: row.kind.parse().map_err(AppError::Storage)?,
            category: row.category.parse().map_err(AppError::Storage)?,
            merchant: row.merchant,
            description: row.description,
            transaction_date: row.transaction_date,
            created_at: row.created_at,
            raw_text: row.raw_text,
            source_id: row.source_id,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_gmail_token(&self, token: &GmailToken) -> Result<(), AppError> {
        sqlx::query(
            "
                INSERT INTO gmail_tokens (
                    user_id,
                    access_token,
                    refresh_token,
                    expires_at
                ) VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id)
                DO UPDATE SET
                    access_token = EXCLUDED.access_token,
                    refresh_token = COALESCE(EXCLUDED.refresh_token, gmail_tokens.refresh_token),
                    expires_at = EXCLUDED.expires_at
            ",
        )
        .bind(&token.user_id)
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await
        .inspect_err(|err| {
            tracing::error!(
                "Failed to upsert gmail token for user_id={}: {}",
                &token.user_id,
                err
            );
        })?;
        Ok(())
    }

    async fn query_gmail_token(&self, user_id: &str) -> Result<Option<GmailToken>, AppError> {
        let token = sqlx::query_as::<_, GmailToken>(
            "
                SELECT user_id, access_token, refresh_token, expires_at
                FROM gmail_tokens
                WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn delete_gmail_token(&self, user_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "
                DELETE FROM gmail_tokens
                WHERE user_id = $1
            ",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query_tokens_expiring_before(
        &self,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<GmailToken>, AppError> {
        let tokens = sqlx::query_as::<_, GmailToken>(
            "
                SELECT user_id, access_token, refresh_token, expires_at
                FROM gmail_tokens
                WHERE expires_at < $1
            ",
        )
        .bind(expires_at)
        .fetch_all(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn insert_transactions(
        &self,
        user_id: &str,
        transactions: Vec<NewTransaction>,
    ) -> Result<Vec<Transaction>, AppError> {
        let created_at = Utc::now();
        let mut db_transaction = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(transactions.len());

        for new in transactions {
            let transaction = Transaction::from_new(user_id, new, created_at);
            sqlx::query(
                "
                    INSERT INTO transactions (
                        id,
                        user_id,
                        amount,
                        type,
                        category,
                        merchant,
                        description,
                        transaction_date,
                        created_at,
                        raw_text,
                        source_id
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ",
            )
            .bind(transaction.id)
            .bind(&transaction.user_id)
            .bind(transaction.amount)
            .bind(transaction.kind.as_str())
            .bind(transaction.category.label())
            .bind(&transaction.merchant)
            .bind(&transaction.description)
            .bind(transaction.transaction_date)
            .bind(transaction.created_at)
            .bind(&transaction.raw_text)
            .bind(&transaction.source_id)
            .execute(&mut *db_transaction)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    "Failed to insert transaction id={} user_id={}: {}",
                    &transaction.id,
                    user_id,
                    err
                );
            })?;
            stored.push(transaction);
        }

        // Dropping without commit rolls back, so an early `?` above discards the batch.
        db_transaction.commit().await?;
        Ok(stored)
    }

    async fn query_transactions(
        &self,
        user_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<Transaction>, AppError> {
        sqlx::query_as::<_, TransactionRow>(
            "
                SELECT * FROM transactions
                WHERE user_id = $1
                AND ($2::DATE IS NULL OR transaction_date >= $2)
                ORDER BY transaction_date DESC, created_at DESC
            ",
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Transaction::try_from)
        .collect()
    }
}
