use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::{AppState, model::refresh_token};

/// Refresh every refreshable token that expires within the threshold.
/// Returns how many tokens were refreshed.
pub async fn refresh_expiring_tokens(state: &AppState) -> usize {
    let Some(threshold) = i64::try_from(state.token_refresh_threshold)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|window| Utc::now().checked_add_signed(window))
    else {
        tracing::error!(
            "Token refresh threshold of {}s is out of range, skipping refresh",
            state.token_refresh_threshold
        );
        return 0;
    };

    let tokens = match state.store.query_tokens_expiring_before(threshold).await {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::error!(
                "An error occurred while querying expiring tokens: {:#?}",
                err
            );
            return 0;
        }
    };

    let refreshable: Vec<_> = tokens
        .into_iter()
        .filter(|token| token.refresh_token.is_some())
        .collect();

    tracing::info!("Found {} tokens to refresh", refreshable.len());

    let mut refreshed = 0;
    for token in refreshable.iter() {
        match refresh_token(state, token).await {
            Ok(_) => {
                tracing::info!("Successfully refreshed token for user_id={}", &token.user_id);
                refreshed += 1;
            }
            Err(err) => {
                tracing::error!(
                    "An error occurred while refreshing token for user_id={}: {}",
                    &token.user_id,
                    err
                );
            }
        }
    }
    refreshed
}

pub async fn token_refresh_task(state: Arc<AppState>) {
    // Create a Tokio interval. The first tick fires immediately.
    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(state.token_refresh_interval));

    loop {
        interval.tick().await;
        tracing::info!("Running token_refresh_task...");
        refresh_expiring_tokens(&state).await;
        tracing::info!("Finished running token_refresh_task...");
    }
}
