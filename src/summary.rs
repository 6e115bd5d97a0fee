//! Spend and income totals over a user's transactions.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::domain::{Transaction, TransactionType};

const TOP_N: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    All,
    #[default]
    Month,
    Week,
}

impl Filter {
    /// Earliest `transaction_date` the filter keeps, or `None` for everything.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<NaiveDate> {
        match self {
            Filter::All => None,
            Filter::Month => Some(
                now.checked_sub_months(Months::new(1))
                    .unwrap_or(now)
                    .date_naive(),
            ),
            Filter::Week => Some((now - Duration::days(7)).date_naive()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTotal {
    pub label: String,
    pub amount: Decimal,
    /// Percent of total debit; 0 when there is no debit at all.
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_credit: Decimal,
    pub total_debit: Decimal,
    pub balance: Decimal,
    pub transaction_count: usize,
    pub top_categories: Vec<RankedTotal>,
    pub top_merchants: Vec<RankedTotal>,
}

pub fn share_of_debit(amount: Decimal, total_debit: Decimal) -> f64 {
    if total_debit.is_zero() {
        return 0.0;
    }
    (amount * Decimal::ONE_HUNDRED / total_debit)
        .round_dp(2)
        .to_f64()
        .unwrap_or(0.0)
}

fn rank(totals: HashMap<String, Decimal>, total_debit: Decimal) -> Vec<RankedTotal> {
    let mut ranked: Vec<_> = totals.into_iter().collect();
    ranked.sort_by(|(a_label, a), (b_label, b)| b.cmp(a).then_with(|| a_label.cmp(b_label)));
    ranked
        .into_iter()
        .take(TOP_N)
        .map(|(label, amount)| RankedTotal {
            share: share_of_debit(amount, total_debit),
            label,
            amount,
        })
        .collect()
}

pub fn summarize(transactions: &[Transaction], filter: Filter, now: DateTime<Utc>) -> Summary {
    let cutoff = filter.cutoff(now);
    let selected: Vec<&Transaction> = transactions
        .iter()
        .filter(|transaction| cutoff.is_none_or(|cutoff| transaction.transaction_date >= cutoff))
        .collect();

    let mut total_credit = Decimal::ZERO;
    let mut total_debit = Decimal::ZERO;
    let mut categories: HashMap<String, Decimal> = HashMap::new();
    let mut merchants: HashMap<String, Decimal> = HashMap::new();

    for transaction in &selected {
        match transaction.kind {
            TransactionType::Credit => total_credit += transaction.amount,
            TransactionType::Debit => {
                total_debit += transaction.amount;
                *categories
                    .entry(transaction.category.label().to_string())
                    .or_default() += transaction.amount;
                if let Some(merchant) = transaction.merchant.as_deref().filter(|m| !m.is_empty()) {
                    *merchants.entry(merchant.to_string()).or_default() += transaction.amount;
                }
            }
        }
    }

    Summary {
        total_credit,
        total_debit,
        balance: total_credit - total_debit,
        transaction_count: selected.len(),
        top_categories: rank(categories, total_debit),
        top_merchants: rank(merchants, total_debit),
    }
}
