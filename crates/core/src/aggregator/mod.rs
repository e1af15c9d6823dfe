pub mod plaid;
pub mod types;

use crate::domain::transaction::{Transaction, UserId};
use anyhow::Result;
use chrono::NaiveDate;
use std::collections::HashSet;
use types::{AggregatorTransaction, ItemAccounts, LinkToken, TokenExchange};

/// Days of settled history requested on every import.
pub const HISTORY_DAYS: i64 = 730;

#[async_trait::async_trait]
pub trait AggregatorClient: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn create_link_token(&self, user: &UserId) -> Result<LinkToken>;

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange>;

    async fn fetch_accounts(&self, access_token: &str) -> Result<ItemAccounts>;

    /// All settled transactions dated within `[start, end]`, across pages.
    async fn fetch_settled_transactions(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AggregatorTransaction>>;

    async fn fetch_pending_transactions(
        &self,
        access_token: &str,
    ) -> Result<Vec<AggregatorTransaction>>;
}

/// Combines settled and pending transactions.
///
/// A settled transaction whose `pending_transaction_id` names a pending one
/// replaces it, and an id seen twice keeps its settled version. The result is
/// ordered newest first.
pub fn merge_pending(settled: Vec<Transaction>, pending: Vec<Transaction>) -> Vec<Transaction> {
    let mut seen: HashSet<String> = HashSet::new();
    let superseded: HashSet<String> = settled
        .iter()
        .filter_map(|t| t.pending_transaction_id.clone())
        .collect();

    let mut out = Vec::with_capacity(settled.len() + pending.len());
    for t in settled {
        if seen.insert(t.transaction_id.clone()) {
            out.push(t);
        }
    }
    for t in pending {
        if superseded.contains(&t.transaction_id) {
            continue;
        }
        if seen.insert(t.transaction_id.clone()) {
            out.push(t);
        }
    }

    out.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    out
}
