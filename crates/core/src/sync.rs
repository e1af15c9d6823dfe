//! Bank linking and transaction import through the aggregator.

use crate::aggregator::types::LinkToken;
use crate::aggregator::{merge_pending, AggregatorClient, HISTORY_DAYS};
use crate::domain::account::{LinkedItem, LinkedItemView, OnboardingMethod, OnboardingStatus};
use crate::domain::snapshot::Snapshot;
use crate::domain::transaction::{Transaction, UserId};
use crate::error::{FinanceError, Missing};
use crate::storage::Store;
use crate::time::window::today_utc;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub onboarding: OnboardingStatus,
    pub item: LinkedItemView,
    pub imported: usize,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub imported: usize,
    pub snapshot: Snapshot,
}

pub async fn create_link_token(
    aggregator: &dyn AggregatorClient,
    user: &UserId,
) -> Result<LinkToken, FinanceError> {
    Ok(aggregator.create_link_token(user).await?)
}

/// Settled history plus pending transactions, merged and ready to import.
pub async fn fetch_merged(
    aggregator: &dyn AggregatorClient,
    access_token: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Transaction>> {
    let today = today_utc(now);
    let start = today - Duration::days(HISTORY_DAYS);

    let settled: Vec<Transaction> = aggregator
        .fetch_settled_transactions(access_token, start, today)
        .await?
        .into_iter()
        .map(|t| t.into_transaction(today, now))
        .collect();
    let pending: Vec<Transaction> = aggregator
        .fetch_pending_transactions(access_token)
        .await?
        .into_iter()
        .map(|t| t.into_transaction(today, now))
        .collect();

    tracing::debug!(
        provider = aggregator.provider_name(),
        settled = settled.len(),
        pending = pending.len(),
        "fetched aggregator transactions"
    );
    Ok(merge_pending(settled, pending))
}

/// Exchanges the link's public token, stores the connection, marks the user
/// onboarded through the aggregator and imports their transactions.
pub async fn link_account(
    store: &dyn Store,
    aggregator: &dyn AggregatorClient,
    user: &UserId,
    public_token: &str,
    now: DateTime<Utc>,
) -> Result<LinkOutcome, FinanceError> {
    let public_token = public_token.trim();
    if public_token.is_empty() {
        return Err(FinanceError::validation("public_token is required"));
    }

    let exchange = aggregator.exchange_public_token(public_token).await?;
    let accounts = aggregator.fetch_accounts(&exchange.access_token).await?;

    let onboarding = store
        .complete_onboarding(user, OnboardingMethod::Aggregator, now)
        .await?;

    let mut item = LinkedItem {
        item_id: exchange.item_id,
        access_token: exchange.access_token,
        institution: accounts.institution,
        accounts: accounts.accounts,
        linked_at: now,
        last_synced_at: None,
    };
    store.save_linked_item(user, &item).await?;
    tracing::info!(
        user_id = %user,
        item_id = %item.item_id,
        accounts = item.accounts.len(),
        "bank account linked"
    );

    let outcome = import_into(store, aggregator, user, &mut item, now).await?;
    Ok(LinkOutcome {
        onboarding,
        item: LinkedItemView::from(&item),
        imported: outcome.imported,
        snapshot: outcome.snapshot,
    })
}

/// Re-imports the user's aggregator transactions and refreshes balances.
pub async fn sync_now(
    store: &dyn Store,
    aggregator: &dyn AggregatorClient,
    user: &UserId,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, FinanceError> {
    let mut item = store
        .linked_item(user)
        .await?
        .ok_or(FinanceError::NotFound(Missing::LinkedAccount))?;

    let accounts = aggregator.fetch_accounts(&item.access_token).await?;
    item.accounts = accounts.accounts;
    if accounts.institution.is_some() {
        item.institution = accounts.institution;
    }

    import_into(store, aggregator, user, &mut item, now).await
}

/// Replaces the user's aggregator transactions with a fresh fetch. Manual
/// entries are untouched.
pub async fn import_transactions(
    store: &dyn Store,
    aggregator: &dyn AggregatorClient,
    user: &UserId,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, FinanceError> {
    let mut item = store
        .linked_item(user)
        .await?
        .ok_or(FinanceError::NotFound(Missing::LinkedAccount))?;
    import_into(store, aggregator, user, &mut item, now).await
}

async fn import_into(
    store: &dyn Store,
    aggregator: &dyn AggregatorClient,
    user: &UserId,
    item: &mut LinkedItem,
    now: DateTime<Utc>,
) -> Result<SyncOutcome, FinanceError> {
    let transactions = fetch_merged(aggregator, &item.access_token, now).await?;
    let snapshot = store
        .replace_aggregator_transactions(user, &transactions)
        .await?;

    item.last_synced_at = Some(now);
    store.save_linked_item(user, item).await?;

    tracing::info!(user_id = %user, imported = transactions.len(), "aggregator transactions imported");
    Ok(SyncOutcome {
        imported: transactions.len(),
        snapshot,
    })
}

pub async fn linked_accounts(
    store: &dyn Store,
    user: &UserId,
) -> Result<LinkedItemView, FinanceError> {
    store
        .linked_item(user)
        .await?
        .as_ref()
        .map(LinkedItemView::from)
        .ok_or(FinanceError::NotFound(Missing::LinkedAccount))
}
