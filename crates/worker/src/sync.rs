use anyhow::Context;
use chrono::{DateTime, Utc};
use finverse_core::aggregator::AggregatorClient;
use finverse_core::domain::transaction::UserId;
use finverse_core::storage::lock;
use finverse_core::storage::postgres::PgStore;
use finverse_core::storage::Store;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Syncs each user in turn. A user whose sync lock is held by another run is
/// skipped; a failure for one user does not stop the others.
pub async fn run(
    store: &PgStore,
    aggregator: &dyn AggregatorClient,
    users: &[UserId],
    dry_run: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::default();

    for user in users {
        // The session lock lives on this connection until released below.
        let mut conn = store
            .pool()
            .acquire()
            .await
            .context("acquire connection failed")?;

        if !lock::try_acquire_sync_lock(&mut conn, user).await? {
            tracing::warn!(user_id = %user, "sync lock not acquired; another run in progress");
            summary.skipped += 1;
            continue;
        }

        let result = sync_user(store, aggregator, user, dry_run, now).await;

        if let Err(err) = lock::release_sync_lock(&mut conn, user).await {
            tracing::warn!(user_id = %user, error = %err, "failed to release sync lock");
        }

        match result {
            Ok(imported) => {
                tracing::info!(user_id = %user, imported, dry_run, "user synced");
                summary.synced += 1;
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(user_id = %user, error = %format!("{err:#}"), "user sync failed");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn sync_user(
    store: &PgStore,
    aggregator: &dyn AggregatorClient,
    user: &UserId,
    dry_run: bool,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    if dry_run {
        let item = store
            .linked_item(user)
            .await?
            .with_context(|| format!("no linked account for user_id={user}"))?;
        let transactions =
            finverse_core::sync::fetch_merged(aggregator, &item.access_token, now).await?;
        let pending = transactions.iter().filter(|t| t.pending).count();
        tracing::info!(
            user_id = %user,
            transactions = transactions.len(),
            pending,
            "dry-run: fetched aggregator transactions"
        );
        return Ok(transactions.len());
    }

    let outcome = finverse_core::sync::import_transactions(store, aggregator, user, now).await?;
    Ok(outcome.imported)
}
