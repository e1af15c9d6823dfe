pub mod lock;
pub mod memory;
pub mod postgres;

use crate::domain::account::{LinkedItem, OnboardingMethod, OnboardingStatus};
use crate::domain::chat::ChatTurn;
use crate::domain::report::Report;
use crate::domain::snapshot::{Snapshot, SnapshotRecord};
use crate::domain::transaction::{Transaction, UserId};
use anyhow::Context;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown user")]
    UnknownUser,

    #[error("unknown transaction")]
    UnknownTransaction,

    #[error("unknown chat turn")]
    UnknownChatTurn,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Backend(anyhow::Error::new(value))
    }
}

/// Per-user persistence for transactions, snapshots, reports, chat turns and
/// aggregator links.
///
/// Every method that changes a user's transactions rebuilds and stores that
/// user's snapshot in the same unit of work and returns it, so a committed
/// mutation is never observed with a stale snapshot. Mutations for one user
/// are serialised.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn onboarding_status(&self, user: &UserId) -> Result<Option<OnboardingStatus>, StoreError>;

    /// Creates the user on first call.
    async fn complete_onboarding(
        &self,
        user: &UserId,
        method: OnboardingMethod,
        at: DateTime<Utc>,
    ) -> Result<OnboardingStatus, StoreError>;

    async fn transactions(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError>;

    async fn insert_transaction(
        &self,
        user: &UserId,
        transaction: &Transaction,
    ) -> Result<Snapshot, StoreError>;

    /// Replaces the stored record with the same id.
    async fn replace_transaction(
        &self,
        user: &UserId,
        transaction: &Transaction,
    ) -> Result<Snapshot, StoreError>;

    async fn remove_transaction(
        &self,
        user: &UserId,
        transaction_id: &str,
    ) -> Result<Snapshot, StoreError>;

    /// Swaps every aggregator-sourced transaction for `transactions`. Manual
    /// entries are kept.
    async fn replace_aggregator_transactions(
        &self,
        user: &UserId,
        transactions: &[Transaction],
    ) -> Result<Snapshot, StoreError>;

    async fn snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StoreError>;

    async fn rebuild_snapshot(&self, user: &UserId) -> Result<Snapshot, StoreError>;

    async fn save_linked_item(&self, user: &UserId, item: &LinkedItem) -> Result<(), StoreError>;

    async fn linked_item(&self, user: &UserId) -> Result<Option<LinkedItem>, StoreError>;

    async fn linked_users(&self) -> Result<Vec<UserId>, StoreError>;

    async fn append_report(&self, user: &UserId, report: &Report) -> Result<(), StoreError>;

    async fn reports(&self, user: &UserId) -> Result<Vec<Report>, StoreError>;

    async fn start_chat_turn(&self, user: &UserId, turn: &ChatTurn) -> Result<(), StoreError>;

    async fn finish_chat_turn(
        &self,
        user: &UserId,
        turn_id: Uuid,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn chat_turns(&self, user: &UserId) -> Result<Vec<ChatTurn>, StoreError>;
}
