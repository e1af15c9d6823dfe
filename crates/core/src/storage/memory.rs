use crate::aggregation::compute_snapshot;
use crate::domain::account::{LinkedItem, OnboardingMethod, OnboardingStatus};
use crate::domain::chat::ChatTurn;
use crate::domain::report::Report;
use crate::domain::snapshot::{Snapshot, SnapshotRecord};
use crate::domain::transaction::{Provenance, Transaction, UserId};
use crate::storage::{Store, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Process-local store. One lock guards every user, so each mutation and its
/// snapshot rebuild happen atomically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<UserId, UserRecord>>,
}

#[derive(Debug)]
struct UserRecord {
    onboarding: OnboardingStatus,
    transactions: Vec<Transaction>,
    snapshot: Option<SnapshotRecord>,
    linked_item: Option<LinkedItem>,
    reports: Vec<Report>,
    chat_turns: Vec<ChatTurn>,
}

impl UserRecord {
    fn new(onboarding: OnboardingStatus) -> Self {
        Self {
            onboarding,
            transactions: Vec::new(),
            snapshot: None,
            linked_item: None,
            reports: Vec::new(),
            chat_turns: Vec::new(),
        }
    }

    fn rebuild(&mut self) -> Snapshot {
        let snapshot = compute_snapshot(&self.transactions);
        self.snapshot = Some(SnapshotRecord {
            snapshot: snapshot.clone(),
            computed_at: Utc::now(),
        });
        snapshot
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write replaces whole values, so a guard left by a panicking
    // holder still protects a consistent map.
    fn users(&self) -> MutexGuard<'_, HashMap<UserId, UserRecord>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_user<T>(
        &self,
        user: &UserId,
        f: impl FnOnce(&mut UserRecord) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut users = self.users();
        let record = users.get_mut(user).ok_or(StoreError::UnknownUser)?;
        f(record)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn onboarding_status(&self, user: &UserId) -> Result<Option<OnboardingStatus>, StoreError> {
        Ok(self.users().get(user).map(|r| r.onboarding.clone()))
    }

    async fn complete_onboarding(
        &self,
        user: &UserId,
        method: OnboardingMethod,
        at: DateTime<Utc>,
    ) -> Result<OnboardingStatus, StoreError> {
        let status = OnboardingStatus {
            complete: true,
            method: Some(method),
            completed_at: Some(at),
        };
        let mut users = self.users();
        users
            .entry(user.clone())
            .and_modify(|r| r.onboarding = status.clone())
            .or_insert_with(|| UserRecord::new(status.clone()));
        Ok(status)
    }

    async fn transactions(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError> {
        self.with_user(user, |r| Ok(r.transactions.clone()))
    }

    async fn insert_transaction(
        &self,
        user: &UserId,
        transaction: &Transaction,
    ) -> Result<Snapshot, StoreError> {
        self.with_user(user, |r| {
            r.transactions.push(transaction.clone());
            Ok(r.rebuild())
        })
    }

    async fn replace_transaction(
        &self,
        user: &UserId,
        transaction: &Transaction,
    ) -> Result<Snapshot, StoreError> {
        self.with_user(user, |r| {
            let slot = r
                .transactions
                .iter_mut()
                .find(|t| t.transaction_id == transaction.transaction_id)
                .ok_or(StoreError::UnknownTransaction)?;
            *slot = transaction.clone();
            Ok(r.rebuild())
        })
    }

    async fn remove_transaction(
        &self,
        user: &UserId,
        transaction_id: &str,
    ) -> Result<Snapshot, StoreError> {
        self.with_user(user, |r| {
            let before = r.transactions.len();
            r.transactions.retain(|t| t.transaction_id != transaction_id);
            if r.transactions.len() == before {
                return Err(StoreError::UnknownTransaction);
            }
            Ok(r.rebuild())
        })
    }

    async fn replace_aggregator_transactions(
        &self,
        user: &UserId,
        transactions: &[Transaction],
    ) -> Result<Snapshot, StoreError> {
        self.with_user(user, |r| {
            r.transactions.retain(|t| t.source != Provenance::Aggregator);
            r.transactions.extend(transactions.iter().cloned());
            Ok(r.rebuild())
        })
    }

    async fn snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StoreError> {
        self.with_user(user, |r| Ok(r.snapshot.clone()))
    }

    async fn rebuild_snapshot(&self, user: &UserId) -> Result<Snapshot, StoreError> {
        self.with_user(user, |r| Ok(r.rebuild()))
    }

    async fn save_linked_item(&self, user: &UserId, item: &LinkedItem) -> Result<(), StoreError> {
        self.with_user(user, |r| {
            r.linked_item = Some(item.clone());
            Ok(())
        })
    }

    async fn linked_item(&self, user: &UserId) -> Result<Option<LinkedItem>, StoreError> {
        self.with_user(user, |r| Ok(r.linked_item.clone()))
    }

    async fn linked_users(&self) -> Result<Vec<UserId>, StoreError> {
        let users = self.users();
        let mut out: Vec<UserId> = users
            .iter()
            .filter(|(_, r)| r.linked_item.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    async fn append_report(&self, user: &UserId, report: &Report) -> Result<(), StoreError> {
        self.with_user(user, |r| {
            r.reports.push(report.clone());
            Ok(())
        })
    }

    async fn reports(&self, user: &UserId) -> Result<Vec<Report>, StoreError> {
        self.with_user(user, |r| Ok(r.reports.clone()))
    }

    async fn start_chat_turn(&self, user: &UserId, turn: &ChatTurn) -> Result<(), StoreError> {
        self.with_user(user, |r| {
            r.chat_turns.push(turn.clone());
            Ok(())
        })
    }

    async fn finish_chat_turn(
        &self,
        user: &UserId,
        turn_id: Uuid,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_user(user, |r| {
            let turn = r
                .chat_turns
                .iter_mut()
                .find(|t| t.id == turn_id)
                .ok_or(StoreError::UnknownChatTurn)?;
            turn.answer = Some(answer.to_string());
            turn.completed_at = Some(at);
            Ok(())
        })
    }

    async fn chat_turns(&self, user: &UserId) -> Result<Vec<ChatTurn>, StoreError> {
        self.with_user(user, |r| Ok(r.chat_turns.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::tests::{dec, tx};
    use std::sync::Arc;

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    async fn onboarded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .complete_onboarding(&user(), OnboardingMethod::Manual, Utc::now())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn mutations_for_unknown_users_are_rejected() {
        let store = MemoryStore::new();
        let err = store
            .insert_transaction(&user(), &tx("a", "1.00", "2024-01-01", "Fees"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownUser));
    }

    #[tokio::test]
    async fn every_mutation_stores_a_fresh_snapshot() {
        let store = onboarded().await;
        store
            .insert_transaction(&user(), &tx("a", "10.00", "2024-01-01", "Fees"))
            .await
            .unwrap();
        let stored = store.snapshot(&user()).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.total_expenses, dec("10.00"));

        let mut edited = tx("a", "4.00", "2024-01-01", "Fees");
        edited.notes = "edited".into();
        store.replace_transaction(&user(), &edited).await.unwrap();
        let stored = store.snapshot(&user()).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.total_expenses, dec("4.00"));

        store.remove_transaction(&user(), "a").await.unwrap();
        let stored = store.snapshot(&user()).await.unwrap().unwrap();
        assert_eq!(stored.snapshot, Snapshot::default());
    }

    #[tokio::test]
    async fn removing_an_unknown_transaction_fails() {
        let store = onboarded().await;
        let err = store.remove_transaction(&user(), "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownTransaction));
    }

    #[tokio::test]
    async fn aggregator_import_keeps_manual_entries() {
        let store = onboarded().await;
        store
            .insert_transaction(&user(), &tx("manual-1", "5.00", "2024-01-01", "Fees"))
            .await
            .unwrap();

        let mut imported = tx("plaid-1", "7.00", "2024-01-02", "Travel");
        imported.source = Provenance::Aggregator;
        store
            .replace_aggregator_transactions(&user(), &[imported.clone()])
            .await
            .unwrap();

        let mut replacement = tx("plaid-2", "3.00", "2024-01-03", "Travel");
        replacement.source = Provenance::Aggregator;
        let snapshot = store
            .replace_aggregator_transactions(&user(), &[replacement])
            .await
            .unwrap();

        let ids: Vec<_> = store
            .transactions(&user())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.transaction_id)
            .collect();
        assert_eq!(ids, vec!["manual-1", "plaid-2"]);
        assert_eq!(snapshot.total_expenses, dec("8.00"));
    }

    #[tokio::test]
    async fn concurrent_mutations_are_all_reflected() {
        let store = Arc::new(onboarded().await);
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_transaction(&user(), &tx(&format!("t{i}"), "1.00", "2024-01-01", "Fees"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let stored = store.snapshot(&user()).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.total_expenses, dec("20.00"));
        assert_eq!(stored.snapshot.transaction_count, 20);
    }

    #[tokio::test]
    async fn chat_answers_attach_by_turn_id() {
        let store = onboarded().await;
        let first = ChatTurn::new("same question", Utc::now());
        let second = ChatTurn::new("same question", Utc::now());
        store.start_chat_turn(&user(), &first).await.unwrap();
        store.start_chat_turn(&user(), &second).await.unwrap();

        store
            .finish_chat_turn(&user(), second.id, "second answer", Utc::now())
            .await
            .unwrap();

        let turns = store.chat_turns(&user()).await.unwrap();
        assert_eq!(turns[0].answer, None);
        assert_eq!(turns[1].answer.as_deref(), Some("second answer"));
    }
}
