use crate::aggregation::compute_snapshot;
use crate::domain::account::{Account, Institution, LinkedItem, OnboardingMethod, OnboardingStatus};
use crate::domain::chat::ChatTurn;
use crate::domain::report::Report;
use crate::domain::snapshot::{Snapshot, SnapshotRecord};
use crate::domain::transaction::{Provenance, Transaction, UserId};
use crate::storage::lock;
use crate::storage::{Store, StoreError};
use crate::time::window::TimeRange;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

const TX_COLUMNS: &str = "transaction_id, amount, date, name, merchant_name, categories, pending, \
                          pending_transaction_id, account_id, source, notes, imported_at";

type TxRow = (
    String,
    Decimal,
    NaiveDate,
    String,
    Option<String>,
    Vec<String>,
    bool,
    Option<String>,
    Option<String>,
    String,
    String,
    DateTime<Utc>,
);

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Opens the unit of work every mutation runs in: a SQL transaction
    /// holding the user's mutation lock.
    async fn begin_mutation(
        &self,
        user: &UserId,
    ) -> Result<sqlx::Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;
        lock::lock_user_for_mutation(&mut tx, user).await?;
        if !user_exists(&mut tx, user).await? {
            return Err(StoreError::UnknownUser);
        }
        Ok(tx)
    }

    async fn commit_with_snapshot(
        &self,
        mut tx: sqlx::Transaction<'static, Postgres>,
        user: &UserId,
    ) -> Result<Snapshot, StoreError> {
        let snapshot = rebuild_in(&mut tx, user).await?;
        tx.commit().await.context("commit transaction failed")?;
        Ok(snapshot)
    }

    async fn ensure_user(&self, user: &UserId) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.context("acquire connection failed")?;
        if user_exists(&mut conn, user).await? {
            Ok(())
        } else {
            Err(StoreError::UnknownUser)
        }
    }
}

async fn user_exists(conn: &mut PgConnection, user: &UserId) -> anyhow::Result<bool> {
    let found: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM users WHERE user_id = $1")
        .bind(user.as_str())
        .fetch_optional(conn)
        .await
        .context("select users failed")?;
    Ok(found.is_some())
}

async fn load_transactions(
    conn: &mut PgConnection,
    user: &UserId,
) -> anyhow::Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {TX_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY date DESC, transaction_id"
    );
    let rows = sqlx::query_as::<_, TxRow>(&sql)
        .bind(user.as_str())
        .fetch_all(conn)
        .await
        .context("select transactions failed")?;

    rows.into_iter().map(row_to_transaction).collect()
}

fn row_to_transaction(row: TxRow) -> anyhow::Result<Transaction> {
    let (
        transaction_id,
        amount,
        date,
        name,
        merchant_name,
        categories,
        pending,
        pending_transaction_id,
        account_id,
        source,
        notes,
        imported_at,
    ) = row;

    Ok(Transaction {
        source: source
            .parse::<Provenance>()
            .with_context(|| format!("invalid source in DB for transaction_id={transaction_id}"))?,
        transaction_id,
        amount,
        date,
        name,
        merchant_name,
        categories,
        pending,
        pending_transaction_id,
        account_id,
        notes,
        imported_at,
    })
}

async fn insert_row(
    conn: &mut PgConnection,
    user: &UserId,
    t: &Transaction,
) -> anyhow::Result<()> {
    let sql = format!(
        "INSERT INTO transactions (user_id, {TX_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
    );
    sqlx::query(&sql)
        .bind(user.as_str())
        .bind(&t.transaction_id)
        .bind(t.amount)
        .bind(t.date)
        .bind(&t.name)
        .bind(&t.merchant_name)
        .bind(&t.categories)
        .bind(t.pending)
        .bind(&t.pending_transaction_id)
        .bind(&t.account_id)
        .bind(t.source.as_str())
        .bind(&t.notes)
        .bind(t.imported_at)
        .execute(conn)
        .await
        .with_context(|| format!("insert transactions failed (transaction_id={})", t.transaction_id))?;
    Ok(())
}

async fn rebuild_in(conn: &mut PgConnection, user: &UserId) -> anyhow::Result<Snapshot> {
    let transactions = load_transactions(&mut *conn, user).await?;
    let snapshot = compute_snapshot(&transactions);
    let body = serde_json::to_value(&snapshot).context("serialize snapshot failed")?;

    sqlx::query(
        "INSERT INTO financial_snapshots (user_id, version, snapshot, computed_at) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (user_id) DO UPDATE \
           SET version = EXCLUDED.version, snapshot = EXCLUDED.snapshot, computed_at = EXCLUDED.computed_at",
    )
    .bind(user.as_str())
    .bind(snapshot.version as i32)
    .bind(body)
    .bind(Utc::now())
    .execute(conn)
    .await
    .context("upsert financial_snapshots failed")?;

    tracing::debug!(
        user_id = %user,
        transactions = transactions.len(),
        "rebuilt financial snapshot"
    );
    Ok(snapshot)
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn onboarding_status(&self, user: &UserId) -> Result<Option<OnboardingStatus>, StoreError> {
        let row = sqlx::query_as::<_, (bool, Option<String>, Option<DateTime<Utc>>)>(
            "SELECT onboarding_complete, onboarding_method, onboarded_at FROM users WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("select users failed")?;

        let Some((complete, method, completed_at)) = row else {
            return Ok(None);
        };

        let method = method
            .as_deref()
            .map(str::parse::<OnboardingMethod>)
            .transpose()?;

        Ok(Some(OnboardingStatus {
            complete,
            method,
            completed_at,
        }))
    }

    async fn complete_onboarding(
        &self,
        user: &UserId,
        method: OnboardingMethod,
        at: DateTime<Utc>,
    ) -> Result<OnboardingStatus, StoreError> {
        sqlx::query(
            "INSERT INTO users (user_id, onboarding_complete, onboarding_method, onboarded_at) \
             VALUES ($1, TRUE, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
               SET onboarding_complete = TRUE, onboarding_method = EXCLUDED.onboarding_method, \
                   onboarded_at = EXCLUDED.onboarded_at",
        )
        .bind(user.as_str())
        .bind(method.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .context("upsert users failed")?;

        Ok(OnboardingStatus {
            complete: true,
            method: Some(method),
            completed_at: Some(at),
        })
    }

    async fn transactions(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError> {
        let mut conn = self.pool.acquire().await.context("acquire connection failed")?;
        if !user_exists(&mut conn, user).await? {
            return Err(StoreError::UnknownUser);
        }
        Ok(load_transactions(&mut conn, user).await?)
    }

    async fn insert_transaction(
        &self,
        user: &UserId,
        transaction: &Transaction,
    ) -> Result<Snapshot, StoreError> {
        let mut tx = self.begin_mutation(user).await?;
        insert_row(&mut tx, user, transaction).await?;
        self.commit_with_snapshot(tx, user).await
    }

    async fn replace_transaction(
        &self,
        user: &UserId,
        t: &Transaction,
    ) -> Result<Snapshot, StoreError> {
        let mut tx = self.begin_mutation(user).await?;
        let res = sqlx::query(
            "UPDATE transactions \
             SET amount = $3, date = $4, name = $5, merchant_name = $6, categories = $7, pending = $8, \
                 pending_transaction_id = $9, account_id = $10, source = $11, notes = $12, imported_at = $13 \
             WHERE user_id = $1 AND transaction_id = $2",
        )
        .bind(user.as_str())
        .bind(&t.transaction_id)
        .bind(t.amount)
        .bind(t.date)
        .bind(&t.name)
        .bind(&t.merchant_name)
        .bind(&t.categories)
        .bind(t.pending)
        .bind(&t.pending_transaction_id)
        .bind(&t.account_id)
        .bind(t.source.as_str())
        .bind(&t.notes)
        .bind(t.imported_at)
        .execute(&mut *tx)
        .await
        .context("update transactions failed")?;

        if res.rows_affected() == 0 {
            return Err(StoreError::UnknownTransaction);
        }
        self.commit_with_snapshot(tx, user).await
    }

    async fn remove_transaction(
        &self,
        user: &UserId,
        transaction_id: &str,
    ) -> Result<Snapshot, StoreError> {
        let mut tx = self.begin_mutation(user).await?;
        let res = sqlx::query("DELETE FROM transactions WHERE user_id = $1 AND transaction_id = $2")
            .bind(user.as_str())
            .bind(transaction_id)
            .execute(&mut *tx)
            .await
            .context("delete transactions failed")?;

        if res.rows_affected() == 0 {
            return Err(StoreError::UnknownTransaction);
        }
        self.commit_with_snapshot(tx, user).await
    }

    async fn replace_aggregator_transactions(
        &self,
        user: &UserId,
        transactions: &[Transaction],
    ) -> Result<Snapshot, StoreError> {
        let mut tx = self.begin_mutation(user).await?;
        let removed = sqlx::query("DELETE FROM transactions WHERE user_id = $1 AND source = $2")
            .bind(user.as_str())
            .bind(Provenance::Aggregator.as_str())
            .execute(&mut *tx)
            .await
            .context("delete aggregator transactions failed")?
            .rows_affected();

        for t in transactions {
            insert_row(&mut tx, user, t).await?;
        }

        tracing::info!(
            user_id = %user,
            removed,
            inserted = transactions.len(),
            "replaced aggregator transactions"
        );
        self.commit_with_snapshot(tx, user).await
    }

    async fn snapshot(&self, user: &UserId) -> Result<Option<SnapshotRecord>, StoreError> {
        let row = sqlx::query_as::<_, (Value, DateTime<Utc>)>(
            "SELECT snapshot, computed_at FROM financial_snapshots WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("select financial_snapshots failed")?;

        let Some((body, computed_at)) = row else {
            self.ensure_user(user).await?;
            return Ok(None);
        };

        // Older layouts may not decode; either way they get rebuilt.
        let Ok(snapshot) = serde_json::from_value::<Snapshot>(body) else {
            tracing::warn!(user_id = %user, "stored snapshot has an unreadable layout");
            return Ok(None);
        };
        if !snapshot.is_current_version() {
            return Ok(None);
        }
        Ok(Some(SnapshotRecord {
            snapshot,
            computed_at,
        }))
    }

    async fn rebuild_snapshot(&self, user: &UserId) -> Result<Snapshot, StoreError> {
        let tx = self.begin_mutation(user).await?;
        self.commit_with_snapshot(tx, user).await
    }

    async fn save_linked_item(&self, user: &UserId, item: &LinkedItem) -> Result<(), StoreError> {
        self.ensure_user(user).await?;
        let institution = item
            .institution
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("serialize institution failed")?;
        let accounts = serde_json::to_value(&item.accounts).context("serialize accounts failed")?;

        sqlx::query(
            "INSERT INTO linked_items (user_id, item_id, access_token, institution, accounts, linked_at, last_synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id) DO UPDATE \
               SET item_id = EXCLUDED.item_id, access_token = EXCLUDED.access_token, \
                   institution = EXCLUDED.institution, accounts = EXCLUDED.accounts, \
                   linked_at = EXCLUDED.linked_at, last_synced_at = EXCLUDED.last_synced_at",
        )
        .bind(user.as_str())
        .bind(&item.item_id)
        .bind(&item.access_token)
        .bind(institution)
        .bind(accounts)
        .bind(item.linked_at)
        .bind(item.last_synced_at)
        .execute(&self.pool)
        .await
        .context("upsert linked_items failed")?;
        Ok(())
    }

    async fn linked_item(&self, user: &UserId) -> Result<Option<LinkedItem>, StoreError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<Value>,
                Value,
                DateTime<Utc>,
                Option<DateTime<Utc>>,
            ),
        >(
            "SELECT item_id, access_token, institution, accounts, linked_at, last_synced_at \
             FROM linked_items WHERE user_id = $1",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("select linked_items failed")?;

        let Some((item_id, access_token, institution, accounts, linked_at, last_synced_at)) = row
        else {
            self.ensure_user(user).await?;
            return Ok(None);
        };

        let institution = institution
            .map(serde_json::from_value::<Institution>)
            .transpose()
            .with_context(|| format!("invalid institution JSON in DB for user_id={user}"))?;
        let accounts = serde_json::from_value::<Vec<Account>>(accounts)
            .with_context(|| format!("invalid accounts JSON in DB for user_id={user}"))?;

        Ok(Some(LinkedItem {
            item_id,
            access_token,
            institution,
            accounts,
            linked_at,
            last_synced_at,
        }))
    }

    async fn linked_users(&self) -> Result<Vec<UserId>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT user_id FROM linked_items ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .context("select linked_items failed")?;
        Ok(rows.into_iter().filter_map(|(id,)| UserId::new(id)).collect())
    }

    async fn append_report(&self, user: &UserId, report: &Report) -> Result<(), StoreError> {
        self.ensure_user(user).await?;
        let transaction_count =
            i32::try_from(report.transaction_count).context("report transaction count overflow")?;

        sqlx::query(
            "INSERT INTO reports (id, user_id, report, time_range, categories, generated_at, transaction_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(report.id)
        .bind(user.as_str())
        .bind(&report.report)
        .bind(report.time_range.as_str())
        .bind(&report.categories)
        .bind(report.generated_at)
        .bind(transaction_count)
        .execute(&self.pool)
        .await
        .context("insert reports failed")?;
        Ok(())
    }

    async fn reports(&self, user: &UserId) -> Result<Vec<Report>, StoreError> {
        self.ensure_user(user).await?;
        let rows = sqlx::query_as::<_, (Uuid, String, String, Vec<String>, DateTime<Utc>, i32)>(
            "SELECT id, report, time_range, categories, generated_at, transaction_count \
             FROM reports WHERE user_id = $1 ORDER BY generated_at ASC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select reports failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(id, report, time_range, categories, generated_at, transaction_count)| Report {
                    id,
                    report,
                    time_range: TimeRange::parse_lenient(&time_range),
                    categories,
                    generated_at,
                    transaction_count: usize::try_from(transaction_count).unwrap_or_default(),
                },
            )
            .collect())
    }

    async fn start_chat_turn(&self, user: &UserId, turn: &ChatTurn) -> Result<(), StoreError> {
        self.ensure_user(user).await?;
        sqlx::query(
            "INSERT INTO chat_turns (id, user_id, question, answer, asked_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(turn.id)
        .bind(user.as_str())
        .bind(&turn.question)
        .bind(&turn.answer)
        .bind(turn.asked_at)
        .bind(turn.completed_at)
        .execute(&self.pool)
        .await
        .context("insert chat_turns failed")?;
        Ok(())
    }

    async fn finish_chat_turn(
        &self,
        user: &UserId,
        turn_id: Uuid,
        answer: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE chat_turns SET answer = $3, completed_at = $4 WHERE id = $1 AND user_id = $2",
        )
        .bind(turn_id)
        .bind(user.as_str())
        .bind(answer)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("update chat_turns failed")?;

        if res.rows_affected() == 0 {
            return Err(StoreError::UnknownChatTurn);
        }
        Ok(())
    }

    async fn chat_turns(&self, user: &UserId) -> Result<Vec<ChatTurn>, StoreError> {
        self.ensure_user(user).await?;
        let rows = sqlx::query_as::<
            _,
            (Uuid, String, Option<String>, DateTime<Utc>, Option<DateTime<Utc>>),
        >(
            "SELECT id, question, answer, asked_at, completed_at \
             FROM chat_turns WHERE user_id = $1 ORDER BY asked_at ASC",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .context("select chat_turns failed")?;

        Ok(rows
            .into_iter()
            .map(|(id, question, answer, asked_at, completed_at)| ChatTurn {
                id,
                question,
                answer,
                asked_at,
                completed_at,
            })
            .collect())
    }
}
