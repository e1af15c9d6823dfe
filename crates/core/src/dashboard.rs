use crate::domain::snapshot::{Snapshot, SnapshotRecord};
use crate::domain::transaction::{Transaction, TransactionType, UserId};
use crate::error::FinanceError;
use crate::storage::Store;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardOverview {
    #[serde(flatten)]
    pub record: SnapshotRecord,
    /// Available balance of the first linked account.
    pub balance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub income: Decimal,
    pub expenses: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyRow {
    /// `Jan 2024`.
    pub month: String,
    pub income: Decimal,
    pub expenses: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryRow {
    pub name: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentRow {
    pub date: NaiveDate,
    /// Signed display string, `+$1000.00` or `-$45.20`.
    pub amount: String,
    pub category: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
}

/// The stored snapshot, rebuilt first when it is missing or outdated.
pub async fn current_snapshot(
    store: &dyn Store,
    user: &UserId,
) -> Result<SnapshotRecord, FinanceError> {
    if let Some(record) = store.snapshot(user).await? {
        return Ok(record);
    }
    tracing::info!(user_id = %user, "no current snapshot; rebuilding");
    refresh(store, user).await
}

pub async fn refresh(store: &dyn Store, user: &UserId) -> Result<SnapshotRecord, FinanceError> {
    let snapshot = store.rebuild_snapshot(user).await?;
    Ok(SnapshotRecord {
        snapshot,
        computed_at: Utc::now(),
    })
}

pub async fn overview(store: &dyn Store, user: &UserId) -> Result<DashboardOverview, FinanceError> {
    let record = current_snapshot(store, user).await?;
    let balance = store
        .linked_item(user)
        .await?
        .and_then(|item| item.accounts.into_iter().next())
        .and_then(|account| account.balances.available)
        .map(|b| b.round_dp(2));
    Ok(DashboardOverview { record, balance })
}

pub async fn recent(store: &dyn Store, user: &UserId) -> Result<Vec<RecentRow>, FinanceError> {
    let transactions = store.transactions(user).await?;
    Ok(recent_transactions(&transactions))
}

/// Income and expenses per day, ascending, including days with only one side.
pub fn daily_rows(snapshot: &Snapshot) -> Vec<DailyRow> {
    let dates: BTreeSet<&NaiveDate> = snapshot
        .income_by_date
        .keys()
        .chain(snapshot.expenses_by_date.keys())
        .collect();

    dates
        .into_iter()
        .map(|date| DailyRow {
            date: *date,
            income: snapshot.income_by_date.get(date).copied().unwrap_or_default(),
            expenses: snapshot.expenses_by_date.get(date).copied().unwrap_or_default(),
        })
        .collect()
}

pub fn monthly_rows(snapshot: &Snapshot) -> Vec<MonthlyRow> {
    let months: BTreeSet<&String> = snapshot
        .income_by_month
        .keys()
        .chain(snapshot.expenses_by_month.keys())
        .collect();

    months
        .into_iter()
        .map(|key| MonthlyRow {
            month: month_label(key),
            income: snapshot.income_by_month.get(key).copied().unwrap_or_default(),
            expenses: snapshot.expenses_by_month.get(key).copied().unwrap_or_default(),
        })
        .collect()
}

fn month_label(key: &str) -> String {
    NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d")
        .map(|d| d.format("%b %Y").to_string())
        .unwrap_or_else(|_| key.to_string())
}

/// Expense totals per category, largest first.
pub fn category_rows(snapshot: &Snapshot) -> Vec<CategoryRow> {
    let mut rows: Vec<CategoryRow> = snapshot
        .expenses_by_category
        .iter()
        .map(|(category, value)| CategoryRow {
            name: prettify_category(category),
            value: value.abs(),
        })
        .collect();
    rows.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.name.cmp(&b.name)));
    rows
}

/// `FOOD_AND_DRINK` -> `Food And Drink`.
pub fn prettify_category(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut at_word_start = true;
    for ch in raw.replace('_', " ").to_lowercase().chars() {
        if at_word_start && ch.is_alphanumeric() {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = !ch.is_alphanumeric();
    }
    out
}

pub fn recent_transactions(transactions: &[Transaction]) -> Vec<RecentRow> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    sorted
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|t| {
            let kind = t.kind();
            let sign = match kind {
                TransactionType::Income => '+',
                TransactionType::Expense => '-',
            };
            RecentRow {
                date: t.date,
                amount: format!("{sign}${:.2}", t.amount.abs()),
                category: t.canonical_category().to_string(),
                kind,
            }
        })
        .collect()
}
