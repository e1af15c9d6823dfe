//! Manual transaction entry, editing and removal, plus the read models the
//! transaction table is built from.
//!
//! Every mutation goes through the store in a single unit of work with the
//! snapshot rebuild, and hands the refreshed snapshot back to the caller.

use crate::domain::account::{OnboardingMethod, OnboardingStatus};
use crate::domain::snapshot::Snapshot;
use crate::domain::transaction::{
    decimal_from_json, normalize_categories, parse_calendar_date, Provenance, Transaction,
    TransactionType, UserId,
};
use crate::error::FinanceError;
use crate::storage::{Store, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use uuid::Uuid;

/// A category given either as one label or as a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CategoryInput {
    One(String),
    Many(Vec<String>),
}

impl CategoryInput {
    fn into_labels(self) -> Vec<String> {
        match self {
            CategoryInput::One(label) => vec![label],
            CategoryInput::Many(labels) => labels,
        }
    }
}

fn labels_from(input: Option<CategoryInput>) -> Vec<String> {
    normalize_categories(input.map(CategoryInput::into_labels).unwrap_or_default())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTransaction {
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<CategoryInput>,
    #[serde(default, alias = "isIncome")]
    pub is_income: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<CategoryInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A stored transaction together with the snapshot rebuilt after storing it.
#[derive(Debug, Clone, Serialize)]
pub struct Mutation {
    pub transaction: Transaction,
    pub snapshot: Snapshot,
}

/// One line of the transaction table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRow {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category: String,
    pub date: NaiveDate,
    /// Magnitude; the direction is in `kind`.
    pub amount: Decimal,
    pub name: String,
    pub notes: String,
    pub source: Provenance,
    pub pending: bool,
}

impl From<&Transaction> for TransactionRow {
    fn from(t: &Transaction) -> Self {
        Self {
            id: t.transaction_id.clone(),
            kind: t.kind(),
            category: t.canonical_category().to_string(),
            date: t.date,
            amount: t.amount.abs(),
            name: t.display_name().to_string(),
            notes: t.notes.clone(),
            source: t.source,
            pending: t.pending,
        }
    }
}

/// Exclusive bound on a stored amount; the column is `NUMERIC(14, 2)`.
const AMOUNT_LIMIT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0); // 1_000_000_000_000

struct Required {
    amount: Decimal,
    date: NaiveDate,
    name: String,
}

fn required_fields(
    amount: &Value,
    date: Option<&str>,
    name: Option<&str>,
    required: &str,
) -> Result<Required, FinanceError> {
    let missing = || FinanceError::validation(format!("missing required fields: {required} are required"));

    let amount = decimal_from_json(amount)
        .filter(|a| !a.round_dp(2).is_zero())
        .ok_or_else(missing)?;
    if amount.round_dp(2).abs() >= AMOUNT_LIMIT {
        return Err(FinanceError::validation(format!(
            "amount out of range: {amount} (must be below {AMOUNT_LIMIT} in magnitude)"
        )));
    }
    let date = date.filter(|d| !d.trim().is_empty()).ok_or_else(missing)?;
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(missing)?;

    let date = parse_calendar_date(date)
        .ok_or_else(|| FinanceError::validation(format!("invalid date: {date}")))?;

    Ok(Required {
        amount,
        date,
        name: name.to_string(),
    })
}

fn parse_kind(raw: Option<&str>) -> Result<TransactionType, FinanceError> {
    match raw.map(str::trim) {
        Some(k) if k.eq_ignore_ascii_case("income") => Ok(TransactionType::Income),
        Some(k) if k.eq_ignore_ascii_case("expense") => Ok(TransactionType::Expense),
        Some(k) if !k.is_empty() => Err(FinanceError::validation(format!(
            "invalid type: {k} (expected Income or Expense)"
        ))),
        _ => Err(FinanceError::validation(
            "missing required fields: id, amount, date, name and type are required",
        )),
    }
}

pub async fn add_transaction(
    store: &dyn Store,
    user: &UserId,
    input: NewTransaction,
    now: DateTime<Utc>,
) -> Result<Mutation, FinanceError> {
    let fields = required_fields(
        &input.amount,
        input.date.as_deref(),
        input.name.as_deref(),
        "amount, date and name",
    )?;

    let kind = if input.is_income {
        TransactionType::Income
    } else {
        TransactionType::Expense
    };

    let transaction = Transaction {
        transaction_id: format!("manual-{}", Uuid::new_v4()),
        amount: kind.signed(fields.amount),
        date: fields.date,
        merchant_name: Some(fields.name.clone()),
        name: fields.name,
        categories: labels_from(input.category),
        pending: false,
        pending_transaction_id: None,
        account_id: None,
        source: Provenance::Manual,
        notes: input.notes.unwrap_or_default(),
        imported_at: now,
    };

    let snapshot = store.insert_transaction(user, &transaction).await?;
    tracing::info!(
        user_id = %user,
        transaction_id = %transaction.transaction_id,
        "transaction added"
    );
    Ok(Mutation {
        transaction,
        snapshot,
    })
}

pub async fn edit_transaction(
    store: &dyn Store,
    user: &UserId,
    transaction_id: &str,
    update: TransactionUpdate,
) -> Result<Mutation, FinanceError> {
    let transaction_id = transaction_id.trim();
    if transaction_id.is_empty() {
        return Err(FinanceError::validation(
            "missing required fields: id, amount, date, name and type are required",
        ));
    }
    let fields = required_fields(
        &update.amount,
        update.date.as_deref(),
        update.name.as_deref(),
        "id, amount, date, name and type",
    )?;
    let kind = parse_kind(update.kind.as_deref())?;

    let existing = store
        .transactions(user)
        .await?
        .into_iter()
        .find(|t| t.transaction_id == transaction_id)
        .ok_or(StoreError::UnknownTransaction)?;

    let transaction = Transaction {
        amount: kind.signed(fields.amount),
        date: fields.date,
        merchant_name: Some(fields.name.clone()),
        name: fields.name,
        categories: labels_from(update.category),
        notes: update.notes.unwrap_or_default(),
        ..existing
    };

    let snapshot = store.replace_transaction(user, &transaction).await?;
    tracing::info!(user_id = %user, transaction_id, "transaction edited");
    Ok(Mutation {
        transaction,
        snapshot,
    })
}

pub async fn delete_transaction(
    store: &dyn Store,
    user: &UserId,
    transaction_id: &str,
) -> Result<Snapshot, FinanceError> {
    let snapshot = store.remove_transaction(user, transaction_id).await?;
    tracing::info!(user_id = %user, transaction_id, "transaction deleted");
    Ok(snapshot)
}

/// An unknown user simply has no transactions.
async fn transactions_or_empty(
    store: &dyn Store,
    user: &UserId,
) -> Result<Vec<Transaction>, FinanceError> {
    match store.transactions(user).await {
        Ok(list) => Ok(list),
        Err(StoreError::UnknownUser) => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Table rows, newest first.
pub async fn list_transactions(
    store: &dyn Store,
    user: &UserId,
) -> Result<Vec<TransactionRow>, FinanceError> {
    let mut transactions = transactions_or_empty(store, user).await?;
    transactions.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(transactions.iter().map(TransactionRow::from).collect())
}

/// Every label in use, sorted and de-duplicated.
pub async fn list_categories(
    store: &dyn Store,
    user: &UserId,
) -> Result<Vec<String>, FinanceError> {
    let labels: BTreeSet<String> = transactions_or_empty(store, user)
        .await?
        .into_iter()
        .flat_map(|t| t.categories)
        .collect();
    Ok(labels.into_iter().collect())
}

pub async fn onboarding_status(
    store: &dyn Store,
    user: &UserId,
) -> Result<OnboardingStatus, FinanceError> {
    Ok(store
        .onboarding_status(user)
        .await?
        .unwrap_or_else(OnboardingStatus::not_started))
}

pub async fn complete_onboarding(
    store: &dyn Store,
    user: &UserId,
    method: OnboardingMethod,
    now: DateTime<Utc>,
) -> Result<OnboardingStatus, FinanceError> {
    let status = store.complete_onboarding(user, method, now).await?;
    tracing::info!(user_id = %user, method = method.as_str(), "onboarding complete");
    Ok(status)
}
