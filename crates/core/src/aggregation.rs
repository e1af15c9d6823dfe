//! Turns a user's transaction list into a [`Snapshot`].
//!
//! A single pass over the input. Every accumulation is rounded to cents at the
//! point of addition, so results over many small amounts can differ from a
//! sum-then-round by a cent; callers rely on that exact behaviour.

use crate::domain::snapshot::Snapshot;
use crate::domain::transaction::{Transaction, TransactionType};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub fn compute_snapshot(transactions: &[Transaction]) -> Snapshot {
    let mut snapshot = Snapshot {
        transaction_count: transactions.len(),
        ..Snapshot::default()
    };

    for tx in transactions {
        let amount = tx.amount.round_dp(2);
        let month = month_key(tx);
        let category = tx.canonical_category().to_string();

        match TransactionType::of(amount) {
            TransactionType::Income => {
                let magnitude = amount.abs();
                add_cents(&mut snapshot.total_income, magnitude);
                add_to(&mut snapshot.income_by_date, tx.date, magnitude);
                add_to(&mut snapshot.income_by_category, category, magnitude);
                add_to(&mut snapshot.income_by_month, month, magnitude);
            }
            TransactionType::Expense => {
                add_cents(&mut snapshot.total_expenses, amount);
                add_to(&mut snapshot.expenses_by_date, tx.date, amount);
                add_to(&mut snapshot.expenses_by_category, category, amount);
                add_to(&mut snapshot.expenses_by_month, month, amount);
            }
        }
    }

    snapshot
}

fn month_key(tx: &Transaction) -> String {
    tx.date.format("%Y-%m").to_string()
}

/// Saturates instead of overflowing.
fn add_cents(slot: &mut Decimal, amount: Decimal) {
    let sum = slot.checked_add(amount).unwrap_or_else(|| {
        tracing::warn!(%amount, "snapshot total overflowed; saturating");
        if amount.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }
    });
    *slot = sum.round_dp(2);
}

fn add_to<K: Ord>(map: &mut BTreeMap<K, Decimal>, key: K, amount: Decimal) {
    add_cents(map.entry(key).or_insert(Decimal::ZERO), amount);
}
