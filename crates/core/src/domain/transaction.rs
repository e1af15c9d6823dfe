use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Label used whenever a transaction carries no category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Identity-provider user id. Every entity is owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Returns `None` for blank ids.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Manual,
    Aggregator,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Manual => "manual",
            Provenance::Aggregator => "aggregator",
        }
    }
}

impl FromStr for Provenance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Provenance::Manual),
            "aggregator" => Ok(Provenance::Aggregator),
            other => anyhow::bail!("unknown transaction provenance: {other}"),
        }
    }
}

/// Income or expense. Derived from the sign of the amount, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    /// Negative amounts are inflows (the aggregator's convention).
    pub fn of(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            TransactionType::Income
        } else {
            TransactionType::Expense
        }
    }

    /// Applies the sign convention to a magnitude, rounded to cents.
    pub fn signed(self, amount: Decimal) -> Decimal {
        let magnitude = amount.abs().round_dp(2);
        match self {
            TransactionType::Income => -magnitude,
            TransactionType::Expense => magnitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    /// Negative = income, positive = expense.
    pub amount: Decimal,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    /// One or more labels; the first is canonical.
    pub categories: Vec<String>,
    pub pending: bool,
    pub pending_transaction_id: Option<String>,
    pub account_id: Option<String>,
    pub source: Provenance,
    pub notes: String,
    pub imported_at: DateTime<Utc>,
}

impl Transaction {
    pub fn kind(&self) -> TransactionType {
        TransactionType::of(self.amount)
    }

    pub fn canonical_category(&self) -> &str {
        self.categories
            .first()
            .map(String::as_str)
            .unwrap_or(UNCATEGORIZED)
    }

    /// An empty filter matches everything.
    pub fn matches_any_category(&self, filter: &[String]) -> bool {
        filter.is_empty() || self.categories.iter().any(|c| filter.contains(c))
    }

    pub fn display_name(&self) -> &str {
        if !self.name.trim().is_empty() {
            &self.name
        } else {
            self.merchant_name
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("Unknown")
        }
    }
}

/// Trims labels and drops blanks; an empty result becomes `[Uncategorized]`.
pub fn normalize_categories<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let out: Vec<String> = labels
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    if out.is_empty() {
        vec![UNCATEGORIZED.to_string()]
    } else {
        out
    }
}

/// Accepts JSON numbers and numeric strings.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (the date part is kept).
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}
