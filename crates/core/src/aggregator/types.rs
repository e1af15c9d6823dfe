use crate::domain::account::{Account, Institution};
use crate::domain::transaction::{
    decimal_from_json, normalize_categories, parse_calendar_date, Provenance, Transaction,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub link_token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub item_id: String,
}

/// Accounts, balances and institution of one linked item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemAccounts {
    pub item_id: String,
    pub institution: Option<Institution>,
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PersonalFinanceCategory {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub detailed: Option<String>,
}

/// A transaction as the aggregator reports it. Every field is optional on the
/// wire; `into_transaction` fills the gaps.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AggregatorTransaction {
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Option<Vec<String>>,
    #[serde(default)]
    pub personal_finance_category: Option<PersonalFinanceCategory>,
    #[serde(default)]
    pub pending: Option<bool>,
    #[serde(default)]
    pub pending_transaction_id: Option<String>,
}

impl AggregatorTransaction {
    /// Missing or unparseable dates become `today`; missing or non-numeric
    /// amounts become zero.
    pub fn into_transaction(self, today: NaiveDate, imported_at: DateTime<Utc>) -> Transaction {
        let amount = decimal_from_json(&self.amount)
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        let date = self
            .date
            .as_deref()
            .and_then(parse_calendar_date)
            .unwrap_or(today);

        let labels = match self.category {
            Some(labels) if labels.iter().any(|l| !l.trim().is_empty()) => labels,
            _ => self
                .personal_finance_category
                .and_then(|pfc| pfc.primary)
                .into_iter()
                .collect(),
        };

        let transaction_id = self
            .transaction_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("aggregator-{}", Uuid::new_v4()));

        Transaction {
            transaction_id,
            amount,
            date,
            name: self.name.unwrap_or_default(),
            merchant_name: self.merchant_name,
            categories: normalize_categories(labels),
            pending: self.pending.unwrap_or(false),
            pending_transaction_id: self.pending_transaction_id,
            account_id: self.account_id,
            source: Provenance::Aggregator,
            notes: String::new(),
            imported_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::UNCATEGORIZED;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn decode(v: Value) -> Transaction {
        serde_json::from_value::<AggregatorTransaction>(v)
            .unwrap()
            .into_transaction(today(), Utc::now())
    }

    #[test]
    fn decodes_a_complete_record() {
        let t = decode(json!({
            "transaction_id": "tx_1",
            "account_id": "acc_1",
            "amount": 45.2,
            "date": "2024-01-06",
            "name": "Cafe",
            "merchant_name": "Cafe Ltd",
            "category": ["Food and Drink", "Restaurants"],
            "pending": false
        }));
        assert_eq!(t.transaction_id, "tx_1");
        assert_eq!(t.amount, "45.20".parse::<Decimal>().unwrap());
        assert_eq!(t.date, NaiveDate::from_ymd_opt(2024, 1, 6).unwrap());
        assert_eq!(t.categories, vec!["Food and Drink", "Restaurants"]);
        assert_eq!(t.source, Provenance::Aggregator);
    }

    #[test]
    fn fills_gaps_with_defaults() {
        let t = decode(json!({
            "transaction_id": "tx_2",
            "amount": "not a number",
            "date": null,
            "category": null
        }));
        assert_eq!(t.amount, Decimal::ZERO);
        assert_eq!(t.date, today());
        assert_eq!(t.categories, vec![UNCATEGORIZED]);
        assert!(!t.pending);
    }

    #[test]
    fn falls_back_to_personal_finance_category() {
        let t = decode(json!({
            "transaction_id": "tx_3",
            "amount": -1000,
            "date": "2024-01-05",
            "category": [],
            "personal_finance_category": {"primary": "INCOME", "detailed": "INCOME_WAGES"}
        }));
        assert_eq!(t.categories, vec!["INCOME"]);
        assert!(t.amount.is_sign_negative());
    }
}
