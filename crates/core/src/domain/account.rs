use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingMethod {
    Manual,
    Aggregator,
}

impl OnboardingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            OnboardingMethod::Manual => "manual",
            OnboardingMethod::Aggregator => "aggregator",
        }
    }
}

impl FromStr for OnboardingMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(OnboardingMethod::Manual),
            "aggregator" => Ok(OnboardingMethod::Aggregator),
            other => anyhow::bail!("unknown onboarding method: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingStatus {
    pub complete: bool,
    pub method: Option<OnboardingMethod>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnboardingStatus {
    pub fn not_started() -> Self {
        Self {
            complete: false,
            method: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Balances {
    #[serde(default)]
    pub available: Option<Decimal>,
    #[serde(default)]
    pub current: Option<Decimal>,
    #[serde(default)]
    pub limit: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub balances: Balances,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    pub institution_id: String,
    pub name: String,
}

/// A bank connection made through the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedItem {
    pub item_id: String,
    pub access_token: String,
    pub institution: Option<Institution>,
    pub accounts: Vec<Account>,
    pub linked_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// What the API exposes about a link. The access token never leaves the server.
#[derive(Debug, Clone, Serialize)]
pub struct LinkedItemView {
    pub item_id: String,
    pub institution: Option<Institution>,
    pub accounts: Vec<Account>,
    pub linked_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<&LinkedItem> for LinkedItemView {
    fn from(item: &LinkedItem) -> Self {
        Self {
            item_id: item.item_id.clone(),
            institution: item.institution.clone(),
            accounts: item.accounts.clone(),
            linked_at: item.linked_at,
            last_synced_at: item.last_synced_at,
        }
    }
}
