use crate::storage::StoreError;
use crate::time::window::TimeRange;
use std::fmt;

/// Which entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    User,
    Transaction,
    LinkedAccount,
    ChatTurn,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Missing::User => "user",
            Missing::Transaction => "transaction",
            Missing::LinkedAccount => "linked account",
            Missing::ChatTurn => "chat turn",
        })
    }
}

/// Outcomes the services report to their callers. Each variant is meant to be
/// shown to the user as its own message, except `Upstream`, whose detail only
/// goes to the logs.
#[derive(Debug, thiserror::Error)]
pub enum FinanceError {
    #[error("{0} not found")]
    NotFound(Missing),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{}", no_data_message(.time_range, .categories))]
    NoData {
        time_range: TimeRange,
        categories: Vec<String>,
    },

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl FinanceError {
    pub fn validation(message: impl Into<String>) -> Self {
        FinanceError::Validation(message.into())
    }
}

impl From<StoreError> for FinanceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::UnknownUser => FinanceError::NotFound(Missing::User),
            StoreError::UnknownTransaction => FinanceError::NotFound(Missing::Transaction),
            StoreError::UnknownChatTurn => FinanceError::NotFound(Missing::ChatTurn),
            StoreError::Backend(err) => FinanceError::Upstream(err),
        }
    }
}

fn no_data_message(time_range: &TimeRange, categories: &[String]) -> String {
    let mut message = format!("No transactions found for the selected {time_range} time range");
    if !categories.is_empty() {
        message.push_str(&format!(" and categories: {}", categories.join(", ")));
    }
    message.push_str(". Please select a different time range or categories.");
    message
}
