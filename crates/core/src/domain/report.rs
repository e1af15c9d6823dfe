use crate::time::window::TimeRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A generated summary. Append-only: never edited or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub report: String,
    pub time_range: TimeRange,
    pub categories: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub transaction_count: usize,
}
