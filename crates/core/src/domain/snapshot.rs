use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the snapshot layout changes. Stored snapshots with another
/// version are treated as absent and rebuilt.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Derived rollups for one user. Always rebuilt wholesale from the user's
/// transactions; never patched incrementally.
///
/// Income figures are positive magnitudes even though income transactions
/// carry negative amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub transaction_count: usize,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub income_by_date: BTreeMap<NaiveDate, Decimal>,
    pub expenses_by_date: BTreeMap<NaiveDate, Decimal>,
    pub income_by_category: BTreeMap<String, Decimal>,
    pub expenses_by_category: BTreeMap<String, Decimal>,
    /// Keyed by `YYYY-MM`.
    pub income_by_month: BTreeMap<String, Decimal>,
    /// Keyed by `YYYY-MM`.
    pub expenses_by_month: BTreeMap<String, Decimal>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            transaction_count: 0,
            total_income: Decimal::ZERO,
            total_expenses: Decimal::ZERO,
            income_by_date: BTreeMap::new(),
            expenses_by_date: BTreeMap::new(),
            income_by_category: BTreeMap::new(),
            expenses_by_category: BTreeMap::new(),
            income_by_month: BTreeMap::new(),
            expenses_by_month: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn is_current_version(&self) -> bool {
        self.version == SNAPSHOT_VERSION
    }

    /// Income minus expenses.
    pub fn net(&self) -> Decimal {
        self.total_income - self.total_expenses
    }
}

/// A persisted snapshot and the moment it was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot: Snapshot,
    pub computed_at: DateTime<Utc>,
}
