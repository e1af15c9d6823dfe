use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named report presets. Unknown names fall back to `Daily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeRange {
    #[default]
    Daily,
    Weekly,
    Monthly,
    AllTime,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Daily => "daily",
            TimeRange::Weekly => "weekly",
            TimeRange::Monthly => "monthly",
            TimeRange::AllTime => "all time",
        }
    }

    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "weekly" => TimeRange::Weekly,
            "monthly" => TimeRange::Monthly,
            "all time" | "alltime" => TimeRange::AllTime,
            _ => TimeRange::Daily,
        }
    }

    /// Resolves the preset against `today`, inclusive on both ends.
    pub fn window(self, today: NaiveDate) -> DateWindow {
        match self {
            TimeRange::Daily => DateWindow::between(today, today),
            TimeRange::Weekly => DateWindow::between(today - Duration::days(7), today),
            TimeRange::Monthly => DateWindow::between(today - Duration::days(30), today),
            TimeRange::AllTime => DateWindow::unbounded(),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TimeRange {
    fn from(value: String) -> Self {
        TimeRange::parse_lenient(&value)
    }
}

impl From<TimeRange> for String {
    fn from(value: TimeRange) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateWindow {
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn unbounded() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

pub fn today_utc(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}
