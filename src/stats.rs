use chrono::NaiveDate;
use serde::Serialize;

use crate::error::DataAccessError;
use crate::filter::FilterState;
use crate::taxonomy::Category;

/// One statistic of a refresh cycle. A failed statistic never takes the
/// others down with it.
pub type StatResult<T> = Result<T, DataAccessError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub category: Category,
    pub count: u32,
    /// One decimal place.
    pub percentage: f64,
    pub color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationResult {
    pub total: u32,
    /// Count descending, ties in first-seen order.
    pub entries: Vec<LabelCount>,
}

impl AggregationResult {
    /// No records fed the result; shown as "no data".
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn get(&self, label: &str) -> Option<&LabelCount> {
        self.entries.iter().find(|entry| entry.label == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentScanRow {
    pub id: String,
    pub user: String,
    pub disease: String,
    pub category: Category,
    pub confidence: String,
    pub location: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRangeSummary {
    pub earliest: String,
    pub latest: String,
    pub days: i64,
}

impl DateRangeSummary {
    pub fn unavailable() -> Self {
        Self {
            earliest: "No data available".to_string(),
            latest: "No data available".to_string(),
            days: 0,
        }
    }
}

/// Choices offered for the location and year filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub locations: Vec<String>,
    pub years: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub filter: FilterState,
    pub range: String,
    pub location: String,
    pub generated_at: String,
    pub total_scans: StatResult<u64>,
    pub total_users: StatResult<u64>,
    pub scans_today: StatResult<u64>,
    pub active_users: StatResult<usize>,
    pub categories: StatResult<AggregationResult>,
    pub diseases: StatResult<AggregationResult>,
    pub scans_over_time: StatResult<Vec<DailyCount>>,
    pub recent_scans: StatResult<Vec<RecentScanRow>>,
}

impl DashboardSnapshot {
    /// Names and errors of the statistics that failed.
    pub fn failures(&self) -> Vec<(&'static str, &DataAccessError)> {
        [
            ("total_scans", self.total_scans.as_ref().err()),
            ("total_users", self.total_users.as_ref().err()),
            ("scans_today", self.scans_today.as_ref().err()),
            ("active_users", self.active_users.as_ref().err()),
            ("categories", self.categories.as_ref().err()),
            ("diseases", self.diseases.as_ref().err()),
            ("scans_over_time", self.scans_over_time.as_ref().err()),
            ("recent_scans", self.recent_scans.as_ref().err()),
        ]
        .into_iter()
        .filter_map(|(name, err)| err.map(|err| (name, err)))
        .collect()
    }
}
