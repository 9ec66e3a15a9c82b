use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::backend::ScanRecord;

/// Length of the scans-over-time window, today included.
pub const SERIES_DAYS: i64 = 7;
/// Rolling window for the active users statistic.
pub const ACTIVE_USER_DAYS: i64 = 30;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum TimeScope {
    #[default]
    All,
    #[value(name = "year")]
    ByYear,
    #[value(name = "month")]
    ByYearAndMonth,
}

/// The operator's filter selection. Replaced as a whole, never edited in
/// place while a refresh is reading it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterState {
    pub location: String,
    pub scope: TimeScope,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl FilterState {
    pub fn new(
        location: impl Into<String>,
        scope: TimeScope,
        year: Option<i32>,
        month: Option<u32>,
    ) -> Self {
        Self {
            location: location.into(),
            scope,
            year,
            month,
        }
    }

    /// Trimmed location, `None` when blank.
    pub fn location_substring(&self) -> Option<&str> {
        Some(self.location.trim()).filter(|s| !s.is_empty())
    }

    /// The scope actually in force: an incomplete year or month selection
    /// falls back to [`TimeScope::All`].
    pub fn effective_scope(&self) -> TimeScope {
        match (self.scope, self.year, self.month) {
            (TimeScope::ByYear, Some(_), _) => TimeScope::ByYear,
            (TimeScope::ByYearAndMonth, Some(_), Some(month)) if (1..=12).contains(&month) => {
                TimeScope::ByYearAndMonth
            }
            _ => TimeScope::All,
        }
    }

    pub fn describe_range(&self) -> String {
        match (self.effective_scope(), self.year, self.month) {
            (TimeScope::ByYear, Some(year), _) => format!("Year {}", year),
            (TimeScope::ByYearAndMonth, Some(year), Some(month)) => {
                format!("{} {}", MONTH_NAMES[month as usize - 1], year)
            }
            _ => "All Time".to_string(),
        }
    }

    pub fn describe_location(&self) -> String {
        self.location_substring()
            .unwrap_or("All Barangays")
            .to_string()
    }
}

/// Case-insensitive "location contains" predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationPattern {
    needle: String,
}

impl LocationPattern {
    pub fn new(substring: &str) -> Option<Self> {
        let trimmed = substring.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            needle: trimmed.to_lowercase(),
        })
    }

    pub fn needle(&self) -> &str {
        &self.needle
    }

    pub fn matches(&self, text: &str) -> bool {
        text.to_lowercase().contains(&self.needle)
    }
}

/// Record-selection predicate: location match plus inclusive millisecond
/// bounds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct FilterBounds {
    pub location_pattern: Option<LocationPattern>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl FilterBounds {
    /// Same location predicate, no time bounds.
    pub fn location_only(&self) -> Self {
        Self {
            location_pattern: self.location_pattern.clone(),
            from_ms: None,
            to_ms: None,
        }
    }

    /// Replaces the lower bound.
    pub fn since(mut self, from_ms: i64) -> Self {
        self.from_ms = Some(from_ms);
        self
    }

    /// Intersection with `[from_ms, to_ms]`.
    pub fn narrowed(&self, from_ms: Option<i64>, to_ms: Option<i64>) -> Self {
        Self {
            location_pattern: self.location_pattern.clone(),
            from_ms: tighter(self.from_ms, from_ms, i64::max),
            to_ms: tighter(self.to_ms, to_ms, i64::min),
        }
    }

    pub fn has_time_bounds(&self) -> bool {
        self.from_ms.is_some() || self.to_ms.is_some()
    }

    pub fn contains_timestamp(&self, timestamp: Option<i64>) -> bool {
        if !self.has_time_bounds() {
            return true;
        }
        let Some(ts) = timestamp else {
            return false;
        };
        self.from_ms.map_or(true, |from| ts >= from) && self.to_ms.map_or(true, |to| ts <= to)
    }

    pub fn matches(&self, record: &ScanRecord) -> bool {
        let location_ok = match &self.location_pattern {
            Some(pattern) => record
                .location
                .as_deref()
                .is_some_and(|location| pattern.matches(location)),
            None => true,
        };
        location_ok && self.contains_timestamp(record.timestamp)
    }
}

fn tighter(a: Option<i64>, b: Option<i64>, pick: fn(i64, i64) -> i64) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, b) => a.or(b),
    }
}

/// Epoch milliseconds of a wall-clock time in `tz`. A time skipped by a DST
/// transition is read as if it were UTC.
pub fn local_millis<Tz: TimeZone>(tz: &Tz, naive: &NaiveDateTime) -> i64 {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.timestamp_millis(),
        LocalResult::None => tz.from_utc_datetime(naive).timestamp_millis(),
    }
}

pub fn start_of_day_ms<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    local_millis(tz, &date.and_time(NaiveTime::MIN))
}

fn year_span(year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let last = NaiveDate::from_ymd_opt(year, 12, 31)?.and_hms_milli_opt(23, 59, 59, 999)?;
    Some((first, last))
}

fn month_span(year: i32, month: u32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first_day = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    // day 0 of next month
    let last_day = next_month.pred_opt()?;
    Some((
        first_day.and_hms_opt(0, 0, 0)?,
        last_day.and_hms_milli_opt(23, 59, 59, 999)?,
    ))
}

/// Derives the selection predicate for `filter`, interpreting calendar
/// bounds in `tz`.
pub fn derive_bounds_in<Tz: TimeZone>(filter: &FilterState, tz: &Tz) -> FilterBounds {
    let location_pattern = filter.location_substring().and_then(LocationPattern::new);

    let span = match (filter.effective_scope(), filter.year, filter.month) {
        (TimeScope::ByYear, Some(year), _) => year_span(year),
        (TimeScope::ByYearAndMonth, Some(year), Some(month)) => month_span(year, month),
        _ => None,
    };
    if span.is_none() && filter.effective_scope() != TimeScope::All {
        warn!(action = "derive", component = "filter_bounds", year = ?filter.year, month = ?filter.month, "Date out of range, time filter ignored");
    }

    let (from_ms, to_ms) = match span {
        Some((first, last)) => (Some(local_millis(tz, &first)), Some(local_millis(tz, &last))),
        None => (None, None),
    };

    info!(
        action = "derive",
        component = "filter_bounds",
        location = filter.location_substring().unwrap_or(""),
        from_ms = ?from_ms,
        to_ms = ?to_ms,
        "Filter bounds derived"
    );

    FilterBounds {
        location_pattern,
        from_ms,
        to_ms,
    }
}

/// [`derive_bounds_in`] using the machine's local time zone, which is how the
/// mobile app records timestamps.
pub fn derive_bounds(filter: &FilterState) -> FilterBounds {
    derive_bounds_in(filter, &chrono::Local)
}

/// Scans today: location dimension only, from local midnight onwards.
pub fn today_bounds<Tz: TimeZone>(bounds: &FilterBounds, now: &DateTime<Tz>) -> FilterBounds {
    let midnight = start_of_day_ms(&now.timezone(), now.date_naive());
    bounds.location_only().since(midnight)
}

/// Active users: location dimension only, rolling window ending now.
pub fn active_user_bounds<Tz: TimeZone>(
    bounds: &FilterBounds,
    now: &DateTime<Tz>,
) -> FilterBounds {
    let window_start = now.clone() - Duration::days(ACTIVE_USER_DAYS);
    bounds.location_only().since(window_start.timestamp_millis())
}

/// Scans over time: the full filter intersected with the local days of the
/// series window.
pub fn series_bounds<Tz: TimeZone>(bounds: &FilterBounds, now: &DateTime<Tz>) -> FilterBounds {
    let first_day = now.date_naive() - Duration::days(SERIES_DAYS - 1);
    bounds.narrowed(Some(start_of_day_ms(&now.timezone(), first_day)), None)
}

/// Shared holder of the current [`FilterState`]. Readers take a snapshot;
/// writers swap the whole value.
#[derive(Debug, Default)]
pub struct FilterHandle {
    current: RwLock<Arc<FilterState>>,
}

impl FilterHandle {
    pub fn new(initial: FilterState) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<FilterState> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Installs `next` and returns the state it replaced.
    pub fn apply(&self, next: FilterState) -> Arc<FilterState> {
        info!(action = "apply", component = "filter_state", filter = ?next, "Applying filters");
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(next))
    }

    pub fn clear(&self) -> Arc<FilterState> {
        self.apply(FilterState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike, Utc};

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, ms: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_milli_opt(h, min, s, ms)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn month_filter(year: i32, month: u32) -> FilterState {
        FilterState::new("", TimeScope::ByYearAndMonth, Some(year), Some(month))
    }

    #[test]
    fn test_default_filter_is_unrestricted() {
        let bounds = derive_bounds_in(&FilterState::default(), &Utc);
        assert_eq!(bounds, FilterBounds::default());
    }

    #[test]
    fn test_blank_location_is_unset() {
        let filter = FilterState::new("   ", TimeScope::All, None, None);
        assert!(derive_bounds_in(&filter, &Utc).location_pattern.is_none());
        assert_eq!(filter.describe_location(), "All Barangays");
    }

    #[test]
    fn test_location_is_case_insensitive_substring() {
        let filter = FilterState::new(" Sto. Angel ", TimeScope::All, None, None);
        let pattern = derive_bounds_in(&filter, &Utc).location_pattern.unwrap();
        assert!(pattern.matches("Barangay STO. ANGEL, San Pablo"));
        assert!(pattern.matches("sto. angel"));
        assert!(!pattern.matches("Santo Angel"));
    }

    #[test]
    fn test_location_folds_non_ascii_case() {
        let pattern = LocationPattern::new("Santo Niño").unwrap();
        assert!(pattern.matches("Barangay Santo NIÑO, Tarlac"));
        assert!(pattern.matches("50% santo niño"));
    }

    #[test]
    fn test_year_bounds() {
        let filter = FilterState::new("", TimeScope::ByYear, Some(2024), None);
        let bounds = derive_bounds_in(&filter, &Utc);
        assert_eq!(bounds.from_ms, Some(utc_ms(2024, 1, 1, 0, 0, 0, 0)));
        assert_eq!(bounds.to_ms, Some(utc_ms(2024, 12, 31, 23, 59, 59, 999)));
    }

    #[test]
    fn test_year_scope_without_year_is_all() {
        let filter = FilterState::new("", TimeScope::ByYear, None, Some(4));
        assert_eq!(filter.effective_scope(), TimeScope::All);
        assert!(!derive_bounds_in(&filter, &Utc).has_time_bounds());
        assert_eq!(filter.describe_range(), "All Time");
    }

    #[test]
    fn test_month_scope_without_month_is_all() {
        let filter = FilterState::new("", TimeScope::ByYearAndMonth, Some(2024), None);
        assert_eq!(filter.effective_scope(), TimeScope::All);
        assert!(!derive_bounds_in(&filter, &Utc).has_time_bounds());
    }

    #[test]
    fn test_month_out_of_range_is_all() {
        let filter = month_filter(2024, 13);
        assert_eq!(filter.effective_scope(), TimeScope::All);
        assert!(!derive_bounds_in(&filter, &Utc).has_time_bounds());
    }

    #[test]
    fn test_february_leap_and_common_years() {
        let leap = derive_bounds_in(&month_filter(2024, 2), &Utc);
        assert_eq!(leap.from_ms, Some(utc_ms(2024, 2, 1, 0, 0, 0, 0)));
        assert_eq!(leap.to_ms, Some(utc_ms(2024, 2, 29, 23, 59, 59, 999)));

        let common = derive_bounds_in(&month_filter(2023, 2), &Utc);
        assert_eq!(common.to_ms, Some(utc_ms(2023, 2, 28, 23, 59, 59, 999)));

        let century = derive_bounds_in(&month_filter(1900, 2), &Utc);
        assert_eq!(century.to_ms, Some(utc_ms(1900, 2, 28, 23, 59, 59, 999)));
    }

    #[test]
    fn test_month_upper_bound_is_last_millisecond_for_every_month() {
        for year in [2023, 2024, 2025] {
            for month in 1..=12u32 {
                let bounds = derive_bounds_in(&month_filter(year, month), &Utc);
                let (next_y, next_m) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
                let next_first = utc_ms(next_y, next_m, 1, 0, 0, 0, 0);
                assert_eq!(bounds.to_ms, Some(next_first - 1), "{}-{}", year, month);
                assert_eq!(bounds.from_ms, Some(utc_ms(year, month, 1, 0, 0, 0, 0)));
            }
        }
    }

    #[test]
    fn test_bounds_follow_time_zone() {
        let manila = FixedOffset::east_opt(8 * 3600).unwrap();
        let filter = FilterState::new("", TimeScope::ByYear, Some(2024), None);
        let bounds = derive_bounds_in(&filter, &manila);
        assert_eq!(bounds.from_ms, Some(utc_ms(2023, 12, 31, 16, 0, 0, 0)));
        assert_eq!(bounds.to_ms, Some(utc_ms(2024, 12, 31, 15, 59, 59, 999)));
    }

    /// UTC+8 where every local midnight hour is skipped, like a spring-forward
    /// transition at 00:00.
    #[derive(Debug, Clone, Copy)]
    struct MidnightGap;

    impl TimeZone for MidnightGap {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            MidnightGap
        }

        fn offset_from_local_date(&self, _: &NaiveDate) -> LocalResult<FixedOffset> {
            LocalResult::Single(Self::offset())
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            if local.hour() == 0 {
                LocalResult::None
            } else {
                LocalResult::Single(Self::offset())
            }
        }

        fn offset_from_utc_date(&self, _: &NaiveDate) -> FixedOffset {
            Self::offset()
        }

        fn offset_from_utc_datetime(&self, _: &NaiveDateTime) -> FixedOffset {
            Self::offset()
        }
    }

    impl MidnightGap {
        fn offset() -> FixedOffset {
            FixedOffset::east_opt(8 * 3600).unwrap()
        }
    }

    #[test]
    fn test_skipped_local_time_reads_as_utc() {
        let skipped = NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(0, 30, 0)
            .unwrap();
        assert_eq!(local_millis(&MidnightGap, &skipped), utc_ms(2024, 3, 10, 0, 30, 0, 0));

        let regular = skipped.with_hour(9).unwrap();
        assert_eq!(local_millis(&MidnightGap, &regular), utc_ms(2024, 3, 10, 1, 30, 0, 0));

        let filter = FilterState::new("", TimeScope::ByYear, Some(2024), None);
        let bounds = derive_bounds_in(&filter, &MidnightGap);
        assert_eq!(bounds.from_ms, Some(utc_ms(2024, 1, 1, 0, 0, 0, 0)));
        assert_eq!(bounds.to_ms, Some(utc_ms(2024, 12, 31, 15, 59, 59, 999)));
    }

    #[test]
    fn test_describe_range() {
        assert_eq!(month_filter(2024, 3).describe_range(), "March 2024");
        assert_eq!(
            FilterState::new("", TimeScope::ByYear, Some(2025), None).describe_range(),
            "Year 2025"
        );
    }

    #[test]
    fn test_narrowed_is_intersection() {
        let bounds = FilterBounds {
            location_pattern: LocationPattern::new("san"),
            from_ms: Some(100),
            to_ms: Some(500),
        };
        let narrowed = bounds.narrowed(Some(200), None);
        assert_eq!(narrowed.from_ms, Some(200));
        assert_eq!(narrowed.to_ms, Some(500));
        assert_eq!(narrowed.location_pattern, bounds.location_pattern);

        let unbounded = FilterBounds::default().narrowed(Some(50), Some(60));
        assert_eq!((unbounded.from_ms, unbounded.to_ms), (Some(50), Some(60)));
    }

    #[test]
    fn test_fixed_windows_keep_only_location() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 15, 30, 0).unwrap();
        let filter = FilterState::new("Sto. Angel", TimeScope::ByYear, Some(2023), None);
        let bounds = derive_bounds_in(&filter, &Utc);

        let today = today_bounds(&bounds, &now);
        assert_eq!(today.from_ms, Some(utc_ms(2026, 10, 19, 0, 0, 0, 0)));
        assert_eq!(today.to_ms, None);
        assert_eq!(today.location_pattern, bounds.location_pattern);

        let active = active_user_bounds(&bounds, &now);
        assert_eq!(active.from_ms, Some(utc_ms(2026, 9, 19, 15, 30, 0, 0)));
        assert_eq!(active.to_ms, None);
    }

    #[test]
    fn test_series_bounds_intersect_filter() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 15, 30, 0).unwrap();
        let all = derive_bounds_in(&FilterState::default(), &Utc);
        let series = series_bounds(&all, &now);
        assert_eq!(series.from_ms, Some(utc_ms(2026, 10, 13, 0, 0, 0, 0)));
        assert_eq!(series.to_ms, None);

        let month = derive_bounds_in(&month_filter(2026, 10), &Utc);
        let series = series_bounds(&month, &now);
        assert_eq!(series.from_ms, Some(utc_ms(2026, 10, 13, 0, 0, 0, 0)));
        assert_eq!(series.to_ms, Some(utc_ms(2026, 10, 31, 23, 59, 59, 999)));
    }

    #[test]
    fn test_matches_record() {
        let bounds = FilterBounds {
            location_pattern: LocationPattern::new("angel"),
            from_ms: Some(1_000),
            to_ms: Some(2_000),
        };
        let mut record = ScanRecord {
            location: Some("Barangay Sto. Angel".into()),
            timestamp: Some(2_000),
            ..Default::default()
        };
        assert!(bounds.matches(&record));
        record.timestamp = Some(2_001);
        assert!(!bounds.matches(&record));
        record.timestamp = None;
        assert!(!bounds.matches(&record));
        assert!(bounds.location_only().matches(&record));
        record.location = None;
        assert!(!bounds.location_only().matches(&record));
    }

    #[test]
    fn test_filter_handle_swaps_whole_state() {
        let handle = FilterHandle::new(FilterState::default());
        let before = handle.snapshot();

        let next = FilterState::new("Sto. Angel", TimeScope::ByYear, Some(2024), None);
        let replaced = handle.apply(next.clone());
        assert_eq!(*replaced, FilterState::default());
        assert_eq!(*handle.snapshot(), next);
        // earlier snapshots are unaffected
        assert_eq!(*before, FilterState::default());

        handle.clear();
        assert_eq!(*handle.snapshot(), FilterState::default());
    }
}
