use serde::Serialize;

use crate::error::DataAccessError;
use crate::filter::FilterBounds;

/// Confidence as stored by the mobile app: `"74.4%"`, `0.744`, `74.4` or the
/// sentinel `"EMPTY"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfidenceValue {
    Text(String),
    Number(f64),
}

impl From<&str> for ConfidenceValue {
    fn from(value: &str) -> Self {
        ConfidenceValue::Text(value.to_string())
    }
}

impl From<f64> for ConfidenceValue {
    fn from(value: f64) -> Self {
        ConfidenceValue::Number(value)
    }
}

/// One row of the `history` table. Columns left out of a projection stay at
/// their default.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub prediction: Option<String>,
    pub confidence: Option<ConfidenceValue>,
    pub location: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanColumn {
    Id,
    UserId,
    Prediction,
    Confidence,
    Location,
    Timestamp,
}

impl ScanColumn {
    pub const ALL: &'static [ScanColumn] = &[
        ScanColumn::Id,
        ScanColumn::UserId,
        ScanColumn::Prediction,
        ScanColumn::Confidence,
        ScanColumn::Location,
        ScanColumn::Timestamp,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            ScanColumn::Id => "id",
            ScanColumn::UserId => "user_id",
            ScanColumn::Prediction => "prediction",
            ScanColumn::Confidence => "confidence",
            ScanColumn::Location => "location",
            ScanColumn::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    Columns(&'static [ScanColumn]),
}

impl Projection {
    pub fn columns(&self) -> &'static [ScanColumn] {
        match *self {
            Projection::All => ScanColumn::ALL,
            Projection::Columns(columns) if columns.is_empty() => ScanColumn::ALL,
            Projection::Columns(columns) => columns,
        }
    }
}

/// What to read from the scan records: the filter predicate, the columns, and
/// optionally newest-first ordering and a row limit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    pub bounds: FilterBounds,
    pub projection: Projection,
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl Selection {
    pub fn new(bounds: FilterBounds) -> Self {
        Self {
            bounds,
            ..Self::default()
        }
    }

    pub fn project(mut self, columns: &'static [ScanColumn]) -> Self {
        self.projection = Projection::Columns(columns);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Read-only access to the scan records and users collections.
///
/// Implementations must be shareable across the threads of one refresh cycle.
/// They perform no retries; every failure is reported as a
/// [`DataAccessError`].
pub trait DataBackend: Sync {
    fn fetch_scans(&self, selection: &Selection) -> Result<Vec<ScanRecord>, DataAccessError>;

    /// Exact number of rows matching the selection's bounds.
    fn count_scans(&self, selection: &Selection) -> Result<u64, DataAccessError>;

    fn count_users(&self) -> Result<u64, DataAccessError>;

    /// Users with the given ids; unknown ids are silently absent.
    fn fetch_users(&self, ids: &[String]) -> Result<Vec<UserRecord>, DataAccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_projection_reads_all_columns() {
        assert_eq!(Projection::Columns(&[]).columns(), ScanColumn::ALL);
        assert_eq!(Projection::All.columns().len(), 6);
    }

    #[test]
    fn test_selection_builder() {
        let selection = Selection::new(FilterBounds::default())
            .project(&[ScanColumn::Prediction])
            .newest_first()
            .limit(10);
        assert_eq!(selection.projection.columns(), &[ScanColumn::Prediction]);
        assert!(selection.newest_first);
        assert_eq!(selection.limit, Some(10));
    }
}
