use anyhow::{Context, Result};
use chrono::TimeZone;
use rusqlite::functions::{Context as FunctionContext, FunctionFlags};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{ConfidenceValue, DataBackend, ScanColumn, ScanRecord, Selection, UserRecord};
use crate::error::DataAccessError;
use crate::filter::{FilterBounds, LocationPattern};
use crate::stats::DateRangeSummary;

// SQLite's default limit on host parameters is 999
const USER_LOOKUP_CHUNK: usize = 500;

const TIMESTAMP_MS: &str = "CAST(timestamp AS INTEGER)";
// CAST turns unparsable text into 0, so bounded queries check the shape first
const HAS_TIMESTAMP: &str =
    "(trim(timestamp) GLOB '[0-9]*' OR trim(timestamp) GLOB '-[0-9]*')";

// LIKE folds ASCII case only; barangay names carry letters such as Ñ
const CONTAINS_CI: &str = "contains_ci";

/// Schema of the two collections the dashboard reads. `timestamp` is text
/// because the mobile app stores epoch milliseconds as numeric strings.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS history (
    id TEXT PRIMARY KEY,
    user_id TEXT,
    prediction TEXT,
    confidence,
    location TEXT,
    timestamp TEXT
);
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT,
    phone TEXT
);
";

impl From<rusqlite::Error> for DataAccessError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => DataAccessError::new(
                format!("{:?}", failure.code),
                message.clone().unwrap_or_else(|| failure.to_string()),
            ),
            other => DataAccessError::new("ClientError", other.to_string()),
        }
    }
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// [`DataBackend`] over a SQLite database file, opened read-only.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let start_time = Instant::now();
        info!(action = "start", component = "database_open", path = ?path, "Opening scan database");

        if !path.exists() {
            anyhow::bail!("Database file not found at {:?}", path);
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database {:?}", path))?;

        info!(
            action = "complete",
            component = "database_open",
            duration_ms = start_time.elapsed().as_millis(),
            "Connected to database"
        );
        Self::from_connection(conn)
    }

    /// Wraps an open connection and registers the SQL functions the queries
    /// rely on.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.create_scalar_function(
            CONTAINS_CI,
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            contains_ci,
        )
        .context("Failed to register location matcher")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Earliest and latest scan dates in `tz`, for the dashboard header.
    pub fn scan_date_range<Tz: TimeZone>(&self, tz: &Tz) -> Result<DateRangeSummary>
    where
        Tz::Offset: std::fmt::Display,
    {
        let start_time = Instant::now();
        info!(action = "start", component = "date_range_query", "Querying scan date range");

        let sql = format!(
            "SELECT MIN({ts}), MAX({ts}) FROM history WHERE {has}",
            ts = TIMESTAMP_MS,
            has = HAS_TIMESTAMP
        );
        let (earliest, latest): (Option<i64>, Option<i64>) = self
            .conn()
            .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query scan dates")?;

        let bounds = earliest
            .zip(latest)
            .and_then(|(e, l)| {
                let earliest = tz.timestamp_millis_opt(e).single()?;
                let latest = tz.timestamp_millis_opt(l).single()?;
                Some((earliest, latest))
            });

        let Some((earliest_date, latest_date)) = bounds else {
            warn!(
                action = "complete",
                component = "date_range_query",
                duration_ms = start_time.elapsed().as_millis(),
                "No scan data found"
            );
            return Ok(DateRangeSummary::unavailable());
        };

        let days = (latest_date.clone() - earliest_date.clone()).num_days();
        let summary = DateRangeSummary {
            earliest: earliest_date.format("%B %-d, %Y").to_string(),
            latest: latest_date.format("%B %-d, %Y").to_string(),
            days,
        };
        info!(
            action = "complete",
            component = "date_range_query",
            earliest_date = %summary.earliest,
            latest_date = %summary.latest,
            days_between = days,
            duration_ms = start_time.elapsed().as_millis(),
            "Date range query completed"
        );
        Ok(summary)
    }
}

fn where_clause(bounds: &FilterBounds, params: &mut Vec<Value>) -> String {
    let mut conditions = Vec::new();
    if let Some(pattern) = &bounds.location_pattern {
        params.push(Value::Text(pattern.needle().to_string()));
        conditions.push(format!("{}(location, ?{})", CONTAINS_CI, params.len()));
    }
    if bounds.has_time_bounds() {
        conditions.push(HAS_TIMESTAMP.to_string());
    }
    if let Some(from) = bounds.from_ms {
        params.push(Value::Integer(from));
        conditions.push(format!("{} >= ?{}", TIMESTAMP_MS, params.len()));
    }
    if let Some(to) = bounds.to_ms {
        params.push(Value::Integer(to));
        conditions.push(format!("{} <= ?{}", TIMESTAMP_MS, params.len()));
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// `contains_ci(haystack, needle)`: the same Unicode case-insensitive
/// containment as [`LocationPattern::matches`]. Non-text locations are read
/// the way the column readers read them; NULL never matches.
fn contains_ci(ctx: &FunctionContext<'_>) -> rusqlite::Result<bool> {
    let haystack = match ctx.get_raw(0) {
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Null | ValueRef::Blob(_) => return Ok(false),
    };
    let needle: String = ctx.get(1)?;
    Ok(LocationPattern::new(&needle).is_some_and(|pattern| pattern.matches(&haystack)))
}

fn select_sql(selection: &Selection, params: &mut Vec<Value>) -> String {
    let columns: Vec<&str> = selection
        .projection
        .columns()
        .iter()
        .map(|column| column.column_name())
        .collect();
    let mut sql = format!(
        "SELECT {} FROM history{}",
        columns.join(", "),
        where_clause(&selection.bounds, params)
    );
    if selection.newest_first {
        sql.push_str(&format!(" ORDER BY {} DESC", TIMESTAMP_MS));
    }
    if let Some(limit) = selection.limit {
        params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" LIMIT ?{}", params.len()));
    }
    sql
}

fn text_value(value: Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

fn timestamp_value(value: Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(i),
        Value::Real(f) if f.is_finite() => Some(f as i64),
        Value::Text(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn confidence_value(value: Value) -> Option<ConfidenceValue> {
    match value {
        Value::Integer(i) => Some(ConfidenceValue::Number(i as f64)),
        Value::Real(f) => Some(ConfidenceValue::Number(f)),
        Value::Text(text) => Some(ConfidenceValue::Text(text)),
        Value::Null | Value::Blob(_) => None,
    }
}

fn read_record(row: &rusqlite::Row<'_>, columns: &[ScanColumn]) -> rusqlite::Result<ScanRecord> {
    let mut record = ScanRecord::default();
    for (i, column) in columns.iter().enumerate() {
        let value: Value = row.get(i)?;
        match column {
            ScanColumn::Id => record.id = text_value(value).unwrap_or_default(),
            ScanColumn::UserId => record.user_id = text_value(value),
            ScanColumn::Prediction => record.prediction = text_value(value),
            ScanColumn::Confidence => record.confidence = confidence_value(value),
            ScanColumn::Location => record.location = text_value(value),
            ScanColumn::Timestamp => record.timestamp = timestamp_value(value),
        }
    }
    Ok(record)
}

impl DataBackend for SqliteBackend {
    fn fetch_scans(&self, selection: &Selection) -> Result<Vec<ScanRecord>, DataAccessError> {
        let start_time = Instant::now();
        let mut params = Vec::new();
        let sql = select_sql(selection, &mut params);
        let columns = selection.projection.columns();

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(params), |row| read_record(row, columns))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        info!(
            action = "query",
            component = "scan_fetch",
            row_count = records.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Fetched scan records"
        );
        Ok(records)
    }

    fn count_scans(&self, selection: &Selection) -> Result<u64, DataAccessError> {
        let start_time = Instant::now();
        let mut params = Vec::new();
        let sql = format!(
            "SELECT COUNT(*) FROM history{}",
            where_clause(&selection.bounds, &mut params)
        );
        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;

        info!(
            action = "query",
            component = "scan_count",
            count,
            duration_ms = start_time.elapsed().as_millis(),
            "Counted scan records"
        );
        Ok(count.max(0) as u64)
    }

    fn count_users(&self) -> Result<u64, DataAccessError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        info!(action = "query", component = "user_count", count, "Counted users");
        Ok(count.max(0) as u64)
    }

    fn fetch_users(&self, ids: &[String]) -> Result<Vec<UserRecord>, DataAccessError> {
        let start_time = Instant::now();
        let conn = self.conn();
        let mut users = Vec::new();

        for chunk in ids.chunks(USER_LOOKUP_CHUNK) {
            let placeholders: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, email, phone FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    phone: row.get(2)?,
                })
            })?;
            for user in rows {
                users.push(user?);
            }
        }

        info!(
            action = "query",
            component = "user_lookup",
            requested = ids.len(),
            found = users.len(),
            duration_ms = start_time.elapsed().as_millis(),
            "Looked up users"
        );
        Ok(users)
    }
}
