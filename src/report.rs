use chrono::{DateTime, NaiveDate, TimeZone};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::{category_counts, format_confidence};
use crate::backend::{DataBackend, ScanRecord, Selection, UserRecord};
use crate::error::DataAccessError;
use crate::filter::{derive_bounds_in, FilterState};
use crate::stats::RecentScanRow;
use crate::taxonomy::Taxonomy;
use crate::utils::{format_timestamp, redact_contact};

const NOT_AVAILABLE: &str = "N/A";
/// Shown in the live table when a scan has no usable confidence.
pub const CONFIDENCE_PLACEHOLDER: &str = "—";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No data available for the selected filters to generate a report.")]
    NoData,

    #[error(transparent)]
    Data(#[from] DataAccessError),

    #[error("Failed to write report {path:?}: {source}")]
    Write { path: PathBuf, source: csv::Error },
}

/// One line of the CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "User Email")]
    pub user_email: String,
    #[serde(rename = "User Phone")]
    pub user_phone: String,
    #[serde(rename = "Disease")]
    pub disease: String,
    #[serde(rename = "Confidence")]
    pub confidence: String,
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Date")]
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub total: usize,
    pub range: String,
    pub location: String,
    pub labels: Vec<(String, u32)>,
}

impl fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BitterGuard Disease Detection Report")?;
        writeln!(f)?;
        writeln!(f, "Date Range: {}", self.range)?;
        writeln!(f, "Barangay: {}", self.location)?;
        writeln!(f, "Total Scans: {}", self.total)?;
        writeln!(f)?;
        writeln!(f, "Disease Summary:")?;
        for (label, count) in &self.labels {
            writeln!(f, "- {}: {}", label, count)?;
        }
        writeln!(f)?;
        write!(f, "Saved to {}", self.path.display())
    }
}

pub fn report_file_name(date: NaiveDate) -> String {
    format!("BitterGuard_Report_{}.csv", date.format("%Y-%m-%d"))
}

pub fn users_by_id(users: Vec<UserRecord>) -> HashMap<String, UserRecord> {
    users
        .into_iter()
        .map(|user| (user.id.clone(), user))
        .collect()
}

/// Fetches the users referenced by `records`, each id once.
pub fn lookup_users<B: DataBackend + ?Sized>(
    backend: &B,
    records: &[ScanRecord],
) -> Result<HashMap<String, UserRecord>, DataAccessError> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = records
        .iter()
        .filter_map(|record| record.user_id.as_deref())
        .filter(|id| !id.is_empty() && seen.insert(*id))
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(users_by_id(backend.fetch_users(&ids)?))
}

fn contact(value: Option<&str>, redact: bool) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    Some(if redact {
        redact_contact(value)
    } else {
        value.to_string()
    })
}

/// Who made the scan: e-mail, else phone, else the start of the user id.
pub fn user_display(user: Option<&UserRecord>, user_id: Option<&str>, redact: bool) -> String {
    user.and_then(|u| contact(u.email.as_deref(), redact))
        .or_else(|| user.and_then(|u| contact(u.phone.as_deref(), redact)))
        .or_else(|| {
            user_id
                .filter(|id| !id.is_empty())
                .map(|id| id.chars().take(8).collect())
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn recent_scan_rows<Tz: TimeZone>(
    taxonomy: &Taxonomy,
    records: &[ScanRecord],
    users: &HashMap<String, UserRecord>,
    tz: &Tz,
    limit: usize,
    redact: bool,
) -> Vec<RecentScanRow>
where
    Tz::Offset: fmt::Display,
{
    records
        .iter()
        .take(limit)
        .map(|record| {
            let user = record.user_id.as_ref().and_then(|id| users.get(id));
            let classification = taxonomy.classify(record.prediction.as_deref());
            RecentScanRow {
                id: record.id.clone(),
                user: user_display(user, record.user_id.as_deref(), redact),
                confidence: format_confidence(
                    record.confidence.as_ref(),
                    Some(classification.label.as_str()),
                    CONFIDENCE_PLACEHOLDER,
                ),
                disease: classification.label,
                category: classification.category,
                location: record
                    .location
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                date: format_timestamp(record.timestamp, tz),
            }
        })
        .collect()
}

pub fn report_rows<Tz: TimeZone>(
    taxonomy: &Taxonomy,
    records: &[ScanRecord],
    users: &HashMap<String, UserRecord>,
    tz: &Tz,
    redact: bool,
) -> Vec<ReportRow>
where
    Tz::Offset: fmt::Display,
{
    records
        .iter()
        .map(|record| {
            let user = record.user_id.as_ref().and_then(|id| users.get(id));
            let disease = taxonomy.normalize(record.prediction.as_deref());
            ReportRow {
                id: record.id.clone(),
                user_email: user
                    .and_then(|u| contact(u.email.as_deref(), redact))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                user_phone: user
                    .and_then(|u| contact(u.phone.as_deref(), redact))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                confidence: format_confidence(
                    record.confidence.as_ref(),
                    Some(disease.as_str()),
                    NOT_AVAILABLE,
                ),
                disease,
                location: record
                    .location
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                date: format_timestamp(record.timestamp, tz),
            }
        })
        .collect()
}

pub fn write_report<W: io::Write>(writer: W, rows: &[ReportRow]) -> Result<(), csv::Error> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Exports every scan matching `filter`, newest first, as CSV.
///
/// When `destination` is a directory the file is named after today's date.
/// A failed user lookup only blanks the contact columns.
pub fn generate_report<B, Tz>(
    backend: &B,
    taxonomy: &Taxonomy,
    filter: &FilterState,
    now: &DateTime<Tz>,
    destination: &Path,
    redact: bool,
) -> Result<ReportSummary, ReportError>
where
    B: DataBackend + ?Sized,
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let start_time = Instant::now();
    info!(action = "start", component = "report", filter = ?filter, "Generating report");

    let tz = now.timezone();
    let bounds = derive_bounds_in(filter, &tz);
    let records = backend.fetch_scans(&Selection::new(bounds).newest_first())?;
    if records.is_empty() {
        warn!(action = "complete", component = "report", "No scans matched the report filters");
        return Err(ReportError::NoData);
    }

    let users = lookup_users(backend, &records).unwrap_or_else(|err| {
        warn!(action = "lookup", component = "report", error = %err, "User lookup failed, contact columns left blank");
        HashMap::new()
    });
    let rows = report_rows(taxonomy, &records, &users, &tz, redact);

    let path = if destination.is_dir() {
        destination.join(report_file_name(now.date_naive()))
    } else {
        destination.to_path_buf()
    };
    let file = std::fs::File::create(&path).map_err(|source| ReportError::Write {
        path: path.clone(),
        source: source.into(),
    })?;
    write_report(file, &rows).map_err(|source| ReportError::Write {
        path: path.clone(),
        source,
    })?;

    let labels = category_counts(taxonomy, &records)
        .entries
        .into_iter()
        .map(|entry| (entry.label, entry.count))
        .collect();

    info!(
        action = "complete",
        component = "report",
        row_count = rows.len(),
        path = ?path,
        duration_ms = start_time.elapsed().as_millis(),
        "Report written"
    );
    Ok(ReportSummary {
        path,
        total: records.len(),
        range: filter.describe_range(),
        location: filter.describe_location(),
        labels,
    })
}
