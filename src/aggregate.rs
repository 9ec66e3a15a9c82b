use chrono::{DateTime, Datelike, Duration, TimeZone};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;

use crate::backend::{ConfidenceValue, ScanRecord};
use crate::filter::SERIES_DAYS;
use crate::palette::label_color;
use crate::stats::{AggregationResult, DailyCount, LabelCount};
use crate::taxonomy::{categorize, Category, Taxonomy};

pub const EMPTY_SENTINEL: &str = "EMPTY";

static BARANGAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)barangay\s+([^,]+)").expect("valid regex"));

/// Counts every record by normalized label.
///
/// Percentages add up to exactly 100.0, so a single entry can sit 0.1 away
/// from its own rounded share: three equal labels read 33.4, 33.3 and 33.3.
pub fn category_counts(taxonomy: &Taxonomy, records: &[ScanRecord]) -> AggregationResult {
    fold_labels(taxonomy, records, |_| true)
}

/// Counts only real diseases and "No Disease Detected"; no-leaf, error and
/// unknown results are left out of both the entries and the total.
pub fn disease_distribution(taxonomy: &Taxonomy, records: &[ScanRecord]) -> AggregationResult {
    fold_labels(taxonomy, records, |category| {
        matches!(category, Category::Disease | Category::NoDisease)
    })
}

fn fold_labels(
    taxonomy: &Taxonomy,
    records: &[ScanRecord],
    keep: impl Fn(Category) -> bool,
) -> AggregationResult {
    // first-seen order is the tie-breaker, so keep insertion order
    let mut groups: Vec<(String, Category, u32)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let classification = taxonomy.classify(record.prediction.as_deref());
        if !keep(classification.category) {
            continue;
        }
        match index.get(&classification.label) {
            Some(&i) => groups[i].2 += 1,
            None => {
                index.insert(classification.label.clone(), groups.len());
                groups.push((classification.label, classification.category, 1));
            }
        }
    }

    let total: u32 = groups.iter().map(|(_, _, count)| count).sum();
    if total == 0 {
        return AggregationResult::default();
    }

    let counts: Vec<u32> = groups.iter().map(|(_, _, count)| *count).collect();
    let tenths = percentage_tenths(&counts, total);

    let mut entries: Vec<LabelCount> = groups
        .into_iter()
        .zip(tenths)
        .map(|((label, category, count), tenths)| LabelCount {
            color: label_color(taxonomy, &label, category),
            label,
            category,
            count,
            percentage: f64::from(tenths) / 10.0,
        })
        .collect();
    // stable: ties keep first-seen order
    entries.sort_by(|a, b| b.count.cmp(&a.count));

    AggregationResult { total, entries }
}

/// Splits 100.0% into tenths by largest remainder, so the shares always add up
/// to exactly 1000 and each is within one tenth of its true value.
fn percentage_tenths(counts: &[u32], total: u32) -> Vec<u32> {
    let total = u64::from(total);
    let mut shares: Vec<u64> = counts
        .iter()
        .map(|&count| u64::from(count) * 1000 / total)
        .collect();
    let remainder = |i: usize| u64::from(counts[i]) * 1000 % total;

    let mut leftover = 1000 - shares.iter().sum::<u64>();
    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| remainder(b).cmp(&remainder(a)));
    for i in order {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }

    shares.into_iter().map(|share| share as u32).collect()
}

/// Scans per local calendar day over the series window ending today. Every
/// day is present; records outside the window are ignored.
pub fn scans_over_time<Tz: TimeZone>(records: &[ScanRecord], now: &DateTime<Tz>) -> Vec<DailyCount> {
    let tz = now.timezone();
    let today = now.date_naive();
    let mut days: BTreeMap<_, u32> = (0..SERIES_DAYS)
        .rev()
        .map(|offset| (today - Duration::days(offset), 0))
        .collect();

    for ts in records.iter().filter_map(|record| record.timestamp) {
        let Some(local) = tz.timestamp_millis_opt(ts).single() else {
            continue;
        };
        if let Some(count) = days.get_mut(&local.date_naive()) {
            *count += 1;
        }
    }

    days.into_iter()
        .map(|(date, count)| DailyCount { date, count })
        .collect()
}

/// Distinct, non-blank user references.
pub fn active_user_count(records: &[ScanRecord]) -> usize {
    records
        .iter()
        .filter_map(|record| record.user_id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

/// Confidence as a 0–100 percentage.
///
/// `None` for no-leaf results, for missing, blank or `"EMPTY"` values and for
/// anything that does not parse. Text with a `%` is taken as a percentage;
/// a bare number above 1 is already a percentage, otherwise a fraction.
pub fn parse_confidence(value: Option<&ConfidenceValue>, label: Option<&str>) -> Option<f64> {
    if categorize(label) == Category::NoLeaf {
        return None;
    }

    let number = match value? {
        ConfidenceValue::Number(number) => *number,
        ConfidenceValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case(EMPTY_SENTINEL) {
                return None;
            }
            if text.contains('%') {
                let percent = text.replace('%', "").trim().parse::<f64>().ok()?;
                return percent.is_finite().then_some(percent);
            }
            text.parse::<f64>().ok()?
        }
    };

    if !number.is_finite() {
        return None;
    }
    if number > 1.0 {
        Some(number)
    } else {
        // 0.744 * 100.0 is 74.39999999999999
        Some((number * 100.0 * 1e9).round() / 1e9)
    }
}

pub fn format_confidence(
    value: Option<&ConfidenceValue>,
    label: Option<&str>,
    placeholder: &str,
) -> String {
    match parse_confidence(value, label) {
        Some(percent) => format!("{:.1}%", percent),
        None => placeholder.to_string(),
    }
}

/// Location choices for the filter, sorted and deduplicated. A
/// `"Barangay <name>, ..."` location contributes just `<name>`.
pub fn location_options<'a>(locations: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut options = BTreeSet::new();
    for location in locations {
        let location = location.trim();
        if location.is_empty() {
            continue;
        }
        let name = BARANGAY
            .captures(location)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(location);
        options.insert(name.to_string());
    }
    options.into_iter().collect()
}

/// Distinct local years of the given timestamps, newest first.
pub fn year_options<Tz: TimeZone>(timestamps: impl IntoIterator<Item = i64>, tz: &Tz) -> Vec<i32> {
    let years: BTreeSet<i32> = timestamps
        .into_iter()
        .filter_map(|ts| tz.timestamp_millis_opt(ts).single())
        .map(|dt| dt.year())
        .collect();
    years.into_iter().rev().collect()
}
