use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt::Display;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::aggregate::{
    active_user_count, category_counts, disease_distribution, location_options, scans_over_time,
    year_options,
};
use crate::args::{Args, OutputFormat};
use crate::backend::{DataBackend, ScanColumn, Selection};
use crate::error::{FailureNotice, Operation};
use crate::filter::{
    active_user_bounds, derive_bounds_in, series_bounds, today_bounds, FilterHandle, FilterState,
    ACTIVE_USER_DAYS,
};
use crate::report::{generate_report, lookup_users, recent_scan_rows, ReportError};
use crate::sqlite::SqliteBackend;
use crate::stats::{
    AggregationResult, DashboardSnapshot, DateRangeSummary, FilterOptions, StatResult,
};
use crate::taxonomy::{init_default_catalog, load_taxonomy, Taxonomy};
use crate::utils::{format_number, format_timestamp};
use crate::watch::{self, WatchCommand};

fn timed<T>(stat: &'static str, compute: impl FnOnce() -> StatResult<T>) -> StatResult<T> {
    let start_time = Instant::now();
    let result = compute();
    match &result {
        Ok(_) => info!(
            action = "complete",
            component = "statistic",
            stat,
            duration_ms = start_time.elapsed().as_millis(),
            "Statistic ready"
        ),
        Err(err) => error!(
            action = "failed",
            component = "statistic",
            stat,
            code = %err.code,
            error = %err,
            access_restricted = err.is_access_restricted(),
            "Statistic failed"
        ),
    }
    result
}

/// Computes every dashboard statistic for one filter snapshot.
///
/// The backend reads run in parallel on the current rayon pool. Each
/// statistic keeps its own result, so a failing query only blanks its own
/// card. A failed user lookup for the recent scans table is not fatal.
pub fn refresh<B, Tz>(
    backend: &B,
    taxonomy: &Taxonomy,
    filter: &FilterState,
    now: &DateTime<Tz>,
    recent_limit: usize,
    redact: bool,
) -> DashboardSnapshot
where
    B: DataBackend + ?Sized,
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Display + Send + Sync,
{
    let start_time = Instant::now();
    info!(action = "start", component = "dashboard_refresh", filter = ?filter, "Refreshing dashboard");

    let tz = now.timezone();
    let bounds = derive_bounds_in(filter, &tz);

    let total_scans = || timed("total_scans", || backend.count_scans(&Selection::new(bounds.clone())));
    let total_users = || timed("total_users", || backend.count_users());
    let scans_today = || {
        timed("scans_today", || {
            backend.count_scans(&Selection::new(today_bounds(&bounds, now)))
        })
    };
    let active_users = || {
        timed("active_users", || {
            let selection =
                Selection::new(active_user_bounds(&bounds, now)).project(&[ScanColumn::UserId]);
            Ok(active_user_count(&backend.fetch_scans(&selection)?))
        })
    };
    let labels = || {
        timed("labels", || {
            let selection = Selection::new(bounds.clone()).project(&[ScanColumn::Prediction]);
            let records = backend.fetch_scans(&selection)?;
            Ok((
                category_counts(taxonomy, &records),
                disease_distribution(taxonomy, &records),
            ))
        })
    };
    let series = || {
        timed("scans_over_time", || {
            let selection =
                Selection::new(series_bounds(&bounds, now)).project(&[ScanColumn::Timestamp]);
            Ok(scans_over_time(&backend.fetch_scans(&selection)?, now))
        })
    };
    let recent = || {
        timed("recent_scans", || {
            let selection = Selection::new(bounds.clone())
                .newest_first()
                .limit(recent_limit);
            let records = backend.fetch_scans(&selection)?;
            let users = lookup_users(backend, &records).unwrap_or_else(|err| {
                warn!(action = "lookup", component = "recent_scans", error = %err, "User lookup failed, showing user ids");
                Default::default()
            });
            Ok(recent_scan_rows(taxonomy, &records, &users, &tz, recent_limit, redact))
        })
    };

    let (((total_scans, total_users), (scans_today, active_users)), (labels, (series, recent))) =
        rayon::join(
            || rayon::join(|| rayon::join(total_scans, total_users), || rayon::join(scans_today, active_users)),
            || rayon::join(labels, || rayon::join(series, recent)),
        );

    let (categories, diseases) = match labels {
        Ok((categories, diseases)) => (Ok(categories), Ok(diseases)),
        Err(err) => (Err(err.clone()), Err(err)),
    };

    let snapshot = DashboardSnapshot {
        filter: filter.clone(),
        range: filter.describe_range(),
        location: filter.describe_location(),
        generated_at: format_timestamp(Some(now.timestamp_millis()), &tz),
        total_scans,
        total_users,
        scans_today,
        active_users,
        categories,
        diseases,
        scans_over_time: series,
        recent_scans: recent,
    };

    info!(
        action = "complete",
        component = "dashboard_refresh",
        failed_stats = snapshot.failures().len(),
        duration_ms = start_time.elapsed().as_millis(),
        "Dashboard refreshed"
    );
    snapshot
}

/// Location and year choices drawn from every scan.
pub fn filter_options<B, Tz>(backend: &B, tz: &Tz) -> StatResult<FilterOptions>
where
    B: DataBackend + ?Sized,
    Tz: TimeZone,
{
    let selection = Selection::default().project(&[ScanColumn::Location, ScanColumn::Timestamp]);
    let records = backend.fetch_scans(&selection)?;
    Ok(FilterOptions {
        locations: location_options(records.iter().filter_map(|r| r.location.as_deref())),
        years: year_options(records.iter().filter_map(|r| r.timestamp), tz),
    })
}

fn stat_text<T>(result: &StatResult<T>, operation: Operation, render: impl Fn(&T) -> String) -> String {
    match result {
        Ok(value) => render(value),
        Err(err) => FailureNotice::summarize(operation, err).message,
    }
}

fn print_breakdown(title: &str, result: &StatResult<AggregationResult>) {
    match result {
        Ok(aggregation) if aggregation.is_empty() => {
            println!("\n{}: No data available", title);
        }
        Ok(aggregation) => {
            println!("\n{} ({} scans):", title, format_number(u64::from(aggregation.total)));
            for entry in &aggregation.entries {
                println!(
                    "  {:<32} {:>8} {:>6.1}%  {}  [{}]",
                    entry.label,
                    format_number(u64::from(entry.count)),
                    entry.percentage,
                    entry.color,
                    entry.category.display_name()
                );
            }
        }
        Err(err) => {
            println!(
                "\n{}: {}",
                title,
                FailureNotice::summarize(Operation::LoadDashboard, err).message
            );
        }
    }
}

pub fn print_dashboard(snapshot: &DashboardSnapshot, date_range: Option<&DateRangeSummary>) {
    println!("\n--- BitterGuard Dashboard ---");
    println!("Filters: {} | {}", snapshot.location, snapshot.range);
    if let Some(range) = date_range {
        if range.days > 0 {
            println!(
                "Data range: {} to {} ({} days)",
                range.earliest,
                range.latest,
                format_number(range.days as u64)
            );
        } else {
            println!("Data range: {} to {}", range.earliest, range.latest);
        }
    }
    println!("Updated: {}", snapshot.generated_at);

    let count = |n: &u64| format_number(*n);
    println!();
    println!(
        "Total scans:  {}",
        stat_text(&snapshot.total_scans, Operation::LoadDashboard, count)
    );
    println!(
        "Total users:  {}",
        stat_text(&snapshot.total_users, Operation::LoadDashboard, count)
    );
    println!(
        "Scans today:  {}",
        stat_text(&snapshot.scans_today, Operation::LoadDashboard, count)
    );
    println!(
        "Active users: {}",
        stat_text(&snapshot.active_users, Operation::LoadDashboard, |n| {
            format!("{} (last {} days)", format_number(*n as u64), ACTIVE_USER_DAYS)
        })
    );

    print_breakdown("Scan results", &snapshot.categories);
    print_breakdown("Disease distribution", &snapshot.diseases);

    println!("\nScans over time:");
    match &snapshot.scans_over_time {
        Ok(days) => {
            for day in days {
                println!("  {}  {:>6}", day.date.format("%b %-d"), format_number(u64::from(day.count)));
            }
        }
        Err(err) => println!("  {}", FailureNotice::summarize(Operation::LoadDashboard, err).message),
    }

    println!("\nRecent scans:");
    match &snapshot.recent_scans {
        Ok(rows) if rows.is_empty() => println!("  No scans found"),
        Ok(rows) => {
            for row in rows {
                println!(
                    "  {:<24} {:<28} {:<30} {:>7}  {}",
                    row.date, row.user, row.disease, row.confidence, row.location
                );
            }
        }
        Err(err) => println!("  {}", FailureNotice::summarize(Operation::LoadScans, err).message),
    }
}

fn print_filter_options(options: &FilterOptions) {
    println!("\nLocations ({}):", options.locations.len());
    for location in &options.locations {
        println!("  {}", location);
    }
    println!("\nYears:");
    for year in &options.years {
        println!("  {}", year);
    }
}

fn render(
    backend: &SqliteBackend,
    taxonomy: &Taxonomy,
    filter: &FilterState,
    args: &Args,
    pool: &rayon::ThreadPool,
) -> Result<()> {
    let now = Local::now();
    let snapshot = pool.install(|| refresh(backend, taxonomy, filter, &now, args.recent, args.redact));
    match args.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("Failed to serialize dashboard")?
            );
        }
        OutputFormat::Text => {
            let date_range = match backend.scan_date_range(&Local) {
                Ok(range) => Some(range),
                Err(err) => {
                    warn!(action = "query", component = "date_range_query", error = %err, "Date range unavailable");
                    None
                }
            };
            print_dashboard(&snapshot, date_range.as_ref());
        }
    }
    Ok(())
}

pub fn run(args: &Args) -> Result<()> {
    let total_start_time = Instant::now();

    if args.init {
        let dir = std::env::current_dir().context("Failed to resolve current directory")?;
        let path = init_default_catalog(&dir)?;
        println!("Created {} with the default disease catalog", path.display());
        return Ok(());
    }

    let taxonomy = load_taxonomy(args.diseases.as_deref())?;
    let backend = SqliteBackend::open(&args.database)?;

    let workers = args.workers.unwrap_or_else(|| {
        let cpu_count = num_cpus::get();
        std::cmp::min(cpu_count, 8)
    });
    info!(action = "configure", component = "dashboard", worker_count = workers, "Using workers for statistics");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("Failed to build worker pool")?;

    let filter = args.filter_state();

    if args.options {
        let options = filter_options(&backend, &Local)
            .map_err(|err| anyhow::anyhow!(FailureNotice::summarize(Operation::ApplyFilters, &err).message))?;
        match args.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&options)?),
            OutputFormat::Text => print_filter_options(&options),
        }
        return Ok(());
    }

    if let Some(destination) = &args.report {
        let summary = generate_report(&backend, &taxonomy, &filter, &Local::now(), destination, args.redact)
            .map_err(|err| match err {
                ReportError::Data(err) => {
                    anyhow::anyhow!(FailureNotice::summarize(Operation::GenerateReport, &err).message)
                }
                other => anyhow::Error::new(other),
            })?;
        println!("{}", summary);
        return Ok(());
    }

    if args.watch {
        let handle = FilterHandle::new(filter);
        let (tx, rx) = mpsc::channel::<WatchCommand>();
        let _reader = watch::spawn_stdin_reader(tx);
        eprintln!("{}", watch::HELP);
        watch::run_loop(
            &handle,
            &rx,
            Duration::from_secs(args.interval_secs),
            |filter| render(&backend, &taxonomy, filter, args, &pool),
        )?;
    } else {
        render(&backend, &taxonomy, &filter, args, &pool)?;
    }

    info!(
        action = "complete",
        component = "dashboard",
        duration_ms = total_start_time.elapsed().as_millis(),
        "Dashboard run completed"
    );
    Ok(())
}
