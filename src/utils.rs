use chrono::TimeZone;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the
/// `--verbose` default.
pub fn setup_logging(verbose: bool) {
    const TIME_FORMAT: &[FormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(OffsetTime::new(offset, TIME_FORMAT))
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn format_number(num: u64) -> String {
    let digits = num.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `"Oct 19, 2026, 03:59 PM"` in `tz`, or `"N/A"`.
pub fn format_timestamp<Tz: TimeZone>(timestamp: Option<i64>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp
        .and_then(|ts| tz.timestamp_millis_opt(ts).single())
        .map(|dt| dt.format("%b %-d, %Y, %I:%M %p").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Masks an e-mail's local part or all but the last four digits of a phone
/// number. Anything else is returned unchanged.
pub fn redact_contact(contact: &str) -> String {
    if let Some((local, domain)) = contact.split_once('@') {
        let mut chars = local.chars();
        let first = chars.next().map(String::from).unwrap_or_default();
        return format!("{}{}@{}", first, "*".repeat(chars.count()), domain);
    }

    let digit_count = contact.chars().filter(char::is_ascii_digit).count();
    if digit_count < 7 {
        return contact.to_string();
    }
    let mut seen = 0;
    contact
        .chars()
        .map(|ch| {
            if ch.is_ascii_digit() {
                seen += 1;
                if seen <= digit_count - 4 {
                    return '*';
                }
            }
            ch
        })
        .collect()
}

pub fn validate_args(args: &crate::args::Args) -> anyhow::Result<()> {
    if args.recent == 0 {
        anyhow::bail!("--recent must be greater than 0");
    }

    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be greater than 0");
        }
    }

    if args.interval_secs == 0 {
        anyhow::bail!("--interval-secs must be greater than 0");
    }

    if args.month.is_some() && args.year.is_none() {
        anyhow::bail!("--month requires --year");
    }

    Ok(())
}
