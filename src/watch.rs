use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::filter::{FilterHandle, FilterState, TimeScope};

pub const HELP: &str = "Commands: apply [location=TEXT] [year=YYYY] [month=1-12] [scope=all|year|month], clear, refresh, quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Apply(FilterState),
    Clear,
    Refresh,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("Unknown filter '{0}', expected location, year, month or scope")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Expected key=value, found '{0}'")]
    MissingValue(String),
}

const FILTER_KEYS: &[&str] = &["location", "year", "month", "scope"];

/// Parses one stdin line. Blank lines are `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<WatchCommand>, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "" => return Ok(None),
        "apply" => WatchCommand::Apply(parse_filter(rest)?),
        "clear" => WatchCommand::Clear,
        "refresh" => WatchCommand::Refresh,
        "quit" | "exit" => WatchCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// `key=value` pairs; a location value may contain spaces and runs until the
/// next recognised `key=`.
fn parse_filter(args: &str) -> Result<FilterState, CommandError> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for token in args.split_whitespace() {
        let starts_pair = token
            .split_once('=')
            .is_some_and(|(key, _)| FILTER_KEYS.contains(&key.to_lowercase().as_str()));
        if starts_pair {
            let (key, value) = token.split_once('=').unwrap_or((token, ""));
            pairs.push((key.to_lowercase(), value.to_string()));
        } else if let Some((_, value)) = pairs.last_mut() {
            value.push(' ');
            value.push_str(token);
        } else {
            return Err(match token.split_once('=') {
                Some((key, _)) => CommandError::UnknownKey(key.to_string()),
                None => CommandError::MissingValue(token.to_string()),
            });
        }
    }

    let mut location = String::new();
    let mut scope = None;
    let mut year = None;
    let mut month = None;
    for (key, value) in pairs {
        let invalid = || CommandError::InvalidValue {
            key: key.clone(),
            value: value.clone(),
        };
        match key.as_str() {
            "location" => location = value.trim().to_string(),
            "year" => year = Some(value.parse::<i32>().map_err(|_| invalid())?),
            "month" => {
                let m = value.parse::<u32>().map_err(|_| invalid())?;
                if !(1..=12).contains(&m) {
                    return Err(invalid());
                }
                month = Some(m);
            }
            "scope" => {
                scope = Some(match value.to_lowercase().as_str() {
                    "all" => TimeScope::All,
                    "year" => TimeScope::ByYear,
                    "month" => TimeScope::ByYearAndMonth,
                    _ => return Err(invalid()),
                })
            }
            other => return Err(CommandError::UnknownKey(other.to_string())),
        }
    }

    let scope = scope.unwrap_or(match (year, month) {
        (Some(_), Some(_)) => TimeScope::ByYearAndMonth,
        (Some(_), None) => TimeScope::ByYear,
        _ => TimeScope::All,
    });
    Ok(FilterState::new(location, scope, year, month))
}

/// Reads commands from stdin until EOF. Unparsable lines are reported and
/// skipped.
pub fn spawn_stdin_reader(commands: Sender<WatchCommand>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Ok(Some(command)) => {
                    let quit = command == WatchCommand::Quit;
                    if commands.send(command).is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => eprintln!("{}\n{}", err, HELP),
            }
        }
        info!(action = "complete", component = "stdin_reader", "Stopped reading commands");
    })
}

/// Renders once, then again after every command and every `interval` without
/// one, until `Quit`. Once the command channel closes the loop keeps
/// refreshing on the timer alone.
pub fn run_loop<F>(
    handle: &FilterHandle,
    commands: &Receiver<WatchCommand>,
    interval: Duration,
    mut render: F,
) -> anyhow::Result<()>
where
    F: FnMut(&FilterState) -> anyhow::Result<()>,
{
    let mut connected = true;
    render(&handle.snapshot())?;
    loop {
        if connected {
            match commands.recv_timeout(interval) {
                Ok(WatchCommand::Apply(next)) => {
                    handle.apply(next);
                }
                Ok(WatchCommand::Clear) => {
                    info!(action = "clear", component = "filter_state", "Clearing filters");
                    handle.clear();
                }
                Ok(WatchCommand::Refresh) => {}
                Ok(WatchCommand::Quit) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(action = "disconnect", component = "watch", "Command input closed, refreshing on timer only");
                    connected = false;
                    continue;
                }
            }
        } else {
            thread::sleep(interval);
        }
        render(&handle.snapshot())?;
    }
}
