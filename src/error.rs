use serde::Serialize;
use thiserror::Error;

/// Failure reported by a data backend.
///
/// The code is whatever the backend uses to identify the failure (a SQLite
/// result code name, a PostgreSQL SQLSTATE, ...). Callers treat the error as
/// opaque apart from [`DataAccessError::is_access_restricted`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message} (code {code})")]
pub struct DataAccessError {
    pub code: String,
    pub message: String,
    pub hint: Option<String>,
}

const ACCESS_CODES: &[&str] = &[
    "42501",
    "PGRST301",
    "PermissionDenied",
    "AuthorizationForStatementDenied",
];

const ACCESS_PHRASES: &[&str] = &[
    "permission",
    "access denied",
    "not authorized",
    "row-level security",
];

impl DataAccessError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Whether the failure looks like an access-control rejection rather than
    /// a transient or structural problem.
    pub fn is_access_restricted(&self) -> bool {
        if ACCESS_CODES.contains(&self.code.as_str()) || self.message.contains("RLS") {
            return true;
        }
        let message = self.message.to_lowercase();
        ACCESS_PHRASES.iter().any(|phrase| message.contains(phrase))
    }
}

/// What the operator was trying to do when a statistic failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    LoadDashboard,
    LoadScans,
    ApplyFilters,
    GenerateReport,
}

impl Operation {
    fn phrase(self) -> &'static str {
        match self {
            Operation::LoadDashboard => "load dashboard data",
            Operation::LoadScans => "load recent scans",
            Operation::ApplyFilters => "apply filters",
            Operation::GenerateReport => "generate the report",
        }
    }
}

/// Operator-facing summary of a [`DataAccessError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureNotice {
    pub operation: Operation,
    pub access_restricted: bool,
    pub message: String,
}

impl FailureNotice {
    pub fn summarize(operation: Operation, error: &DataAccessError) -> Self {
        let access_restricted = error.is_access_restricted();
        let message = if access_restricted {
            format!(
                "Unable to {} due to access restrictions. Please contact your administrator.",
                operation.phrase()
            )
        } else {
            format!(
                "Unable to {}. Please try again later.",
                operation.phrase()
            )
        };
        Self {
            operation,
            access_restricted,
            message,
        }
    }
}
