pub mod aggregate;
pub mod args;
pub mod backend;
pub mod dashboard;
pub mod error;
pub mod filter;
pub mod palette;
pub mod report;
pub mod sqlite;
pub mod stats;
pub mod taxonomy;
pub mod utils;
pub mod watch;

pub use aggregate::{
    active_user_count, category_counts, disease_distribution, parse_confidence, scans_over_time,
};
pub use args::Args;
pub use backend::{DataBackend, ScanRecord, Selection, UserRecord};
pub use dashboard::{refresh, run};
pub use error::{DataAccessError, FailureNotice, Operation};
pub use filter::{derive_bounds, derive_bounds_in, FilterBounds, FilterHandle, FilterState, TimeScope};
pub use report::generate_report;
pub use sqlite::SqliteBackend;
pub use stats::{AggregationResult, DashboardSnapshot, DailyCount, LabelCount};
pub use taxonomy::{categorize, normalize, Category, Taxonomy};
