//! Nagios plugins reporting SQL Server health.
//!
//! A probe reads one performance counter (or a counter and its base), turns
//! it into a value the way the metric asks (directly, as a ratio, or as a
//! per-second rate against the previous run), and classifies the value
//! against Nagios warning/critical ranges.

pub mod check;
pub mod cli;
pub mod config_file;
pub mod error;
pub mod metric;
pub mod mssql;
pub mod plugin;
pub mod range;
pub mod rate;
pub mod status;
pub mod store;

pub use check::{Check, Mode, TestReport};
pub use config_file::{parse_config, parse_config_str, Config};
pub use error::ProbeError;
pub use metric::{Family, Kind, Metric};
pub use range::{InvalidRangeSpec, Range, Thresholds};
pub use rate::{ratio, CounterSample, Rate, RateError, RateSampler, SampleKey, Scope};
pub use status::{Outcome, Severity, UNKNOWN_EXIT_CODE};
pub use store::{MemoryStore, SampleStore, SqliteStore, StoreError};
