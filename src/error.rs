use std::time::Duration;

use thiserror::Error;

use crate::range::InvalidRangeSpec;
use crate::rate::RateError;
use crate::store::StoreError;

/// Everything that ends a check as UNKNOWN.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeSpec),
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error("opening sample store")]
    Store(#[from] StoreError),
    #[error("connecting to {target}")]
    Connect {
        target: String,
        #[source]
        source: tiberius::error::Error,
    },
    #[error("{metric} query failed")]
    Query {
        metric: &'static str,
        #[source]
        source: tiberius::error::Error,
    },
    #[error("{metric} query returned {detail}")]
    RowShape { metric: &'static str, detail: String },
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
}
