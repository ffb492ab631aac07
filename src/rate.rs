//! Per-second rates of monotonically increasing counters.
//!
//! Every probe run is a new process, so the previous observation of a counter
//! lives in a [`SampleStore`] under a [`SampleKey`] naming the target, the
//! metric and the database (if any) it was read from.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::store::{Prior, SampleStore, StoreError};

/// What a metric is read from on a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Server,
    Database(String),
}

impl Scope {
    /// Form kept in the store's `scope` column; distinct for every scope.
    pub fn column_value(&self) -> String {
        match self {
            Self::Server => "server".to_owned(),
            Self::Database(name) => format!("db:{name}"),
        }
    }
}

/// Identity of one rate metric's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    /// Host as connected to, including instance or port.
    pub target: String,
    /// Metric id from the catalog.
    pub metric: &'static str,
    pub scope: Scope,
}

impl SampleKey {
    pub fn new(target: impl Into<String>, metric: &'static str, scope: Scope) -> Self {
        Self {
            target: target.into(),
            metric,
            scope,
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Server => write!(f, "{}/{}", self.target, self.metric),
            Scope::Database(db) => write!(f, "{}/{}/{}", self.target, db, self.metric),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSample {
    pub observed_at: DateTime<Utc>,
    pub raw_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// First observation for the key; there is nothing to diff against yet.
    NoPriorSample,
    PerSecond(f64),
}

impl Rate {
    pub fn per_second(self) -> Option<f64> {
        match self {
            Self::NoPriorSample => None,
            Self::PerSecond(rate) => Some(rate),
        }
    }
}

#[derive(Error, Debug)]
pub enum RateError {
    #[error("no time elapsed since the previous sample of {key}")]
    ZeroElapsedTime { key: SampleKey },
    #[error("previous sample of {key} is {elapsed} in the future")]
    ClockWentBackwards { key: SampleKey, elapsed: Duration },
    #[error("recording sample: {0}")]
    Persistence(#[from] StoreError),
}

/// Turns raw counter readings into rates, one read and one write per call.
pub struct RateSampler<S> {
    store: S,
}

impl<S: SampleStore> RateSampler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn compute_rate(
        &mut self,
        key: &SampleKey,
        raw_value: f64,
        modifier: f64,
    ) -> Result<Rate, RateError> {
        self.compute_rate_at(key, raw_value, modifier, Utc::now())
    }

    /// The new sample is recorded before the rate is worked out, so a failed
    /// computation still leaves a baseline for the next run.
    pub fn compute_rate_at(
        &mut self,
        key: &SampleKey,
        raw_value: f64,
        modifier: f64,
        now: DateTime<Utc>,
    ) -> Result<Rate, RateError> {
        let current = CounterSample {
            observed_at: now,
            raw_value,
        };
        let prior = match self.store.replace(key, &current)? {
            Prior::Found(prior) => prior,
            Prior::Missing => {
                tracing::debug!(%key, "first sample recorded");
                return Ok(Rate::NoPriorSample);
            }
            Prior::Unreadable(err) => {
                tracing::warn!(%key, %err, "previous sample unreadable, starting over");
                return Ok(Rate::NoPriorSample);
            }
        };

        let elapsed = now - prior.observed_at;
        if elapsed == Duration::zero() {
            return Err(RateError::ZeroElapsedTime { key: key.clone() });
        }
        if elapsed < Duration::zero() {
            return Err(RateError::ClockWentBackwards {
                key: key.clone(),
                elapsed: -elapsed,
            });
        }

        let secs = elapsed
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.)
            .unwrap_or_else(|| elapsed.num_seconds() as f64);
        let rate = (raw_value - prior.raw_value) / secs * modifier;
        tracing::debug!(%key, rate, secs, "computed rate");
        Ok(Rate::PerSecond(rate))
    }
}

/// `numerator / denominator * modifier`, or 0 when the denominator is 0.
pub fn ratio(numerator: f64, denominator: f64, modifier: f64) -> f64 {
    if denominator == 0. {
        0.
    } else {
        numerator / denominator * modifier
    }
}
