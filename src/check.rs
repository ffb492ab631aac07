//! Combine a raw sample the way its metric asks and classify the result.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::ProbeError;
use crate::metric::{Family, Kind, Metric};
use crate::mssql::{MssqlProbe, Sample};
use crate::range::Thresholds;
use crate::rate::{ratio, RateSampler, SampleKey, Scope};
use crate::status::{MetricResult, Outcome, UNKNOWN_EXIT_CODE};
use crate::store::SampleStore;

/// What a probe invocation was asked to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Metric(&'static Metric),
    /// Run every query of the family once.
    Test,
}

impl Mode {
    /// Whether running this mode touches rate state.
    pub fn needs_state(&self) -> bool {
        match self {
            Self::Metric(metric) => matches!(metric.kind, Kind::Rate(_)),
            Self::Test => true,
        }
    }
}

/// One target and scope, checked against one pair of thresholds.
pub struct Check<S> {
    target: String,
    scope: Scope,
    thresholds: Thresholds,
    sampler: RateSampler<S>,
}

impl<S: SampleStore> Check<S> {
    pub fn new(target: impl Into<String>, scope: Scope, thresholds: Thresholds, store: S) -> Self {
        Self {
            target: target.into(),
            scope,
            thresholds,
            sampler: RateSampler::new(store),
        }
    }

    pub fn evaluate(
        &mut self,
        metric: &'static Metric,
        sample: Sample,
        now: DateTime<Utc>,
    ) -> Result<Outcome, ProbeError> {
        let value = match (metric.kind, sample) {
            (Kind::ConnectTime | Kind::Direct(_), Sample::Scalar(value)) => {
                Some(value * metric.modifier)
            }
            (
                Kind::Ratio(_),
                Sample::Pair {
                    numerator,
                    denominator,
                },
            ) => Some(ratio(numerator, denominator, metric.modifier)),
            (Kind::Rate(_), Sample::Scalar(raw_value)) => {
                let key = SampleKey::new(self.target.as_str(), metric.id, self.scope.clone());
                self.sampler
                    .compute_rate_at(&key, raw_value, metric.modifier, now)?
                    .per_second()
            }
            (kind, sample) => {
                return Err(ProbeError::RowShape {
                    metric: metric.id,
                    detail: format!("{sample:?} for a {kind:?} metric"),
                })
            }
        };

        let outcome = Outcome::new(
            metric.summary,
            MetricResult {
                value,
                unit: metric.unit,
                label: metric.label,
            },
            self.thresholds,
        );
        tracing::debug!(metric = metric.id, ?value, severity = %outcome.severity, "classified");
        Ok(outcome)
    }

    pub async fn run(
        &mut self,
        probe: &mut MssqlProbe,
        metric: &'static Metric,
    ) -> Result<Outcome, ProbeError> {
        let sample = probe.sample(metric, &self.scope).await?;
        self.evaluate(metric, sample, Utc::now())
    }

    /// Run every query metric of `family`, collecting failures instead of
    /// stopping at the first one.
    pub async fn run_all(&mut self, probe: &mut MssqlProbe, family: Family) -> TestReport {
        let mut report = TestReport::default();
        for metric in family.metrics() {
            if metric.kind.query().is_none() {
                continue;
            }
            let result = self.run(probe, metric).await;
            report.record(metric.id, result);
        }
        report
    }
}

/// Result of the `test` mode.
#[derive(Debug, Default)]
pub struct TestReport {
    lines: Vec<String>,
    pub total: usize,
    pub failed: usize,
}

impl TestReport {
    pub fn record(&mut self, id: &str, result: Result<Outcome, ProbeError>) {
        self.total += 1;
        match result {
            Ok(_) => self.lines.push(format!("{id} passed!")),
            Err(err) => {
                self.failed += 1;
                let err = color_eyre::Report::new(err);
                self.lines.push(format!("{id} failed with: {err:#}"));
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else {
            UNKNOWN_EXIT_CODE
        }
    }
}

impl fmt::Display for TestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        write!(f, "{}/{} tests failed.", self.failed, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::RateError;
    use crate::status::Severity;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn check(warning: &str, critical: &str) -> Check<MemoryStore> {
        Check::new(
            "db01",
            Scope::Server,
            Thresholds::parse(Some(warning), Some(critical)).unwrap(),
            MemoryStore::new(),
        )
    }

    fn metric(id: &str) -> &'static Metric {
        Family::Server.find(id).unwrap()
    }

    #[test]
    fn direct_metric() {
        let mut c = check("100", "200");
        let o = c.evaluate(metric("connections"), Sample::Scalar(150.), at(0)).unwrap();
        assert_eq!(o.severity, Severity::Warning);
        assert_eq!(
            o.to_string(),
            "WARNING: Number of open connections is 150|connections=150;100;200;;"
        );
    }

    #[test]
    fn ratio_metric_scaled_to_percent() {
        let mut c = check("95:", "90:");
        let sample = Sample::Pair {
            numerator: 920.,
            denominator: 1000.,
        };
        let o = c.evaluate(metric("cachehit"), sample, at(0)).unwrap();
        assert_eq!(o.result.value, Some(92.));
        assert_eq!(o.severity, Severity::Warning);
    }

    #[test]
    fn ratio_with_zero_base_is_zero() {
        let mut c = check("", "");
        let sample = Sample::Pair {
            numerator: 5.,
            denominator: 0.,
        };
        let o = c.evaluate(metric("bufferhitratio"), sample, at(0)).unwrap();
        assert_eq!(o.result.value, Some(0.));
    }

    #[test]
    fn rate_metric_across_runs() {
        let mut c = check("5", "10");
        let m = metric("pagereads");

        let first = c.evaluate(m, Sample::Scalar(100.), at(0)).unwrap();
        assert_eq!(first.result.value, None);
        assert_eq!(first.severity, Severity::Ok);

        let second = c.evaluate(m, Sample::Scalar(130.), at(10)).unwrap();
        assert_eq!(second.result.value, Some(3.));
        assert_eq!(second.severity, Severity::Ok);

        let third = c.evaluate(m, Sample::Scalar(250.), at(20)).unwrap();
        assert_eq!(third.result.value, Some(12.));
        assert_eq!(third.severity, Severity::Critical);
    }

    #[test]
    fn rate_errors_propagate() {
        let mut c = check("", "");
        let m = metric("batchreq");
        c.evaluate(m, Sample::Scalar(1.), at(0)).unwrap();
        let err = c.evaluate(m, Sample::Scalar(2.), at(0)).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Rate(RateError::ZeroElapsedTime { .. })
        ));
    }

    #[test]
    fn scopes_keep_separate_state() {
        let m = Family::Database.find("logflushes").unwrap();
        let mut sales = Check::new(
            "db01",
            Scope::Database("sales".into()),
            Thresholds::default(),
            MemoryStore::new(),
        );
        sales.evaluate(m, Sample::Scalar(10.), at(0)).unwrap();
        let o = sales.evaluate(m, Sample::Scalar(30.), at(10)).unwrap();
        assert_eq!(o.result.value, Some(2.));
        assert_eq!(o.result.label, "log_flushes_per_sec");
    }

    #[test]
    fn mismatched_sample_is_a_row_shape_error() {
        let mut c = check("", "");
        let err = c
            .evaluate(metric("pagereads"), Sample::Pair { numerator: 1., denominator: 2. }, at(0))
            .unwrap_err();
        assert!(matches!(err, ProbeError::RowShape { metric: "pagereads", .. }));
    }

    #[test]
    fn connect_time() {
        let mut c = check("1", "5");
        let o = c
            .evaluate(metric("time2connect"), Sample::Scalar(2.5), at(0))
            .unwrap();
        assert_eq!(o.severity, Severity::Warning);
        assert_eq!(o.to_string(), "WARNING: Time to connect was 2.5s|time=2.5s;1;5;;");
    }

    #[test]
    fn modes_needing_state() {
        assert!(Mode::Test.needs_state());
        assert!(Mode::Metric(metric("pagereads")).needs_state());
        assert!(!Mode::Metric(metric("cachehit")).needs_state());
        assert!(!Mode::Metric(metric("time2connect")).needs_state());
    }

    #[test]
    fn test_report() {
        let mut report = TestReport::default();
        let mut c = check("", "");
        report.record("connections", c.evaluate(metric("connections"), Sample::Scalar(1.), at(0)));
        report.record(
            "cpu",
            Err(ProbeError::RowShape {
                metric: "cpu",
                detail: "no rows".into(),
            }),
        );
        assert_eq!(report.exit_code(), UNKNOWN_EXIT_CODE);
        assert_eq!(
            report.to_string(),
            "connections passed!\ncpu failed with: cpu query returned no rows\n1/2 tests failed."
        );
    }
}
