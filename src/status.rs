//! Check results and their Nagios plugin rendering.

use std::fmt;

use crate::range::Thresholds;

/// Exit code for errors and usage problems.
pub const UNKNOWN_EXIT_CODE: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The value a check classifies. `value` is `None` until a rate metric has a
/// baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricResult {
    pub value: Option<f64>,
    pub unit: &'static str,
    pub label: &'static str,
}

/// A classified metric, ready to print.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub severity: Severity,
    pub result: MetricResult,
    /// Status text with a `{}` placeholder for the value.
    pub summary: &'static str,
    pub thresholds: Thresholds,
}

impl Outcome {
    pub fn new(summary: &'static str, result: MetricResult, thresholds: Thresholds) -> Self {
        Self {
            severity: thresholds.classify(result.value),
            result,
            summary,
            thresholds,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.severity.exit_code()
    }
}

/// Value for the status text: three decimals, unless that would turn a
/// non-zero value into 0.
fn format_summary_value(value: f64) -> String {
    let rounded = (value * 1000.).round() / 1000.;
    if rounded == 0. && value != 0. {
        format!("{value}")
    } else {
        format!("{rounded}")
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let MetricResult { value, unit, label } = &self.result;
        let (shown, perf) = match value {
            Some(v) => (format_summary_value(*v), format!("{v}{unit}")),
            None => (
                "unavailable (first sample recorded)".to_owned(),
                "U".to_owned(),
            ),
        };
        write!(
            f,
            "{}: {}|{}={};{};{};;",
            self.severity,
            self.summary.replacen("{}", &shown, 1),
            label,
            perf,
            self.thresholds.warning,
            self.thresholds.critical,
        )
    }
}
