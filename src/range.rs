//! Express Nagios threshold ranges on metric values.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::status::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("improper warning/critical format {spec:?}: expected N, N:, ~:N, N:M or @N:M")]
pub struct InvalidRangeSpec {
    pub spec: String,
}

/// Alerting range parsed from a `-w`/`-c` argument.
///
/// | spec   | alerts when           |
/// |--------|-----------------------|
/// | `N`    | `v > N` or `v < 0`    |
/// | `N:`   | `v < N`               |
/// | `~:N`  | `v > N`               |
/// | `N:M`  | `v < N` or `v > M`    |
/// | `@N:M` | `N <= v <= M`         |
///
/// The empty spec bounds nothing and never alerts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Range {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub inverted: bool,
}

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        const NUM: &str = r"-?[0-9]+(?:\.[0-9]+)?";
        Regex::new(&format!(
            r"^(?:(?P<max>{NUM})|(?P<min>{NUM}):|~:(?P<below>{NUM})|(?P<lo>{NUM}):(?P<hi>{NUM})|@(?P<in_lo>{NUM}):(?P<in_hi>{NUM}))$"
        ))
        .expect("range grammar is a valid regex")
    })
}

impl Range {
    /// A range that never alerts.
    pub const fn unbounded() -> Self {
        Self {
            lower: None,
            upper: None,
            inverted: false,
        }
    }

    pub fn parse(spec: &str) -> Result<Self, InvalidRangeSpec> {
        if spec.is_empty() {
            return Ok(Self::unbounded());
        }

        let invalid = || InvalidRangeSpec {
            spec: spec.to_owned(),
        };
        let caps = grammar().captures(spec).ok_or_else(invalid)?;
        // the pattern only admits strings f64 accepts
        let num = |name: &str| -> Result<Option<f64>, InvalidRangeSpec> {
            caps.name(name)
                .map(|m| m.as_str().parse::<f64>().map_err(|_| invalid()))
                .transpose()
        };

        let range = if let Some(max) = num("max")? {
            Self {
                lower: Some(0.),
                upper: Some(max),
                inverted: false,
            }
        } else if let Some(min) = num("min")? {
            Self {
                lower: Some(min),
                upper: None,
                inverted: false,
            }
        } else if let Some(below) = num("below")? {
            Self {
                lower: None,
                upper: Some(below),
                inverted: false,
            }
        } else if let (Some(lo), Some(hi)) = (num("lo")?, num("hi")?) {
            Self {
                lower: Some(lo),
                upper: Some(hi),
                inverted: false,
            }
        } else if let (Some(lo), Some(hi)) = (num("in_lo")?, num("in_hi")?) {
            Self {
                lower: Some(lo),
                upper: Some(hi),
                inverted: true,
            }
        } else {
            return Err(invalid());
        };

        Ok(range)
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether `value` should alert. `invert` negates the answer.
    pub fn evaluate(&self, value: f64, invert: bool) -> bool {
        if self.is_unbounded() {
            return false;
        }

        let outside = self.lower.map_or(false, |lower| value < lower)
            || self.upper.map_or(false, |upper| value > upper);
        (outside != self.inverted) != invert
    }
}

impl FromStr for Range {
    type Err = InvalidRangeSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.lower, self.upper, self.inverted) {
            (None, None, _) => Ok(()),
            (Some(lower), Some(upper), false) if lower == 0. => write!(f, "{upper}"),
            (lower, upper, inverted) => {
                if inverted {
                    f.write_str("@")?;
                }
                match lower {
                    Some(lower) => write!(f, "{lower}:")?,
                    None => f.write_str("~:")?,
                }
                match upper {
                    Some(upper) => write!(f, "{upper}"),
                    None => Ok(()),
                }
            }
        }
    }
}

/// The warning and critical ranges of one check.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Thresholds {
    pub warning: Range,
    pub critical: Range,
    /// Negate both evaluations: lower values are worse.
    pub invert: bool,
}

impl Thresholds {
    /// Parse both ranges. Absent specs never alert.
    ///
    /// When both ranges only cap the value from above (`N` or `~:N`) and the
    /// critical cap is below the warning cap, lower values are taken to be
    /// worse and the comparison is inverted.
    pub fn parse(warning: Option<&str>, critical: Option<&str>) -> Result<Self, InvalidRangeSpec> {
        let warning = Range::parse(warning.unwrap_or_default())?;
        let critical = Range::parse(critical.unwrap_or_default())?;
        let invert = match (upper_cap(&warning), upper_cap(&critical)) {
            (Some(warn), Some(crit)) => crit < warn,
            _ => false,
        };

        Ok(Self {
            warning,
            critical,
            invert,
        })
    }

    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert |= invert;
        self
    }

    /// Critical wins over warning. A missing value never alerts.
    pub fn classify(&self, value: Option<f64>) -> Severity {
        let Some(value) = value else {
            return Severity::Ok;
        };

        if self.critical.evaluate(value, self.invert) {
            Severity::Critical
        } else if self.warning.evaluate(value, self.invert) {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }
}

fn upper_cap(range: &Range) -> Option<f64> {
    let capped_only = !range.inverted && range.lower.map_or(true, |lower| lower == 0.);
    range.upper.filter(|_| capped_only)
}
