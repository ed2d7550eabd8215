//! Calibration priors and the constraint-line parser.
//!
//! A constraint line names one node and a time bound:
//!
//! | line          | prior          |
//! |---------------|----------------|
//! | `name:T`      | `U(T)`         |
//! | `name:<T`     | `U(T)`         |
//! | `name:>T`     | `L(T)`         |
//! | `name:T1-T2`  | `B(T1, T2)`    |

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use tracing::{debug, instrument};

use crate::domain::error::DomainError;
use crate::domain::DomainResult;

/// Time prior attached to a calibrated node, rendered in estimator syntax.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    /// Uniform over (0, T)
    Upper(f64),
    /// Lower-bounded over (T, inf)
    Lower(f64),
    /// Bounded over (T1, T2)
    Bounded(f64, f64),
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Upper(t) => write!(f, "U({})", t),
            Prior::Lower(t) => write!(f, "L({})", t),
            Prior::Bounded(lower, upper) => write!(f, "B({}, {})", lower, upper),
        }
    }
}

/// A prior bound to a node name.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub node: String,
    pub prior: Prior,
}

/// Ordered constraint patterns; the first match wins.
pub struct CalibrationParser {
    exact: Regex,
    upper: Regex,
    lower: Regex,
    bounded: Regex,
}

impl Default for CalibrationParser {
    fn default() -> Self {
        Self::new()
    }
}

const NODE: &str = r"(?P<node>[^:\s]+)";
const TIME: &str = r"\d+(?:\.\d+)?";

impl CalibrationParser {
    pub fn new() -> Self {
        let pattern = |body: String| Regex::new(&format!("^{}:{}$", NODE, body)).unwrap();
        Self {
            exact: pattern(format!("(?P<t>{})", TIME)),
            upper: pattern(format!("<(?P<t>{})", TIME)),
            lower: pattern(format!(">(?P<t>{})", TIME)),
            bounded: pattern(format!("(?P<t1>{})-(?P<t2>{})", TIME, TIME)),
        }
    }

    /// Parse one constraint line.
    pub fn parse_line(&self, line: &str) -> DomainResult<Calibration> {
        let line = line.trim();
        let format_error = || DomainError::CalibrationFormat {
            line: line.to_string(),
        };

        let (caps, prior) = if let Some(caps) = self.exact.captures(line) {
            let t = time(&caps["t"]).ok_or_else(format_error)?;
            (caps, Prior::Upper(t))
        } else if let Some(caps) = self.upper.captures(line) {
            let t = time(&caps["t"]).ok_or_else(format_error)?;
            (caps, Prior::Upper(t))
        } else if let Some(caps) = self.lower.captures(line) {
            let t = time(&caps["t"]).ok_or_else(format_error)?;
            (caps, Prior::Lower(t))
        } else if let Some(caps) = self.bounded.captures(line) {
            let lower = time(&caps["t1"]).ok_or_else(format_error)?;
            let upper = time(&caps["t2"]).ok_or_else(format_error)?;
            (caps, Prior::Bounded(lower, upper))
        } else {
            return Err(format_error());
        };

        Ok(Calibration {
            node: caps["node"].to_string(),
            prior,
        })
    }

    /// Parse all constraint lines, failing on the first bad one.
    ///
    /// Blank lines are skipped. A node named twice is rejected.
    #[instrument(level = "debug", skip(self, lines))]
    pub fn parse_lines<S: AsRef<str>>(&self, lines: &[S]) -> DomainResult<Vec<Calibration>> {
        let mut seen = HashSet::new();
        let mut calibrations = Vec::new();
        for line in lines.iter().map(AsRef::as_ref) {
            if line.trim().is_empty() {
                continue;
            }
            let calibration = self.parse_line(line)?;
            if !seen.insert(calibration.node.clone()) {
                return Err(DomainError::DuplicateCalibration(calibration.node));
            }
            debug!("calibration {} -> {}", calibration.node, calibration.prior);
            calibrations.push(calibration);
        }
        Ok(calibrations)
    }
}

fn time(s: &str) -> Option<f64> {
    s.parse::<f64>().ok()
}
