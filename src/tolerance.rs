//! Tolerance engine
//!
//! Evaluates a [`Reading`] against the configured per-channel bounds and
//! produces the list of violations. Evaluation is a pure function: the
//! bounds are fetched by the caller and handed in for every reading.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Channel, Reading};

/// Bounds for every channel that has a tolerance configured
pub type Tolerances = BTreeMap<Channel, ToleranceSpec>;

/// Rejected tolerance bounds
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Neither `min` nor `max` is set
    NoBounds,

    /// `min` is greater than `max`
    InvertedBounds { min: f64, max: f64 },

    /// A bound is NaN or infinite
    NonFiniteBound(f64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoBounds => write!(f, "tolerance has neither a minimum nor a maximum"),
            ConfigError::InvertedBounds { min, max } => {
                write!(f, "tolerance minimum {min} is greater than maximum {max}")
            }
            ConfigError::NonFiniteBound(value) => {
                write!(f, "tolerance bound {value} is not a finite number")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Per-channel safety bound. At least one side is always present and
/// `min <= max` holds when both are.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawToleranceSpec", into = "RawToleranceSpec")]
pub struct ToleranceSpec {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawToleranceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
}

impl TryFrom<RawToleranceSpec> for ToleranceSpec {
    type Error = ConfigError;

    fn try_from(raw: RawToleranceSpec) -> Result<Self, Self::Error> {
        ToleranceSpec::new(raw.min, raw.max)
    }
}

impl From<ToleranceSpec> for RawToleranceSpec {
    fn from(spec: ToleranceSpec) -> Self {
        RawToleranceSpec {
            min: spec.min,
            max: spec.max,
        }
    }
}

impl ToleranceSpec {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, ConfigError> {
        for bound in [min, max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(ConfigError::NonFiniteBound(bound));
            }
        }

        match (min, max) {
            (None, None) => Err(ConfigError::NoBounds),
            (Some(min), Some(max)) if min > max => Err(ConfigError::InvertedBounds { min, max }),
            _ => Ok(Self { min, max }),
        }
    }

    pub fn range(min: f64, max: f64) -> Result<Self, ConfigError> {
        Self::new(Some(min), Some(max))
    }

    pub fn at_least(min: f64) -> Result<Self, ConfigError> {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: f64) -> Result<Self, ConfigError> {
        Self::new(None, Some(max))
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Check a single value against this bound
    pub fn check(&self, value: f64) -> Option<Violation> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => {
                (value < min || value > max).then_some(Violation::OutOfRange { min, max })
            }
            (Some(min), None) => (value < min).then_some(Violation::BelowMinimum { min }),
            (None, Some(max)) => (value > max).then_some(Violation::AboveMaximum { max }),
            (None, None) => None,
        }
    }
}

/// The bound a value violated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Violation {
    OutOfRange { min: f64, max: f64 },
    BelowMinimum { min: f64 },
    AboveMaximum { max: f64 },
}

/// One channel value outside its tolerance
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub channel: Channel,
    pub value: f64,
    pub violation: Violation,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Alert {
            channel, value, ..
        } = self;
        match self.violation {
            Violation::OutOfRange { min, max } => write!(
                f,
                "{channel} is out of range: {value} (safe range: {min}-{max})"
            ),
            Violation::BelowMinimum { min } => {
                write!(f, "{channel} is below minimum: {value} (minimum: {min})")
            }
            Violation::AboveMaximum { max } => {
                write!(f, "{channel} is above maximum: {value} (maximum: {max})")
            }
        }
    }
}

/// Result of evaluating one reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Violations in canonical channel order
    pub alerts: Vec<Alert>,

    /// Channels present in the reading without a configured tolerance
    pub unchecked: Vec<Channel>,
}

impl Evaluation {
    pub fn has_alerts(&self) -> bool {
        !self.alerts.is_empty()
    }

    /// Rendered alert lines, one per violation
    pub fn lines(&self) -> Vec<String> {
        self.alerts.iter().map(ToString::to_string).collect()
    }
}

/// Evaluate a reading against the given tolerances.
///
/// Not-available values are skipped. Channels without a tolerance are
/// reported in [`Evaluation::unchecked`] and never produce alerts.
pub fn evaluate(reading: &Reading, tolerances: &Tolerances) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for (&channel, &value) in &reading.values {
        let Some(spec) = tolerances.get(&channel) else {
            evaluation.unchecked.push(channel);
            continue;
        };

        let Some(value) = value else {
            continue;
        };

        if let Some(violation) = spec.check(value) {
            evaluation.alerts.push(Alert {
                channel,
                value,
                violation,
            });
        }
    }

    evaluation
}
