//! Optimization targets and their parameter spaces.
//!
//! Each target has a fixed, ordered list of bounded dimensions. The order is
//! the column order of the persisted history and the order of every
//! parameter vector passed around the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, OptimizerError, ValidationError};

/// Which optimization problem is being solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Per-Pomodoro work and break durations
    Round,
    /// Aggregate session shape (total work, long break, round count)
    Session,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Round => "round",
            Target::Session => "session",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round" => Ok(Target::Round),
            "session" => Ok(Target::Session),
            _ => Err(ConfigError::UnknownTarget(s.to_string())),
        }
    }
}

/// Whether a dimension takes any real value or only integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Continuous,
    Integer,
}

/// One bounded parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub name: &'static str,
    pub low: f64,
    pub high: f64,
    pub kind: ValueKind,
}

impl Dimension {
    const fn continuous(name: &'static str, low: f64, high: f64) -> Self {
        Self {
            name,
            low,
            high,
            kind: ValueKind::Continuous,
        }
    }

    const fn integer(name: &'static str, low: f64, high: f64) -> Self {
        Self {
            name,
            low,
            high,
            kind: ValueKind::Integer,
        }
    }

    pub fn width(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.low && value <= self.high
    }

    /// Clamp into bounds and round integer dimensions.
    pub fn snap(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.low, self.high);
        match self.kind {
            ValueKind::Continuous => clamped,
            ValueKind::Integer => clamped.round().clamp(self.low, self.high),
        }
    }
}

static ROUND_DIMENSIONS: [Dimension; 2] = [
    Dimension::continuous("work_time", 15.0, 60.0),
    Dimension::continuous("break_time", 3.0, 20.0),
];

static SESSION_DIMENSIONS: [Dimension; 3] = [
    Dimension::continuous("total_work_time", 60.0, 480.0),
    Dimension::continuous("session_break_time", 10.0, 60.0),
    Dimension::integer("number_of_round", 1.0, 8.0),
];

/// Fixed parameter space of one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpace {
    target: Target,
    dimensions: &'static [Dimension],
    outcome_column: &'static str,
    baseline: &'static [f64],
}

impl ParameterSpace {
    pub fn for_target(target: Target) -> Self {
        match target {
            Target::Round => Self {
                target,
                dimensions: &ROUND_DIMENSIONS,
                outcome_column: "focus_score",
                // Classic 25/5 Pomodoro
                baseline: &[25.0, 5.0],
            },
            Target::Session => Self {
                target,
                dimensions: &SESSION_DIMENSIONS,
                outcome_column: "average_focus_score",
                // Four 25 minute rounds followed by a 15 minute long break
                baseline: &[100.0, 15.0, 4.0],
            },
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn dimensions(&self) -> &[Dimension] {
        self.dimensions
    }

    pub fn arity(&self) -> usize {
        self.dimensions.len()
    }

    pub fn outcome_column(&self) -> &'static str {
        self.outcome_column
    }

    /// Parameters assumed for a score reported without a pending proposal.
    pub fn baseline(&self) -> Vec<f64> {
        self.baseline.to_vec()
    }

    /// Parameter column names followed by the outcome column.
    pub fn columns(&self) -> Vec<&'static str> {
        self.dimensions
            .iter()
            .map(|d| d.name)
            .chain(std::iter::once(self.outcome_column))
            .collect()
    }

    pub fn check_arity(&self, values: &[f64]) -> Result<(), OptimizerError> {
        if values.len() != self.arity() {
            return Err(OptimizerError::DimensionMismatch {
                expected: self.arity(),
                found: values.len(),
            });
        }
        Ok(())
    }

    pub fn contains(&self, values: &[f64]) -> bool {
        values.len() == self.arity()
            && self
                .dimensions
                .iter()
                .zip(values)
                .all(|(d, v)| d.contains(*v))
    }

    /// Check arity and bounds, reporting the first offending dimension.
    pub fn validate(&self, values: &[f64]) -> Result<(), crate::error::HistoryError> {
        self.check_arity(values)?;
        for (d, &value) in self.dimensions.iter().zip(values) {
            if !d.contains(value) {
                return Err(ValidationError::OutOfBounds {
                    name: d.name.to_string(),
                    value,
                    low: d.low,
                    high: d.high,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn snap(&self, values: &mut [f64]) {
        for (d, v) in self.dimensions.iter().zip(values.iter_mut()) {
            *v = d.snap(*v);
        }
    }

    /// Map a point of the space into the unit hypercube.
    pub fn to_unit(&self, values: &[f64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(values)
            .map(|(d, v)| (v - d.low) / d.width())
            .collect()
    }

    /// Map a unit-hypercube point back into the space (not snapped).
    pub fn from_unit(&self, unit: &[f64]) -> Vec<f64> {
        self.dimensions
            .iter()
            .zip(unit)
            .map(|(d, u)| d.low + u.clamp(0.0, 1.0) * d.width())
            .collect()
    }

    /// Pair each value with its dimension name.
    pub fn named(&self, values: &[f64]) -> Vec<(&'static str, f64)> {
        self.dimensions
            .iter()
            .map(|d| d.name)
            .zip(values.iter().copied())
            .collect()
    }
}
