//! Cost Algebra
//!
//! The cost of a request, or of a part of a request, lives on a unit-less
//! internal scale. A [`Cost`] keeps `base` and `multiplier` apart so that the
//! partial costs produced by many endpoints and arguments can be merged before
//! the final `base * multiplier` is taken.
//!
//! `Cost` is immutable: every operation returns a new value.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;

/// Verdict carried by a cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The request may proceed
    #[default]
    Go,
    /// The request must not reach the backend
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Go => write!(f, "go"),
            Action::Stop => write!(f, "stop"),
        }
    }
}

/// Cost of a request: `base * multiplier` plus a verdict.
///
/// In configuration files the keys `add` and `multiply` are accepted as
/// aliases for `base` and `multiplier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    /// Verdict
    #[serde(default)]
    pub action: Action,

    /// Additive part
    #[serde(default, alias = "add")]
    pub base: f64,

    /// Multiplicative part
    #[serde(default = "default_multiplier", alias = "multiply")]
    pub multiplier: f64,

    /// Reason for a stop, or extra information for the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Cost {
    /// Identity element for [`Cost::merge`]
    pub const NEUTRAL: Cost = Cost {
        action: Action::Go,
        base: 0.0,
        multiplier: 1.0,
        message: None,
    };

    /// Fully specified cost
    pub fn new(action: Action, base: f64, multiplier: f64, message: Option<String>) -> Self {
        Self {
            action,
            base,
            multiplier,
            message,
        }
    }

    /// Plain `go` cost with multiplier 1
    pub fn go(base: f64) -> Self {
        Self::new(Action::Go, base, 1.0, None)
    }

    /// Plain `go` cost with an explicit multiplier
    pub fn with_multiplier(base: f64, multiplier: f64) -> Self {
        Self::new(Action::Go, base, multiplier, None)
    }

    /// Zero-cost `stop` with a reason
    pub fn stop(message: impl Into<String>) -> Self {
        Self::new(Action::Stop, 0.0, 1.0, Some(message.into()))
    }

    /// `base * multiplier`
    pub fn total(&self) -> f64 {
        self.base * self.multiplier
    }

    pub fn is_stop(&self) -> bool {
        self.action == Action::Stop
    }

    /// Combine two partial costs.
    ///
    /// `stop` dominates, bases add up, multipliers multiply and messages are
    /// joined with a newline in call order (`self` first). The operation is
    /// associative, but message order makes it non-commutative.
    pub fn merge(&self, other: &Cost) -> Cost {
        let action = if self.is_stop() || other.is_stop() {
            Action::Stop
        } else {
            Action::Go
        };
        let message = match (&self.message, &other.message) {
            (None, None) => None,
            (Some(m), None) | (None, Some(m)) => Some(m.clone()),
            (Some(a), Some(b)) => Some(format!("{}\n{}", a, b)),
        };
        Cost::new(
            action,
            self.base + other.base,
            self.multiplier * other.multiplier,
            message,
        )
    }

    /// Same base and multiplier, forced to `stop` with the given reason
    pub fn stop_with(&self, message: impl Into<String>) -> Cost {
        Cost::new(Action::Stop, self.base, self.multiplier, Some(message.into()))
    }

    /// Order costs by leniency: `go` before `stop`, then lower total first.
    pub fn compare(&self, other: &Cost) -> Ordering {
        match (self.action, other.action) {
            (Action::Go, Action::Stop) => Ordering::Less,
            (Action::Stop, Action::Go) => Ordering::Greater,
            _ => self.total().total_cmp(&other.total()),
        }
    }

    /// The cheaper of two costs; `first` wins ties.
    pub fn cheaper(first: Cost, second: Cost) -> Cost {
        if first.compare(&second) != Ordering::Greater {
            first
        } else {
            second
        }
    }
}

impl Default for Cost {
    fn default() -> Self {
        Cost::NEUTRAL
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({} x {})",
            self.action,
            self.total(),
            self.base,
            self.multiplier
        )?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Cost>>(iter: I) -> Self {
        iter.fold(Cost::NEUTRAL, |acc, cost| acc.merge(&cost))
    }
}

impl<'a> Sum<&'a Cost> for Cost {
    fn sum<I: Iterator<Item = &'a Cost>>(iter: I) -> Self {
        iter.fold(Cost::NEUTRAL, |acc, cost| acc.merge(cost))
    }
}
