//! Quota Types and Denials
//!
//! A [`Quota`] is the allowance granted by a role. Evaluating an account
//! against a quota either admits the cost or yields a [`Denial`].

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cost::{Action, Cost};

/// Limits granted by a role. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Role identifier, e.g. "anonymous", "researcher"
    #[serde(default)]
    pub id: String,

    /// Maximum cost of a single request
    pub single_call_max_cost: f64,

    /// Maximum accumulated cost inside the short window
    pub short_window_max_cost: f64,

    /// Maximum number of calls inside the short window
    pub short_window_max_calls: u64,

    /// Maximum accumulated cost inside the long window
    pub long_window_max_cost: f64,

    /// Maximum number of calls inside the long window
    pub long_window_max_calls: u64,
}

impl Quota {
    /// Quota that never denies
    pub fn unlimited(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            single_call_max_cost: f64::INFINITY,
            short_window_max_cost: f64::INFINITY,
            short_window_max_calls: u64::MAX,
            long_window_max_cost: f64::INFINITY,
            long_window_max_calls: u64::MAX,
        }
    }

    /// Reject limits that cannot be compared meaningfully
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            anyhow::bail!("Role id must not be empty");
        }
        let limits = [
            ("single_call_max_cost", self.single_call_max_cost),
            ("short_window_max_cost", self.short_window_max_cost),
            ("long_window_max_cost", self.long_window_max_cost),
        ];
        for (name, value) in limits {
            if value.is_nan() || value < 0.0 {
                anyhow::bail!("Role '{}' has invalid {}: {}", self.id, name, value);
            }
        }
        Ok(())
    }
}

/// Which limit of a quota was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    SingleCallCost,
    ShortWindowCost,
    ShortWindowCalls,
    LongWindowCost,
    LongWindowCalls,
}

impl DenialReason {
    /// Stable, human readable label
    pub fn label(&self) -> &'static str {
        match self {
            DenialReason::SingleCallCost => "single-call cost exceeds allowance",
            DenialReason::ShortWindowCost => "short-window cost allowance exceeded",
            DenialReason::ShortWindowCalls => "short-window call-count allowance exceeded",
            DenialReason::LongWindowCost => "long-window cost allowance exceeded",
            DenialReason::LongWindowCalls => "long-window call-count allowance exceeded",
        }
    }

    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::SingleCallCost => "single_call_cost",
            DenialReason::ShortWindowCost => "short_window_cost",
            DenialReason::ShortWindowCalls => "short_window_calls",
            DenialReason::LongWindowCost => "long_window_cost",
            DenialReason::LongWindowCalls => "long_window_calls",
        }
    }

    fn is_call_count(&self) -> bool {
        matches!(
            self,
            DenialReason::ShortWindowCalls | DenialReason::LongWindowCalls
        )
    }
}

/// A quota refusing a cost
#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    /// Role whose quota denied
    pub quota_id: String,

    /// Limit that was hit
    pub reason: DenialReason,

    /// Cost or call count the request would have reached
    pub attempted: f64,

    /// The limit itself
    pub allowance: f64,
}

impl Denial {
    pub fn new(quota_id: &str, reason: DenialReason, attempted: f64, allowance: f64) -> Self {
        Self {
            quota_id: quota_id.to_string(),
            reason,
            attempted,
            allowance,
        }
    }

    /// How far past the allowance the request would go
    pub fn overage(&self) -> f64 {
        self.attempted - self.allowance
    }

    /// Stop cost whose total is the overage, for cheapest-denial selection
    pub fn to_cost(&self) -> Cost {
        Cost::new(Action::Stop, self.overage(), 1.0, Some(self.to_string()))
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_call_count() {
            write!(
                f,
                "{}: {} calls would exceed the allowance of {} calls from role '{}'",
                self.reason.label(),
                self.attempted,
                self.allowance,
                self.quota_id
            )
        } else {
            write!(
                f,
                "{}: cost {:.0} would exceed the allowance of {:.0} from role '{}'",
                self.reason.label(),
                self.attempted,
                self.allowance,
                self.quota_id
            )
        }
    }
}
