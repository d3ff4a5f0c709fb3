//! Per-User Account
//!
//! Lifetime totals plus a short and a long [`TimeWindowCounter`]. The only
//! mutating entry point is [`UserAccount::check_and_charge`]; callers must
//! hold the account's exclusive region (see [`super::registry`]) for the
//! whole call so that the check and the charge are one atomic step.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{ShieldError, ShieldResult};
use super::quota::{Denial, DenialReason, Quota};
use super::window::{TimeWindowCounter, DEFAULT_LONG_WINDOW, DEFAULT_SHORT_WINDOW};

/// Durations of the two accounting windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSizes {
    pub short: Duration,
    pub long: Duration,
}

impl Default for WindowSizes {
    fn default() -> Self {
        Self {
            short: DEFAULT_SHORT_WINDOW,
            long: DEFAULT_LONG_WINDOW,
        }
    }
}

/// Usage snapshot of one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub lifetime_cost: f64,
    pub lifetime_calls: u64,
    /// Seconds since the last admitted request
    pub idle_secs: f64,
    pub short_window_cost: f64,
    pub short_window_calls: usize,
    pub long_window_cost: f64,
    pub long_window_calls: usize,
}

/// Accounting state of a single user
#[derive(Debug)]
pub struct UserAccount {
    id: String,
    lifetime_cost: f64,
    lifetime_calls: u64,
    last_activity: Instant,
    short_window: TimeWindowCounter,
    long_window: TimeWindowCounter,
    /// Set by the registry sweep once the account is unlinked
    pub(crate) retired: bool,
}

impl UserAccount {
    /// Fresh account; creation counts as activity
    pub fn new(id: impl Into<String>, windows: WindowSizes, now: Instant) -> Self {
        Self {
            id: id.into(),
            lifetime_cost: 0.0,
            lifetime_calls: 0,
            last_activity: now,
            short_window: TimeWindowCounter::new(windows.short),
            long_window: TimeWindowCounter::new(windows.long),
            retired: false,
        }
    }

    pub fn lifetime_cost(&self) -> f64 {
        self.lifetime_cost
    }

    pub fn lifetime_calls(&self) -> u64 {
        self.lifetime_calls
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Check `cost` against every quota and charge it if any quota admits.
    ///
    /// Quotas are tried in order and the first one that admits wins. When all
    /// of them deny nothing is mutated and the denial with the smallest
    /// overage is returned (ties go to the earlier quota).
    ///
    /// Overages are ranked on one scale: a call-count denial that is one call
    /// over competes directly with a cost denial that is one cost unit over.
    ///
    /// A cost that is NaN or infinite is rejected as invalid input.
    pub fn check_and_charge(
        &mut self,
        quotas: &[Arc<Quota>],
        cost: f64,
        now: Instant,
    ) -> ShieldResult<Option<Denial>> {
        if !cost.is_finite() {
            return Err(ShieldError::InvalidInput(format!(
                "cost {} charged to user '{}' is not a finite number",
                cost, self.id
            )));
        }
        if quotas.is_empty() {
            return Err(ShieldError::InvalidInput(format!(
                "no quotas given when charging user '{}'",
                self.id
            )));
        }

        // Callers read the clock before taking the lock, so a racing request
        // may carry an instant older than the newest sample.
        let now = now.max(self.last_activity);
        self.short_window.expire(now);
        self.long_window.expire(now);

        let mut cheapest: Option<Denial> = None;
        for quota in quotas {
            match self.evaluate(quota, cost) {
                None => {
                    self.charge(cost, now);
                    return Ok(None);
                }
                Some(denial) => {
                    cheapest = Some(match cheapest {
                        Some(best) if denial.to_cost().compare(&best.to_cost()).is_lt() => denial,
                        Some(best) => best,
                        None => denial,
                    });
                }
            }
        }

        cheapest.map(Some).ok_or_else(|| {
            ShieldError::InvariantViolation(format!(
                "every quota denied user '{}' but no denial was recorded",
                self.id
            ))
        })
    }

    /// Evaluate one quota against already expired windows
    fn evaluate(&self, quota: &Quota, cost: f64) -> Option<Denial> {
        if cost > quota.single_call_max_cost {
            return Some(Denial::new(
                &quota.id,
                DenialReason::SingleCallCost,
                cost,
                quota.single_call_max_cost,
            ));
        }
        check_window(
            &self.short_window,
            quota,
            cost,
            quota.short_window_max_cost,
            quota.short_window_max_calls,
            DenialReason::ShortWindowCost,
            DenialReason::ShortWindowCalls,
        )
        .or_else(|| {
            check_window(
                &self.long_window,
                quota,
                cost,
                quota.long_window_max_cost,
                quota.long_window_max_calls,
                DenialReason::LongWindowCost,
                DenialReason::LongWindowCalls,
            )
        })
    }

    fn charge(&mut self, cost: f64, now: Instant) {
        self.lifetime_cost += cost;
        self.lifetime_calls += 1;
        self.last_activity = now;
        self.short_window.add(cost, now);
        self.long_window.add(cost, now);
    }

    /// Snapshot of the account at `now`
    pub fn stats(&mut self, now: Instant) -> UserStats {
        UserStats {
            user_id: self.id.clone(),
            lifetime_cost: self.lifetime_cost,
            lifetime_calls: self.lifetime_calls,
            idle_secs: now.saturating_duration_since(self.last_activity).as_secs_f64(),
            short_window_cost: self.short_window.current_cost(now),
            short_window_calls: self.short_window.current_calls(now),
            long_window_cost: self.long_window.current_cost(now),
            long_window_calls: self.long_window.current_calls(now),
        }
    }
}

fn check_window(
    window: &TimeWindowCounter,
    quota: &Quota,
    cost: f64,
    max_cost: f64,
    max_calls: u64,
    cost_reason: DenialReason,
    calls_reason: DenialReason,
) -> Option<Denial> {
    let attempted_cost = window.cached_cost() + cost;
    if attempted_cost > max_cost {
        return Some(Denial::new(&quota.id, cost_reason, attempted_cost, max_cost));
    }
    let attempted_calls = window.cached_calls() as u64 + 1;
    if attempted_calls > max_calls {
        return Some(Denial::new(
            &quota.id,
            calls_reason,
            attempted_calls as f64,
            max_calls as f64,
        ));
    }
    None
}
