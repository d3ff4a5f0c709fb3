//! Shield Controller
//!
//! Entry point for the request-handling layer: resolves the caller's roles,
//! prices the request through the [`CostCalculator`] and charges the cost
//! against the user's account.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::account::UserStats;
use super::cost::Cost;
use super::dashboard::DashboardData;
use super::error::{ShieldError, ShieldResult};
use super::quota::Quota;
use super::registry::{ReaperHandle, UserRegistry};
use super::rules::{CostCalculator, EndpointRules};
use crate::config::Config;
use crate::metrics;

/// Cost-based admission controller
#[derive(Clone)]
pub struct Shield {
    /// Role id -> quota, swapped as a whole on reload
    quotas: Arc<RwLock<HashMap<String, Arc<Quota>>>>,

    /// Request pricing
    calculator: Arc<dyn CostCalculator>,

    /// Per-user accounting
    registry: Arc<UserRegistry>,
}

impl Shield {
    /// Create a shield; each quota takes its id from the map key
    pub fn new(
        quotas: HashMap<String, Quota>,
        calculator: Arc<dyn CostCalculator>,
        registry: Arc<UserRegistry>,
    ) -> Self {
        Self {
            quotas: Arc::new(RwLock::new(index_quotas(quotas))),
            calculator,
            registry,
        }
    }

    /// Build from a loaded configuration, pricing with its endpoint rules
    pub fn from_config(config: &Config) -> Self {
        let registry = UserRegistry::with_settings(config.window_sizes(), config.stale_after());
        Self::new(
            config.roles.clone(),
            Arc::new(EndpointRules::new(config.endpoints.clone())),
            Arc::new(registry),
        )
    }

    /// Resolve role ids to quotas, in the order given
    pub fn resolve_quotas(&self, role_ids: &[String]) -> ShieldResult<Vec<Arc<Quota>>> {
        if role_ids.is_empty() {
            return Err(ShieldError::InvalidInput("no role ids given".to_string()));
        }
        let quotas = self.quotas.read();
        role_ids
            .iter()
            .map(|id| {
                quotas
                    .get(id)
                    .cloned()
                    .ok_or_else(|| ShieldError::UnknownRole(id.clone()))
            })
            .collect()
    }

    /// Price a request without touching any account.
    ///
    /// Only returns `stop` when the pricing rules refuse the request outright.
    pub fn peek_cost(
        &self,
        endpoint_ids: &[String],
        role_ids: &[String],
        request: &[(String, String)],
    ) -> ShieldResult<Cost> {
        self.resolve_quotas(role_ids)
            .and_then(|_| self.calculator.compute_cost(endpoint_ids, request))
            .inspect_err(record_error)
    }

    /// Price a request and charge it to `user_id` if any of the roles allows it.
    ///
    /// A quota denial is not an error: the returned cost carries `stop`, the
    /// computed amounts and the reason.
    pub fn calculate_and_add_cost(
        &self,
        endpoint_ids: &[String],
        user_id: &str,
        role_ids: &[String],
        request: &[(String, String)],
    ) -> ShieldResult<Cost> {
        self.calculate_and_add_cost_at(endpoint_ids, user_id, role_ids, request, Instant::now())
    }

    /// [`calculate_and_add_cost`](Self::calculate_and_add_cost) at an explicit instant
    pub fn calculate_and_add_cost_at(
        &self,
        endpoint_ids: &[String],
        user_id: &str,
        role_ids: &[String],
        request: &[(String, String)],
        now: Instant,
    ) -> ShieldResult<Cost> {
        self.admit(endpoint_ids, user_id, role_ids, request, now)
            .inspect_err(record_error)
    }

    fn admit(
        &self,
        endpoint_ids: &[String],
        user_id: &str,
        role_ids: &[String],
        request: &[(String, String)],
        now: Instant,
    ) -> ShieldResult<Cost> {
        if user_id.is_empty() {
            return Err(ShieldError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }
        let quotas = self.resolve_quotas(role_ids)?;

        let cost = self.calculator.compute_cost(endpoint_ids, request)?;
        if cost.is_stop() {
            metrics::HARD_STOPS_TOTAL.inc();
            tracing::warn!(
                user_id = %user_id,
                reason = cost.message.as_deref().unwrap_or(""),
                "Request refused by pricing rules"
            );
            return Ok(cost);
        }

        let total = cost.total();
        let verdict = self
            .registry
            .with_account(user_id, now, |account| {
                account.check_and_charge(&quotas, total, now)
            })??;

        match verdict {
            None => {
                metrics::REQUESTS_ADMITTED_TOTAL.inc();
                metrics::REQUEST_COST.observe(total);
                tracing::debug!(user_id = %user_id, cost = total, "Request admitted");
                Ok(cost)
            }
            Some(denial) => {
                metrics::REQUESTS_DENIED_TOTAL
                    .with_label_values(&[denial.reason.as_str()])
                    .inc();
                tracing::info!(
                    user_id = %user_id,
                    role = %denial.quota_id,
                    reason = denial.reason.as_str(),
                    cost = total,
                    "Request denied by quota"
                );
                Ok(cost.stop_with(denial.to_string()))
            }
        }
    }

    /// Replace the role table, e.g. after a configuration reload
    pub fn reload_quotas(&self, quotas: HashMap<String, Quota>) -> Result<()> {
        let indexed = index_quotas(quotas);
        for quota in indexed.values() {
            quota.validate()?;
        }
        let count = indexed.len();
        *self.quotas.write() = indexed;
        tracing::info!(roles = count, "Reloaded role quotas");
        Ok(())
    }

    /// Configured role ids, sorted
    pub fn role_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.quotas.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Usage of one user, if tracked
    pub fn user_stats(&self, user_id: &str) -> Option<UserStats> {
        self.registry.user_stats(user_id, Instant::now())
    }

    /// Snapshot of every tracked account
    pub fn dashboard(&self) -> DashboardData {
        DashboardData::from_stats(self.registry.all_stats(Instant::now()), self.role_ids())
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    /// Start reclaiming idle accounts every `interval`
    pub fn start_reaper(&self, interval: Duration) -> ReaperHandle {
        self.registry.clone().spawn_reaper(interval)
    }
}

fn index_quotas(quotas: HashMap<String, Quota>) -> HashMap<String, Arc<Quota>> {
    quotas
        .into_iter()
        .map(|(id, mut quota)| {
            quota.id = id.clone();
            (id, Arc::new(quota))
        })
        .collect()
}

fn record_error(error: &ShieldError) {
    metrics::REQUEST_ERRORS_TOTAL
        .with_label_values(&[error.kind()])
        .inc();
    tracing::warn!(kind = error.kind(), "Shield request failed: {}", error);
}
