//! Monitoring Snapshot
//!
//! Point-in-time view of every tracked account, for admin tooling and the
//! CLI's JSON output.

use serde::{Deserialize, Serialize};

use super::account::UserStats;

/// Snapshot of the shield's accounting state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Summary statistics
    pub summary: ShieldSummary,

    /// Per-user statistics, most expensive first
    pub users: Vec<UserStats>,

    /// Configured role ids
    pub roles: Vec<String>,
}

/// Totals across all tracked users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShieldSummary {
    pub tracked_users: usize,
    pub total_lifetime_cost: f64,
    pub total_lifetime_calls: u64,
    /// User with the highest cost in the long window
    pub busiest_user: Option<String>,
}

impl DashboardData {
    pub fn from_stats(mut users: Vec<UserStats>, roles: Vec<String>) -> Self {
        users.sort_by(|a, b| b.lifetime_cost.total_cmp(&a.lifetime_cost));

        let busiest_user = users
            .iter()
            .filter(|u| u.long_window_calls > 0)
            .max_by(|a, b| a.long_window_cost.total_cmp(&b.long_window_cost))
            .map(|u| u.user_id.clone());

        let summary = ShieldSummary {
            tracked_users: users.len(),
            total_lifetime_cost: users.iter().map(|u| u.lifetime_cost).sum(),
            total_lifetime_calls: users.iter().map(|u| u.lifetime_calls).sum(),
            busiest_user,
        };

        Self {
            timestamp: chrono::Utc::now(),
            summary,
            users,
            roles,
        }
    }
}
