//! User Registry
//!
//! Owns every [`UserAccount`] and reclaims the ones that went idle.
//!
//! Each account sits behind its own mutex, so requests from different users
//! never wait on each other. Insertion goes through the map's atomic
//! insert-if-absent path. The sweep only removes accounts it can lock, and
//! marks them retired first: a request that looked the account up just before
//! the sweep sees the flag once it gets the lock and retries the lookup.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::account::{UserAccount, UserStats, WindowSizes};
use super::error::{ShieldError, ShieldResult};
use crate::metrics;

/// Idle time after which an account may be reclaimed (1 minute)
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Time between two background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Concurrent map from user id to account
#[derive(Debug)]
pub struct UserRegistry {
    users: DashMap<String, Arc<Mutex<UserAccount>>>,
    windows: WindowSizes,
    stale_after: Duration,
}

impl UserRegistry {
    /// Create a registry with default window sizes and staleness
    pub fn new() -> Self {
        Self::with_settings(WindowSizes::default(), DEFAULT_STALE_AFTER)
    }

    pub fn with_settings(windows: WindowSizes, stale_after: Duration) -> Self {
        Self {
            users: DashMap::new(),
            windows,
            stale_after,
        }
    }

    /// Run `f` inside the exclusive region of `user_id`'s account,
    /// creating the account if needed.
    pub fn with_account<R>(
        &self,
        user_id: &str,
        now: Instant,
        f: impl FnOnce(&mut UserAccount) -> R,
    ) -> ShieldResult<R> {
        if user_id.is_empty() {
            return Err(ShieldError::InvalidInput(
                "user id must not be empty".to_string(),
            ));
        }

        loop {
            let account = self.lookup_or_insert(user_id, now);
            let mut guard = account.lock();
            if guard.retired {
                tracing::trace!(user_id = %user_id, "Account retired during lookup, retrying");
                continue;
            }
            return Ok(f(&mut guard));
        }
    }

    fn lookup_or_insert(&self, user_id: &str, now: Instant) -> Arc<Mutex<UserAccount>> {
        if let Some(existing) = self.users.get(user_id) {
            return existing.value().clone();
        }

        let account = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(user_id = %user_id, "Creating user account");
                Arc::new(Mutex::new(UserAccount::new(user_id, self.windows, now)))
            })
            .value()
            .clone();
        metrics::TRACKED_USERS.set(self.users.len() as i64);
        account
    }

    /// Remove every account idle for longer than the staleness threshold.
    ///
    /// Accounts that are locked right now are in use and are kept.
    /// Returns the number of accounts removed.
    pub fn reclaim_stale(&self, now: Instant) -> usize {
        let stale_after = self.stale_after;
        let mut removed = 0;

        self.users.retain(|_, account| match account.try_lock() {
            None => true,
            Some(mut guard) => {
                if now.saturating_duration_since(guard.last_activity()) > stale_after {
                    guard.retired = true;
                    removed += 1;
                    false
                } else {
                    true
                }
            }
        });

        metrics::TRACKED_USERS.set(self.users.len() as i64);
        if removed > 0 {
            metrics::USERS_RECLAIMED_TOTAL.inc_by(removed as u64);
            tracing::info!(removed, remaining = self.users.len(), "Reclaimed stale user accounts");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Usage of one user, if tracked
    pub fn user_stats(&self, user_id: &str, now: Instant) -> Option<UserStats> {
        let account = self.users.get(user_id)?.value().clone();
        let mut guard = account.lock();
        Some(guard.stats(now))
    }

    /// Usage of every tracked user
    pub fn all_stats(&self, now: Instant) -> Vec<UserStats> {
        let accounts: Vec<_> = self.users.iter().map(|e| e.value().clone()).collect();
        accounts
            .into_iter()
            .map(|account| account.lock().stats(now))
            .collect()
    }

    /// Start the background sweep.
    ///
    /// The task runs every `interval` until [`ReaperHandle::stop`] is called.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> ReaperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            tracing::info!(
                interval_secs = interval.as_secs_f64(),
                stale_after_secs = self.stale_after.as_secs_f64(),
                "User reaper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.reclaim_stale(Instant::now());
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("User reaper stopped");
        });

        ReaperHandle { shutdown, task }
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the background sweep task
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the task and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("User reaper ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shield::quota::Quota;

    fn registry() -> UserRegistry {
        UserRegistry::with_settings(WindowSizes::default(), Duration::from_secs(60))
    }

    #[test]
    fn test_lazy_creation() {
        let registry = registry();
        assert!(registry.is_empty());

        let now = Instant::now();
        let calls = registry
            .with_account("alice", now, |account| account.lifetime_calls())
            .unwrap();
        assert_eq!(calls, 0);
        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);

        registry.with_account("alice", now, |_| ()).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_user_id_rejected() {
        let registry = registry();
        let result = registry.with_account("", Instant::now(), |_| ());
        assert!(matches!(result, Err(ShieldError::InvalidInput(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reclaim_stale_accounts() {
        let registry = registry();
        let t0 = Instant::now();
        let quotas = [Arc::new(Quota::unlimited("any"))];

        registry
            .with_account("idle", t0, |a| a.check_and_charge(&quotas, 1.0, t0))
            .unwrap()
            .unwrap();
        let recent = t0 + Duration::from_secs(30);
        registry
            .with_account("busy", recent, |a| a.check_and_charge(&quotas, 1.0, recent))
            .unwrap()
            .unwrap();

        let sweep = t0 + Duration::from_secs(61);
        assert_eq!(registry.reclaim_stale(sweep), 1);
        assert!(!registry.contains("idle"));
        assert!(registry.contains("busy"));
    }

    #[test]
    fn test_reclaim_skips_locked_account() {
        let registry = registry();
        let t0 = Instant::now();
        registry.with_account("held", t0, |_| ()).unwrap();

        let later = t0 + Duration::from_secs(120);
        let removed = registry
            .with_account("held", t0, |_| registry.reclaim_stale(later))
            .unwrap();
        assert_eq!(removed, 0);
        assert!(registry.contains("held"));

        assert_eq!(registry.reclaim_stale(later), 1);
    }

    #[test]
    fn test_user_stats() {
        let registry = registry();
        let now = Instant::now();
        let quotas = [Arc::new(Quota::unlimited("any"))];
        registry
            .with_account("bob", now, |a| a.check_and_charge(&quotas, 7.5, now))
            .unwrap()
            .unwrap();

        let stats = registry.user_stats("bob", now).unwrap();
        assert_eq!(stats.lifetime_cost, 7.5);
        assert_eq!(stats.short_window_calls, 1);
        assert!(registry.user_stats("nobody", now).is_none());
        assert_eq!(registry.all_stats(now).len(), 1);
    }

    #[tokio::test]
    async fn test_reaper_start_stop() {
        let registry = Arc::new(UserRegistry::with_settings(
            WindowSizes::default(),
            Duration::from_millis(10),
        ));
        let old = Instant::now();
        registry.with_account("ghost", old, |_| ()).unwrap();

        let handle = registry.clone().spawn_reaper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!registry.contains("ghost"));

        handle.stop().await;
    }
}
