//! Solr Shield Library
//!
//! This library provides cost-based admission control for a search backend:
//! request pricing, per-user accounting over sliding time windows, and
//! role quotas.

pub mod config;
pub mod metrics;
pub mod shield;

pub use config::Config;
pub use shield::{Cost, Shield, ShieldError, ShieldResult};
