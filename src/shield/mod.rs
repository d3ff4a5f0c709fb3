//! Cost-Based Admission Control Module
//!
//! This module decides whether a search request may run on behalf of a user,
//! based on what the request would cost and the quotas of the user's roles.
//!
//! # Features
//!
//! - Composable request costs with hard-stop semantics
//! - Rule-based pricing per endpoint and parameter
//! - Short and long sliding windows per user, by cost and by call count
//! - Most lenient role wins, cheapest denial reported
//! - Idle account reclamation in the background
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Shield                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐         │
//! │  │ Role        │  │ Cost        │  │ Dashboard   │         │
//! │  │ Quotas      │  │ Calculator  │  │             │         │
//! │  └─────────────┘  └─────────────┘  └─────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │     User Registry (accounts + time windows, reaper)  │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod account;
pub mod controller;
pub mod cost;
pub mod dashboard;
pub mod error;
pub mod quota;
pub mod registry;
pub mod rules;
pub mod window;

pub use account::{UserAccount, UserStats, WindowSizes};
pub use controller::Shield;
pub use cost::{Action, Cost};
pub use dashboard::{DashboardData, ShieldSummary};
pub use error::{ShieldError, ShieldResult};
pub use quota::{Denial, DenialReason, Quota};
pub use registry::{ReaperHandle, UserRegistry};
pub use rules::{Argument, CostCalculator, Endpoint, EndpointRules, FixedCost, Rule};
pub use window::TimeWindowCounter;
