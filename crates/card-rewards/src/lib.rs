//! Reward-rate evaluation engine for a personal-finance dashboard.
//!
//! Given a hypothetical transaction (category, payee, payment method) the engine works out
//! the effective reward rate of every configured credit card and ranks them. Static,
//! rotating, and dynamic-tier reward structures are supported; see [`rewards`].

pub mod config;
pub mod error;
pub mod rewards;
pub mod telemetry;
