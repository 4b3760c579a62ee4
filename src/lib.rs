//! Paperdesk paper-trading library
//!
//! Risk management and simulated execution for a single paper account, an
//! autonomous decision pipeline driven by market data and an AI advisor, and
//! the rate-limiting, circuit-breaking and retry primitives that guard every
//! outbound call.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod resilience;
