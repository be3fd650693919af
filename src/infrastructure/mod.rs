//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - Backing store clients (Redis, in-memory)
//! - Prometheus metrics

pub mod metrics;
pub mod store;
