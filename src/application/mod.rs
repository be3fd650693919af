//! Application Layer
//!
//! Services built on top of the storage proxy.

pub mod idempotency;

pub use idempotency::{IdempotencyError, IdempotencyStore, StoredResponse};
