//! # Chat KV Proxy Library
//!
//! This crate provides the storage layer the chat backend uses for
//! latency-sensitive key-value state such as HTTP idempotency keys:
//! - An asynchronous batching proxy in front of a remote key-value store
//! - Redis and in-memory backing stores
//! - An idempotency key store built on the proxy
//!
//! ## Module Structure
//!
//! ```text
//! chat_kv_proxy/
//! +-- config/         Configuration management
//! +-- proxy/          Batching proxy, job queue and workers
//! +-- application/    Services built on the proxy (idempotency keys)
//! +-- infrastructure/ Backing stores and metrics
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Batching proxy
pub mod proxy;

// Application layer - Services built on the proxy
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Shared utilities
pub mod shared;

// Proxy startup from settings
pub mod startup;

// Telemetry and observability
pub mod telemetry;

pub use proxy::{KvProxy, KvProxyBuilder, ProxyOptions};
pub use shared::error::{ProxyError, StoreError};
