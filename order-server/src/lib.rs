//! order-server: order ingestion and lookup
//!
//! Orders arrive as JSON batches on a message channel, are persisted to
//! Postgres by the ingestion consumer and served over HTTP through a
//! capacity-bounded LRU cache.
//!
//! # Modules
//!
//! - [`core`] - configuration, shared state, task registry, lifecycle
//! - [`store`] - persistent order store (Postgres, in-memory)
//! - [`cache`] - LRU cache engine over a pluggable backing store
//! - [`channel`] - at-least-once message channel (Redis Streams, in-memory)
//! - [`ingest`] - channel → store consumer
//! - [`orders`] - read/write orchestration, wire codec, synthetic orders
//! - [`api`] - axum routes
//! - [`utils`] - logging

pub mod api;
pub mod cache;
pub mod channel;
pub mod core;
pub mod ingest;
pub mod orders;
pub mod store;
pub mod utils;

pub use crate::core::{Config, Server, ServerError, ServerState};
