//! Order read/write paths, wire formats and synthetic data

pub mod codec;
pub mod generator;
pub mod service;

pub use generator::OrderGenerator;
pub use service::{OrderService, PublishedBatch, RetryPolicy, ServiceError, WarmStartReport};
