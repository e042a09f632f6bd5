//! Shared types for the order pipeline
//!
//! Domain model, error codes and response structures used by the server
//! crate and by its tests.

pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use models::{Delivery, Item, Order, OrderInvariantError, Payment};
