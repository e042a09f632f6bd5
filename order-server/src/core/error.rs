use thiserror::Error;

use crate::cache::CacheError;
use crate::channel::ChannelError;
use crate::orders::ServiceError;
use crate::store::StoreError;

/// Startup and lifecycle failures
///
/// Request handlers answer with `shared::AppError`; this type only covers
/// what can stop the process.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Warm-start failed: {0}")]
    WarmStart(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
