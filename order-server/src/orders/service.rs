//! Read and write paths over store, cache and channel
//!
//! Reads go cache first, then the store (with bounded retry on transient
//! failures), filling the cache on the way back. Writes only publish to the
//! channel; persistence happens in the ingestion consumer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shared::models::Order;
use shared::{AppError, ErrorCode};
use thiserror::Error;

use super::codec;
use super::generator::OrderGenerator;
use crate::cache::{CacheEngine, CacheLookup};
use crate::channel::{ChannelError, MessageChannel};
use crate::store::{OrderStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Order {0} not found")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Batch is empty")]
    EmptyBatch,

    #[error("Batch of {size} exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Invalid order in batch: {0}")]
    InvalidOrder(String),

    #[error("Serialization error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(uid) => AppError::order_not_found(uid),
            ServiceError::Store(e) if e.is_transient() => AppError::store_unavailable(e.to_string()),
            ServiceError::Store(e) => AppError::database(e.to_string()),
            ServiceError::Channel(e) => AppError::channel_unavailable(e.to_string()),
            ServiceError::EmptyBatch => AppError::new(ErrorCode::OrderBatchEmpty),
            ServiceError::BatchTooLarge { size, max } => {
                AppError::with_message(ErrorCode::OrderBatchTooLarge, format!("{size} > {max}"))
                    .with_detail("max", max)
            }
            ServiceError::InvalidOrder(msg) => AppError::with_message(ErrorCode::OrderInvalid, msg),
            ServiceError::Encode(e) => AppError::internal(e.to_string()),
        }
    }
}

/// Retry budget for transient store failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// A batch accepted by the channel
#[derive(Debug, Clone)]
pub struct PublishedBatch {
    pub message_id: String,
    pub count: usize,
    /// Exact bytes handed to the channel
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmStartReport {
    pub requested: usize,
    pub loaded: usize,
    pub missing: usize,
    pub failed: usize,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheEngine>,
    channel: Arc<dyn MessageChannel>,
    topic: String,
    retry: RetryPolicy,
    max_batch_size: usize,
    generator: OrderGenerator,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<CacheEngine>,
        channel: Arc<dyn MessageChannel>,
        topic: impl Into<String>,
        retry: RetryPolicy,
        max_batch_size: usize,
    ) -> Self {
        Self {
            store,
            cache,
            channel,
            topic: topic.into(),
            retry,
            max_batch_size,
            generator: OrderGenerator::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CacheEngine> {
        &self.cache
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(op, attempt, attempts, error = %e, "Transient store failure, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn fill_cache(&self, order: &Order) {
        let snapshot = match codec::encode_snapshot(order) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(order_uid = %order.order_uid, error = %e, "Failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = self.cache.fill(&order.order_uid, &snapshot).await {
            tracing::warn!(order_uid = %order.order_uid, error = %e, "Cache fill failed");
        }
    }

    /// Read path: cache, then store, then cache fill
    pub async fn get_order(&self, order_uid: &str) -> Result<Order, ServiceError> {
        match self.cache.get(order_uid).await {
            Ok(CacheLookup::Hit(snapshot)) => match codec::decode_snapshot(order_uid, &snapshot) {
                Ok(order) => return Ok(order),
                Err(e) => {
                    tracing::warn!(order_uid = %order_uid, error = %e, "Dropping undecodable cache entry");
                    if let Err(e) = self.cache.evict(order_uid).await {
                        tracing::warn!(order_uid = %order_uid, error = %e, "Failed to evict undecodable cache entry");
                    }
                }
            },
            Ok(CacheLookup::Miss) => {}
            Err(e) => {
                tracing::warn!(order_uid = %order_uid, error = %e, "Cache unavailable, reading from store");
            }
        }

        let order = self
            .with_store_retry("get_order_by_id", || self.store.get_order_by_id(order_uid))
            .await?
            .ok_or_else(|| ServiceError::NotFound(order_uid.to_string()))?;

        self.fill_cache(&order).await;
        Ok(order)
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self
            .with_store_retry("get_all_orders", || self.store.get_all_orders())
            .await?)
    }

    /// Write path: validate and publish `orders` as one channel message
    pub async fn publish_batch(&self, orders: &[Order]) -> Result<PublishedBatch, ServiceError> {
        if orders.is_empty() {
            return Err(ServiceError::EmptyBatch);
        }
        if orders.len() > self.max_batch_size {
            return Err(ServiceError::BatchTooLarge {
                size: orders.len(),
                max: self.max_batch_size,
            });
        }
        for order in orders {
            order
                .validate()
                .map_err(|e| ServiceError::InvalidOrder(format!("{}: {e}", order.order_uid)))?;
        }

        let payload = codec::encode_batch(orders)?;
        let message_id = self.channel.send(&self.topic, &payload).await?;
        tracing::info!(
            topic = %self.topic,
            message_id = %message_id,
            count = orders.len(),
            "Published order batch"
        );

        Ok(PublishedBatch {
            message_id,
            count: orders.len(),
            payload,
        })
    }

    /// Generate `count` synthetic orders and publish them as one batch
    pub async fn generate_and_publish(&self, count: usize) -> Result<PublishedBatch, ServiceError> {
        if count == 0 {
            return Err(ServiceError::EmptyBatch);
        }
        if count > self.max_batch_size {
            return Err(ServiceError::BatchTooLarge {
                size: count,
                max: self.max_batch_size,
            });
        }
        let orders = self.generator.batch(count);
        self.publish_batch(&orders).await
    }

    /// Load the `limit` newest orders into the cache, oldest first so the
    /// newest ends up most recent
    pub async fn warm_start(&self, limit: usize) -> Result<WarmStartReport, ServiceError> {
        let mut ids = self
            .with_store_retry("get_latest_orders", || self.store.get_latest_orders(limit))
            .await?;
        ids.reverse();

        let mut report = WarmStartReport {
            requested: ids.len(),
            ..Default::default()
        };
        for uid in &ids {
            match self
                .with_store_retry("get_order_by_id", || self.store.get_order_by_id(uid))
                .await
            {
                Ok(Some(order)) => {
                    self.fill_cache(&order).await;
                    report.loaded += 1;
                }
                Ok(None) => report.missing += 1,
                Err(e) => {
                    tracing::warn!(order_uid = %uid, error = %e, "Warm-start load failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            requested = report.requested,
            loaded = report.loaded,
            missing = report.missing,
            failed = report.failed,
            "Cache warm-start finished"
        );
        Ok(report)
    }
}
