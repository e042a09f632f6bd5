//! Durable order storage
//!
//! An order is written as four parts in foreign-key order: order row,
//! delivery row, payment row, item rows. Every upsert is idempotent on its
//! natural key (`order_uid`, or `order_uid` + item index for items).

mod memory;
mod postgres;
mod rows;

use async_trait::async_trait;
use shared::models::{Delivery, Item, Order, Payment};
use thiserror::Error;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection, pool or IO failure; worth retrying
    #[error("Store temporarily unavailable: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A sub-entity was written for an order row that does not exist
    #[error("Order {0} does not exist")]
    MissingParent(String),

    #[error("Order {order_uid} is incomplete: {part} missing")]
    Incomplete {
        order_uid: String,
        part: &'static str,
    },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migration(err.to_string())
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn upsert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn upsert_delivery(
        &self,
        order_uid: &str,
        delivery: &Delivery,
    ) -> Result<(), StoreError>;

    async fn upsert_payment(&self, order_uid: &str, payment: &Payment) -> Result<(), StoreError>;

    /// Upsert items by position and drop rows past `items.len()`
    async fn upsert_items(&self, order_uid: &str, items: &[Item]) -> Result<(), StoreError>;

    async fn get_order_by_id(&self, order_uid: &str) -> Result<Option<Order>, StoreError>;

    async fn get_all_orders(&self) -> Result<Vec<Order>, StoreError>;

    /// Identifiers of the `limit` most recently created orders, newest first
    async fn get_latest_orders(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Write all four parts of `order`, stopping at the first failure
    async fn persist_order(&self, order: &Order) -> Result<(), StoreError> {
        self.upsert_order(order).await?;
        self.upsert_delivery(&order.order_uid, &order.delivery).await?;
        self.upsert_payment(&order.order_uid, &order.payment).await?;
        self.upsert_items(&order.order_uid, &order.items).await?;
        Ok(())
    }
}
