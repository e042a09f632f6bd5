//! Order serialization formats
//!
//! - Wire: the channel payload, a JSON array of orders that carry `order_uid`
//! - Snapshot: the cached public JSON of one order, keyed externally by uid

use serde::{Deserialize, Serialize};
use shared::models::{Order, OrderInvariantError};
use thiserror::Error;

/// Borrowed wire view of one order: identifier plus the public body
#[derive(Serialize)]
pub struct WireOrder<'a> {
    pub order_uid: &'a str,
    #[serde(flatten)]
    pub order: &'a Order,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBatch {
    Many(Vec<Order>),
    One(Box<Order>),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("batch contains no orders")]
    EmptyBatch,

    #[error("order #{index} ({order_uid}) rejected: {source}")]
    Invalid {
        index: usize,
        order_uid: String,
        source: OrderInvariantError,
    },
}

pub fn encode_batch(orders: &[Order]) -> Result<Vec<u8>, serde_json::Error> {
    let wire: Vec<WireOrder<'_>> = orders
        .iter()
        .map(|order| WireOrder {
            order_uid: &order.order_uid,
            order,
        })
        .collect();
    serde_json::to_vec(&wire)
}

/// Decode a channel payload (array or single object) and check every order
pub fn decode_batch(payload: &[u8]) -> Result<Vec<Order>, DecodeError> {
    let orders = match serde_json::from_slice::<WireBatch>(payload)? {
        WireBatch::Many(orders) => orders,
        WireBatch::One(order) => vec![*order],
    };
    if orders.is_empty() {
        return Err(DecodeError::EmptyBatch);
    }
    for (index, order) in orders.iter().enumerate() {
        order.validate().map_err(|source| DecodeError::Invalid {
            index,
            order_uid: order.order_uid.clone(),
            source,
        })?;
    }
    Ok(orders)
}

pub fn encode_snapshot(order: &Order) -> Result<String, serde_json::Error> {
    serde_json::to_string(order)
}

/// Parse a cached snapshot and re-attach the identifier it was stored under
pub fn decode_snapshot(order_uid: &str, snapshot: &str) -> Result<Order, serde_json::Error> {
    let mut order: Order = serde_json::from_str(snapshot)?;
    order.order_uid = order_uid.to_string();
    Ok(order)
}
