//! Ingestion consumer
//!
//! Drains the order channel into the store, one message at a time:
//! `Idle → Fetching → Decoding → Persisting → Acknowledging → Idle`.
//!
//! - Undecodable messages are acknowledged and skipped.
//! - A failed order stops the batch and withholds the ack, so the channel
//!   redelivers the whole batch later.
//! - After each persisted order the cache is either warmed or invalidated.
//!   A concurrent read-path fill that loaded the store before this update
//!   can still land after it; last writer wins until the next ingest or
//!   eviction.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheEngine;
use crate::channel::{ChannelError, ChannelMessage, MessageChannel};
use crate::orders::codec;
use crate::store::OrderStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConsumerState {
    Idle = 0,
    Fetching = 1,
    Decoding = 2,
    Persisting = 3,
    Acknowledging = 4,
    Stopped = 5,
}

impl ConsumerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Fetching,
            2 => Self::Decoding,
            3 => Self::Persisting,
            4 => Self::Acknowledging,
            _ => Self::Stopped,
        }
    }
}

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Every order persisted, message acknowledged
    Persisted(usize),
    /// Undecodable, acknowledged and dropped
    Skipped,
    /// An order failed to persist; ack withheld for redelivery
    Withheld { failed_order: String },
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    redeliveries: AtomicU64,
    orders_persisted: AtomicU64,
    decode_failures: AtomicU64,
    persist_failures: AtomicU64,
    acks: AtomicU64,
    cache_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub messages: u64,
    pub redeliveries: u64,
    pub orders_persisted: u64,
    pub decode_failures: u64,
    pub persist_failures: u64,
    pub acks: u64,
    pub cache_failures: u64,
}

pub struct IngestionConsumer {
    channel: Arc<dyn MessageChannel>,
    store: Arc<dyn OrderStore>,
    cache: Arc<CacheEngine>,
    warm_cache_on_ingest: bool,
    state: AtomicU8,
    counters: Counters,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl IngestionConsumer {
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        store: Arc<dyn OrderStore>,
        cache: Arc<CacheEngine>,
        warm_cache_on_ingest: bool,
    ) -> Self {
        Self {
            channel,
            store,
            cache,
            warm_cache_on_ingest,
            state: AtomicU8::new(ConsumerState::Idle as u8),
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn stats(&self) -> ConsumerStats {
        let c = &self.counters;
        ConsumerStats {
            messages: c.messages.load(Ordering::Relaxed),
            redeliveries: c.redeliveries.load(Ordering::Relaxed),
            orders_persisted: c.orders_persisted.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            persist_failures: c.persist_failures.load(Ordering::Relaxed),
            acks: c.acks.load(Ordering::Relaxed),
            cache_failures: c.cache_failures.load(Ordering::Relaxed),
        }
    }

    /// Consume until the channel closes or `cancel` fires
    ///
    /// A channel receive or ack failure ends the loop with that error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ChannelError> {
        tracing::info!(
            topic = %self.channel.topic(),
            backend = self.channel.name(),
            warm_cache_on_ingest = self.warm_cache_on_ingest,
            "Ingestion consumer started"
        );

        let result = loop {
            self.set_state(ConsumerState::Fetching);
            let msg = match self.channel.receive(&cancel).await {
                Ok(Some(msg)) => msg,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            if let Err(e) = self.process(msg).await {
                break Err(e);
            }
            self.set_state(ConsumerState::Idle);
        };

        self.set_state(ConsumerState::Stopped);
        match &result {
            Ok(()) => tracing::info!("Ingestion consumer stopped"),
            Err(e) => tracing::error!(error = %e, "Ingestion consumer stopped on channel error"),
        }
        result
    }

    /// Decode, persist and acknowledge one message
    pub async fn process(&self, msg: ChannelMessage) -> Result<MessageOutcome, ChannelError> {
        bump(&self.counters.messages);
        if msg.redelivered {
            bump(&self.counters.redeliveries);
        }

        self.set_state(ConsumerState::Decoding);
        let orders = match codec::decode_batch(&msg.payload) {
            Ok(orders) => orders,
            Err(e) => {
                bump(&self.counters.decode_failures);
                tracing::warn!(
                    message_id = %msg.handle.id,
                    bytes = msg.payload.len(),
                    error = %e,
                    "Skipping undecodable message"
                );
                self.acknowledge(&msg).await?;
                return Ok(MessageOutcome::Skipped);
            }
        };

        self.set_state(ConsumerState::Persisting);
        for order in &orders {
            if let Err(e) = self.store.persist_order(order).await {
                bump(&self.counters.persist_failures);
                tracing::error!(
                    message_id = %msg.handle.id,
                    order_uid = %order.order_uid,
                    error = %e,
                    "Failed to persist order, leaving batch for redelivery"
                );
                return Ok(MessageOutcome::Withheld {
                    failed_order: order.order_uid.clone(),
                });
            }
            bump(&self.counters.orders_persisted);
            self.sync_cache(order).await;
        }

        self.acknowledge(&msg).await?;
        tracing::info!(
            message_id = %msg.handle.id,
            orders = orders.len(),
            redelivered = msg.redelivered,
            "Order batch persisted"
        );
        Ok(MessageOutcome::Persisted(orders.len()))
    }

    async fn acknowledge(&self, msg: &ChannelMessage) -> Result<(), ChannelError> {
        self.set_state(ConsumerState::Acknowledging);
        self.channel.ack(&msg.handle).await?;
        bump(&self.counters.acks);
        Ok(())
    }

    async fn sync_cache(&self, order: &shared::models::Order) {
        let result = if self.warm_cache_on_ingest {
            match codec::encode_snapshot(order) {
                Ok(snapshot) => self.cache.fill(&order.order_uid, &snapshot).await,
                Err(e) => {
                    tracing::error!(order_uid = %order.order_uid, error = %e, "Failed to encode snapshot");
                    self.cache.evict(&order.order_uid).await.map(|_| ())
                }
            }
        } else {
            self.cache.evict(&order.order_uid).await.map(|_| ())
        };
        if let Err(e) = result {
            bump(&self.counters.cache_failures);
            tracing::warn!(order_uid = %order.order_uid, error = %e, "Cache update after ingest failed");
        }
    }
}
