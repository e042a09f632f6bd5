//! Shared server state
//!
//! Built once at startup and cloned into every request handler. All fields
//! are `Arc`s, so cloning is cheap.

use std::sync::Arc;

use super::config::{Backend, Config};
use super::error::Result;
use super::tasks::{BackgroundTasks, TaskHealth, TaskKind};
use crate::cache::{CacheBackend, CacheEngine, MemoryCacheBackend, RedisCacheBackend};
use crate::channel::{self, MemoryChannel, MessageChannel, RedisStreamChannel};
use crate::ingest::IngestionConsumer;
use crate::orders::{OrderService, RetryPolicy, WarmStartReport};
use crate::store::{OrderStore, PgOrderStore};

#[derive(Clone)]
pub struct ServerState {
    pub orders: Arc<OrderService>,
    pub cache: Arc<CacheEngine>,
    pub consumer: Arc<IngestionConsumer>,
    /// Liveness of the tasks started by [`start_background_tasks`](Self::start_background_tasks)
    pub tasks: TaskHealth,
    /// Server start time (Unix millis)
    pub started_at: i64,
    warm_start_limit: usize,
    reconcile_interval: std::time::Duration,
}

impl ServerState {
    /// Connect every backend in startup order
    ///
    /// Store (with migrations), then cache backend, then channel with topic
    /// provisioning. Any failure here is fatal.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let store = PgOrderStore::connect(
            &config.database_url,
            config.db_max_connections,
            config.db_acquire_timeout,
        )
        .await?;

        let cache_backend: Arc<dyn CacheBackend> = match config.cache_backend {
            Backend::Redis => Arc::new(
                RedisCacheBackend::connect(
                    &config.redis_url,
                    config.cache_key_prefix.clone(),
                    config.cache_index_key.clone(),
                )
                .await?,
            ),
            Backend::Memory => Arc::new(MemoryCacheBackend::new()),
        };
        tracing::info!(backend = cache_backend.name(), capacity = config.cache_capacity, "Cache backend ready");

        let channel: Arc<dyn MessageChannel> = match config.channel_backend {
            Backend::Redis => Arc::new(
                RedisStreamChannel::connect(
                    &config.redis_url,
                    config.orders_topic.clone(),
                    config.consumer_group.clone(),
                    config.consumer_name.clone(),
                    config.channel_block,
                    config.redelivery_after,
                )
                .await?,
            ),
            Backend::Memory => Arc::new(MemoryChannel::new(
                config.orders_topic.clone(),
                config.redelivery_after,
            )),
        };
        channel::provision_topic(
            channel.as_ref(),
            config.topic_provision_attempts,
            config.topic_provision_delay,
        )
        .await?;

        Ok(Self::from_parts(config, Arc::new(store), cache_backend, channel))
    }

    /// Wire services over already-connected backends
    pub fn from_parts(
        config: &Config,
        store: Arc<dyn OrderStore>,
        cache_backend: Arc<dyn CacheBackend>,
        channel: Arc<dyn MessageChannel>,
    ) -> Self {
        let cache = Arc::new(CacheEngine::new(
            cache_backend,
            config.cache_capacity,
            config.cache_op_timeout,
        ));
        let orders = Arc::new(OrderService::new(
            store.clone(),
            cache.clone(),
            channel.clone(),
            config.orders_topic.clone(),
            RetryPolicy {
                attempts: config.store_retry_attempts,
                delay: config.store_retry_delay,
            },
            config.max_batch_size,
        ));
        let consumer = Arc::new(IngestionConsumer::new(
            channel,
            store,
            cache.clone(),
            config.warm_cache_on_ingest,
        ));

        Self {
            orders,
            cache,
            consumer,
            tasks: TaskHealth::default(),
            started_at: shared::util::now_millis(),
            warm_start_limit: config.warm_start_limit,
            reconcile_interval: config.cache_reconcile_interval,
        }
    }

    /// Load the newest orders into the cache before serving
    pub async fn warm_start(&self) -> Result<WarmStartReport> {
        Ok(self.orders.warm_start(self.warm_start_limit).await?)
    }

    /// Spawn the consumer worker and the reconciliation ticker
    pub fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::with_health(self.tasks.clone());
        let consumer = self.consumer.clone();
        let token = tasks.shutdown_token();
        tasks.spawn("order_consumer", TaskKind::Worker, async move {
            // Errors are logged by the consumer itself
            let _ = consumer.run(token).await;
        });

        let cache = self.cache.clone();
        let token = tasks.shutdown_token();
        let period = self.reconcile_interval;
        tasks.spawn("cache_reconcile", TaskKind::Periodic, async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => match cache.reconcile().await {
                        Ok(report) => tracing::debug!(clean = report.is_clean(), "Cache reconcile pass done"),
                        Err(e) => tracing::warn!(error = %e, "Cache reconcile failed"),
                    },
                }
            }
        });

        tasks.log_summary();
        tasks
    }
}
