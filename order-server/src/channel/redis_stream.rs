//! Redis Streams channel
//!
//! Topic = stream key, consumption through one consumer group. Pending
//! entries idle longer than the redelivery period are claimed back with
//! XCLAIM before new entries are read. Acknowledged entries are deleted
//! from the stream, so its length tracks unacknowledged work.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{AckHandle, ChannelError, ChannelMessage, MessageChannel};

const PAYLOAD_FIELD: &str = "payload";
const PENDING_SCAN: usize = 16;

pub struct RedisStreamChannel {
    conn: ConnectionManager,
    /// Dedicated connection for blocking reads
    reader: Mutex<MultiplexedConnection>,
    topic: String,
    group: String,
    consumer: String,
    block: Duration,
    redelivery_after: Duration,
}

impl RedisStreamChannel {
    pub async fn connect(
        url: &str,
        topic: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block: Duration,
        redelivery_after: Duration,
    ) -> Result<Self, ChannelError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let reader = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            reader: Mutex::new(reader),
            topic: topic.into(),
            group: group.into(),
            consumer: consumer.into(),
            block,
            redelivery_after,
        })
    }

    fn to_message(&self, entry: StreamId, redelivered: bool) -> ChannelMessage {
        let payload: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
        ChannelMessage {
            handle: AckHandle {
                topic: self.topic.clone(),
                id: entry.id,
            },
            payload,
            redelivered,
        }
    }

    /// Claim one pending entry that has been idle past the redelivery period
    async fn claim_idle(&self) -> Result<Option<ChannelMessage>, ChannelError> {
        let mut conn = self.conn.clone();
        let min_idle = self.redelivery_after.as_millis() as usize;

        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.topic, &self.group, "-", "+", PENDING_SCAN)
            .await?;
        for candidate in pending.ids {
            if candidate.last_delivered_ms < min_idle {
                continue;
            }
            // XCLAIM re-checks idleness, so a concurrent claimer wins cleanly
            let claimed: StreamClaimReply = conn
                .xclaim(&self.topic, &self.group, &self.consumer, min_idle, &[&candidate.id])
                .await?;
            if let Some(entry) = claimed.ids.into_iter().next() {
                tracing::info!(
                    id = %entry.id,
                    previous_consumer = %candidate.consumer,
                    deliveries = candidate.times_delivered,
                    "Reclaimed idle stream entry"
                );
                return Ok(Some(self.to_message(entry, true)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageChannel for RedisStreamChannel {
    fn name(&self) -> &'static str {
        "redis-stream"
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn ensure_topic(&self) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.topic)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<String, ChannelError> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(topic, "*", &[(PAYLOAD_FIELD, payload)]).await?;
        Ok(id)
    }

    async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelMessage>, ChannelError> {
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(self.block.as_millis() as usize);

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(msg) = self.claim_idle().await? {
                return Ok(Some(msg));
            }

            let keys = [&self.topic];
            let ids = [">"];
            let mut reader = self.reader.lock().await;
            let read: Option<StreamReadReply> = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                r = reader.xread_options(&keys, &ids, &options) => r?,
            };
            drop(reader);

            let entry = read
                .into_iter()
                .flat_map(|reply| reply.keys)
                .flat_map(|key| key.ids)
                .next();
            if let Some(entry) = entry {
                return Ok(Some(self.to_message(entry, false)));
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let (_acked, _deleted): (i64, i64) = redis::pipe()
            .atomic()
            .xack(&handle.topic, &self.group, &[&handle.id])
            .xdel(&handle.topic, &[&handle.id])
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn channel(redelivery_after: Duration) -> RedisStreamChannel {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let topic = format!("test-orders-{}", uuid::Uuid::new_v4().simple());
        let ch = RedisStreamChannel::connect(
            &url,
            topic,
            "test-group",
            "test-consumer",
            Duration::from_millis(100),
            redelivery_after,
        )
        .await
        .unwrap();
        ch.ensure_topic().await.unwrap();
        ch
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_send_receive_ack() {
        let ch = channel(Duration::from_secs(30)).await;
        ch.ensure_topic().await.unwrap();

        let topic = ch.topic().to_string();
        ch.send(&topic, b"[1]").await.unwrap();
        let msg = ch.receive(&CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(msg.payload, b"[1]");
        assert!(!msg.redelivered);
        ch.ack(&msg.handle).await.unwrap();

        let mut conn = ch.conn.clone();
        let len: usize = conn.xlen(&topic).await.unwrap();
        assert_eq!(len, 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn test_idle_entry_is_reclaimed() {
        let ch = channel(Duration::from_millis(50)).await;
        let topic = ch.topic().to_string();
        ch.send(&topic, b"[2]").await.unwrap();

        let cancel = CancellationToken::new();
        let first = ch.receive(&cancel).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let again = ch.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(again.handle, first.handle);
        assert!(again.redelivered);
        ch.ack(&again.handle).await.unwrap();
    }
}
