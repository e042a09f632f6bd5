//! In-process channel (single process deployments and tests)
//!
//! Each topic is an ordered log of entries. `receive` hands out the oldest
//! entry that is either undelivered or has been in flight longer than the
//! redelivery period; `ack` removes it from the log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{AckHandle, ChannelError, ChannelMessage, MessageChannel};

#[derive(Debug)]
struct Entry {
    payload: Vec<u8>,
    delivered_at: Option<Instant>,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct TopicLog {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

pub struct MemoryChannel {
    topic: String,
    topics: DashMap<String, TopicLog>,
    notify: Notify,
    closed: AtomicBool,
    provisioned: AtomicBool,
    failing_provisions: AtomicU32,
    redelivery_after: Duration,
}

enum Claim {
    Ready(ChannelMessage),
    /// Nothing deliverable; earliest time an in-flight entry becomes eligible
    Wait(Option<Duration>),
}

impl MemoryChannel {
    pub fn new(topic: impl Into<String>, redelivery_after: Duration) -> Self {
        Self {
            topic: topic.into(),
            topics: DashMap::new(),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            provisioned: AtomicBool::new(false),
            failing_provisions: AtomicU32::new(0),
            redelivery_after,
        }
    }

    /// Make the next `n` provisioning attempts report the broker as unavailable
    pub fn fail_next_provisions(&self, n: u32) {
        self.failing_provisions.store(n, Ordering::SeqCst);
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned.load(Ordering::SeqCst)
    }

    /// Stop handing out messages and wake all waiting receivers
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Entries of `topic` not yet acknowledged
    pub fn pending(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.entries.len()).unwrap_or(0)
    }

    fn claim_next(&self) -> Claim {
        let Some(mut log) = self.topics.get_mut(&self.topic) else {
            return Claim::Wait(None);
        };
        let now = Instant::now();
        let mut earliest: Option<Duration> = None;

        for (id, entry) in log.entries.iter_mut() {
            let eligible = match entry.delivered_at {
                None => true,
                Some(at) => {
                    let idle = now.duration_since(at);
                    if idle >= self.redelivery_after {
                        true
                    } else {
                        let remaining = self.redelivery_after - idle;
                        earliest = Some(earliest.map_or(remaining, |e| e.min(remaining)));
                        false
                    }
                }
            };
            if eligible {
                let redelivered = entry.deliveries > 0;
                entry.delivered_at = Some(now);
                entry.deliveries += 1;
                return Claim::Ready(ChannelMessage {
                    handle: AckHandle {
                        topic: self.topic.clone(),
                        id: id.to_string(),
                    },
                    payload: entry.payload.clone(),
                    redelivered,
                });
            }
        }
        Claim::Wait(earliest)
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn ensure_topic(&self) -> Result<(), ChannelError> {
        let failing = self.failing_provisions.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_provisions.store(failing - 1, Ordering::SeqCst);
            return Err(ChannelError::Unavailable("broker not ready".into()));
        }
        self.topics.entry(self.topic.clone()).or_default();
        self.provisioned.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<String, ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let id = {
            let mut log = self.topics.entry(topic.to_string()).or_default();
            let id = log.next_id;
            log.next_id += 1;
            log.entries.insert(
                id,
                Entry {
                    payload: payload.to_vec(),
                    delivered_at: None,
                    deliveries: 0,
                },
            );
            id
        };
        self.notify.notify_waiters();
        Ok(id.to_string())
    }

    async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelMessage>, ChannelError> {
        if !self.is_provisioned() {
            return Err(ChannelError::UnknownTopic(self.topic.clone()));
        }
        loop {
            // Register interest before checking the log so a send in between
            // is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() || self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let wait = match self.claim_next() {
                Claim::Ready(msg) => return Ok(Some(msg)),
                Claim::Wait(wait) => wait,
            };

            match wait {
                Some(wait) => tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(wait) => {}
                },
                None => tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = &mut notified => {}
                },
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), ChannelError> {
        let id: u64 = handle
            .id
            .parse()
            .map_err(|_| ChannelError::Backend(format!("malformed message id {}", handle.id)))?;
        if let Some(mut log) = self.topics.get_mut(&handle.topic) {
            log.entries.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn channel(redelivery_after: Duration) -> MemoryChannel {
        let channel = MemoryChannel::new("orders", redelivery_after);
        channel.ensure_topic().await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let ch = channel(Duration::from_secs(30)).await;
        ch.send("orders", b"one").await.unwrap();
        ch.send("orders", b"two").await.unwrap();

        let cancel = CancellationToken::new();
        let first = ch.receive(&cancel).await.unwrap().unwrap();
        let second = ch.receive(&cancel).await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.payload, b"two");
        assert!(!first.redelivered);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_send() {
        let ch = Arc::new(channel(Duration::from_secs(30)).await);
        let cancel = CancellationToken::new();

        let reader = {
            let ch = ch.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ch.receive(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ch.send("orders", b"late").await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(msg.payload, b"late");
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let ch = channel(Duration::from_millis(30)).await;
        ch.send("orders", b"batch").await.unwrap();
        let cancel = CancellationToken::new();

        let first = ch.receive(&cancel).await.unwrap().unwrap();
        let again = tokio::time::timeout(Duration::from_secs(1), ch.receive(&cancel))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(again.handle, first.handle);
        assert!(again.redelivered);

        ch.ack(&again.handle).await.unwrap();
        assert_eq!(ch.pending("orders"), 0);
    }

    #[tokio::test]
    async fn test_acked_message_is_not_redelivered() {
        let ch = channel(Duration::from_millis(10)).await;
        ch.send("orders", b"batch").await.unwrap();
        let cancel = CancellationToken::new();

        let msg = ch.receive(&cancel).await.unwrap().unwrap();
        ch.ack(&msg.handle).await.unwrap();
        ch.ack(&msg.handle).await.unwrap();

        let next = tokio::time::timeout(Duration::from_millis(50), ch.receive(&cancel)).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_cancel_and_close_end_receive() {
        let ch = channel(Duration::from_secs(30)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(ch.receive(&cancel).await.unwrap().is_none());

        let ch = Arc::new(channel(Duration::from_secs(30)).await);
        let reader = {
            let ch = ch.clone();
            tokio::spawn(async move { ch.receive(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ch.close();
        assert!(reader.await.unwrap().unwrap().is_none());
        assert!(matches!(
            ch.send("orders", b"x").await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_receive_requires_provisioned_topic() {
        let ch = MemoryChannel::new("orders", Duration::from_secs(30));
        let err = ch.receive(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownTopic(_)));
    }
}
