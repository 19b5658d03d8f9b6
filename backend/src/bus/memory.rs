//! In-process bus for tests and single-node development.
//!
//! Topics retain every published message so a subscription attached later
//! still sees the full history, mirroring what a stream-backed broker gives
//! us. Per-subscription delivery runs on a bounded worker pool fed by a
//! bounded channel; a full channel pushes back on publishers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use bosun_common::retry::RetryPolicy;

use super::{BusLimits, Delivery, EventBus, MessageHandler, PublishHandle, Verdict};

#[derive(Clone)]
struct Envelope {
    payload: Bytes,
    attempt: u32,
}

struct Subscription {
    sender: async_channel::Sender<Envelope>,
}

#[derive(Default)]
struct TopicState {
    retained: Vec<Bytes>,
    subscriptions: Vec<Subscription>,
}

struct Inner {
    topics: Mutex<HashMap<String, TopicState>>,
    limits: BusLimits,
    redelivery: RetryPolicy,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct MemoryEventBus {
    inner: Arc<Inner>,
}

impl MemoryEventBus {
    pub fn new(limits: BusLimits) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                limits,
                redelivery: RetryPolicy::default(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn with_redelivery(limits: BusLimits, redelivery: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                limits,
                redelivery,
                cancel: CancellationToken::new(),
            }),
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishHandle> {
        if self.inner.cancel.is_cancelled() {
            anyhow::bail!("bus is closed");
        }
        let senders: Vec<async_channel::Sender<Envelope>> = {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            state.retained.push(payload.clone());
            state
                .subscriptions
                .iter()
                .map(|s| s.sender.clone())
                .collect()
        };
        for sender in senders {
            // A full channel blocks here: outstanding-message backpressure.
            let _ = sender
                .send(Envelope {
                    payload: payload.clone(),
                    attempt: 1,
                })
                .await;
        }
        Ok(PublishHandle::immediate(Ok(())))
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let (sender, receiver) =
            async_channel::bounded::<Envelope>(self.inner.limits.max_outstanding_messages);

        let retained: Vec<Bytes> = {
            let mut topics = self.inner.topics.lock();
            let state = topics.entry(topic.to_string()).or_default();
            state.subscriptions.push(Subscription {
                sender: sender.clone(),
            });
            state.retained.clone()
        };

        for worker in 0..self.inner.limits.max_concurrent_handlers {
            let receiver = receiver.clone();
            let sender = sender.clone();
            let handler = handler.clone();
            let cancel = self.inner.cancel.clone();
            let redelivery = self.inner.redelivery;
            let topic = topic.to_string();
            tokio::spawn(async move {
                loop {
                    let envelope = tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = receiver.recv() => match received {
                            Ok(e) => e,
                            Err(_) => break,
                        },
                    };
                    let verdict = handler
                        .handle(Delivery {
                            topic: topic.clone(),
                            payload: envelope.payload.clone(),
                            attempt: envelope.attempt,
                        })
                        .await;
                    if verdict == Verdict::Nack {
                        let delay = redelivery.delay_for(envelope.attempt.saturating_sub(1));
                        let sender = sender.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = cancel.cancelled() => {}
                                _ = tokio::time::sleep(delay) => {
                                    let _ = sender
                                        .send(Envelope {
                                            payload: envelope.payload,
                                            attempt: envelope.attempt + 1,
                                        })
                                        .await;
                                }
                            }
                        });
                    }
                }
                tracing::trace!(worker, "subscription worker stopped");
            });
        }

        // Replay history for late subscribers.
        for payload in retained {
            let _ = sender.send(Envelope { payload, attempt: 1 }).await;
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.cancel.cancel();
        let topics = self.inner.topics.lock();
        for state in topics.values() {
            for sub in &state.subscriptions {
                sub.sender.close();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::super::FnHandler;

    fn limits(handlers: usize, outstanding: usize) -> BusLimits {
        BusLimits {
            max_concurrent_handlers: handlers,
            max_outstanding_messages: outstanding,
        }
    }

    fn fast_redelivery() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(10),
            jitter: 0.0,
            ..Default::default()
        }
    }

    async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout {
            if predicate() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn delivers_published_messages() {
        let bus = MemoryEventBus::new(limits(2, 16));
        let seen = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let seen2 = seen.clone();
        bus.subscribe(
            "t",
            Arc::new(FnHandler(move |d: Delivery| {
                let seen = seen2.clone();
                async move {
                    seen.lock().push(d.payload);
                    Verdict::Ack
                }
            })),
        )
        .await
        .unwrap();

        bus.publish("t", Bytes::from_static(b"one")).await.unwrap();
        bus.publish("t", Bytes::from_static(b"two")).await.unwrap();

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 2).await);
    }

    #[tokio::test]
    async fn late_subscriber_sees_history() {
        let bus = MemoryEventBus::new(limits(1, 16));
        let handle = bus.publish("t", Bytes::from_static(b"early")).await.unwrap();
        handle.acked().await.unwrap();

        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        bus.subscribe(
            "t",
            Arc::new(FnHandler(move |_d: Delivery| {
                let seen = seen2.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Verdict::Ack
                }
            })),
        )
        .await
        .unwrap();

        assert!(wait_until(Duration::from_secs(1), || seen.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt() {
        let bus = MemoryEventBus::with_redelivery(limits(1, 16), fast_redelivery());
        let attempts = Arc::new(Mutex::new(Vec::<u32>::new()));
        let attempts2 = attempts.clone();
        bus.subscribe(
            "t",
            Arc::new(FnHandler(move |d: Delivery| {
                let attempts = attempts2.clone();
                async move {
                    attempts.lock().push(d.attempt);
                    if d.attempt < 2 { Verdict::Nack } else { Verdict::Ack }
                }
            })),
        )
        .await
        .unwrap();

        bus.publish("t", Bytes::from_static(b"x")).await.unwrap();

        assert!(wait_until(Duration::from_secs(2), || attempts.lock().len() == 2).await);
        assert_eq!(*attempts.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let bus = MemoryEventBus::new(limits(2, 64));
        let current = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        let done = Arc::new(AtomicU32::new(0));
        let (current2, peak2, done2) = (current.clone(), peak.clone(), done.clone());
        bus.subscribe(
            "t",
            Arc::new(FnHandler(move |_d: Delivery| {
                let current = current2.clone();
                let peak = peak2.clone();
                let done = done2.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Verdict::Ack
                }
            })),
        )
        .await
        .unwrap();

        for _ in 0..10 {
            bus.publish("t", Bytes::from_static(b"x")).await.unwrap();
        }

        assert!(wait_until(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 10).await);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn single_worker_preserves_publish_order() {
        let bus = MemoryEventBus::new(limits(1, 64));
        let seen = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let seen2 = seen.clone();
        bus.subscribe(
            "t",
            Arc::new(FnHandler(move |d: Delivery| {
                let seen = seen2.clone();
                async move {
                    seen.lock().push(d.payload);
                    Verdict::Ack
                }
            })),
        )
        .await
        .unwrap();

        for i in 0..5u8 {
            bus.publish("t", Bytes::copy_from_slice(&[i])).await.unwrap();
        }

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 5).await);
        let order: Vec<u8> = seen.lock().iter().map(|b| b[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn closed_bus_rejects_publishes() {
        let bus = MemoryEventBus::new(limits(1, 4));
        bus.close().await.unwrap();
        assert!(bus.publish("t", Bytes::from_static(b"x")).await.is_err());
    }
}
