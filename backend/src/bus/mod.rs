//! Publish/subscribe transport abstraction.
//!
//! At-least-once semantics: a publish is durable once its handle acks, and a
//! subscription handler must return `Ack` to consume a delivery. Nacked
//! deliveries come back after a backoff. Handlers run on a bounded worker
//! pool per subscription with outstanding-message backpressure.

pub mod memory;
pub mod nats;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ack,
    Nack,
}

/// One delivered message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
    /// 1-based delivery attempt for this message.
    pub attempt: u32,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Verdict;
}

/// Resolves once the broker has acknowledged durability of a publish.
pub struct PublishHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl PublishHandle {
    pub fn pending() -> (oneshot::Sender<Result<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub fn immediate(result: Result<()>) -> Self {
        let (tx, handle) = Self::pending();
        let _ = tx.send(result);
        handle
    }

    pub async fn acked(self) -> Result<()> {
        self.rx.await.context("publish ack signal dropped")?
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand the payload to the broker. The returned handle acks when the
    /// broker has made the message durable.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishHandle>;

    /// Attach a handler to a topic. Deliveries begin immediately and keep
    /// flowing until the bus is closed.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Drain in-flight publishes and stop subscription loops.
    async fn close(&self) -> Result<()>;
}

/// Adapter so tests and small subscribers can pass a closure.
#[allow(dead_code)]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Verdict> + Send,
{
    async fn handle(&self, delivery: Delivery) -> Verdict {
        (self.0)(delivery).await
    }
}

/// Worker pool and backpressure limits for one bus instance.
#[derive(Debug, Clone, Copy)]
pub struct BusLimits {
    pub max_concurrent_handlers: usize,
    pub max_outstanding_messages: usize,
}

impl Default for BusLimits {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 8,
            max_outstanding_messages: 256,
        }
    }
}

impl From<&bosun_common::args::PubSubArgs> for BusLimits {
    fn from(args: &bosun_common::args::PubSubArgs) -> Self {
        Self {
            max_concurrent_handlers: args.max_concurrent_handlers,
            max_outstanding_messages: args.max_outstanding_messages,
        }
    }
}
