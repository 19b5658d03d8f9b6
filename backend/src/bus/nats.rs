//! JetStream-backed bus.
//!
//! One stream holds every subject; each subscription is a durable pull
//! consumer named after its topic, so restarts resume where the consumer
//! left off. Nacks map to NAK-with-delay and let the server redeliver.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_nats::jetstream::{self, AckKind, consumer::PullConsumer};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use bosun_common::retry::RetryPolicy;

use super::{BusLimits, Delivery, EventBus, MessageHandler, PublishHandle, Verdict};

pub struct NatsEventBus {
    jetstream: jetstream::Context,
    stream_name: String,
    limits: BusLimits,
    redelivery: RetryPolicy,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl NatsEventBus {
    /// Connect the JetStream context and ensure the stream covering all
    /// given subjects exists. `redelivery` shapes the NAK delay curve for
    /// nacked deliveries.
    pub async fn connect(
        client: async_nats::Client,
        stream_name: &str,
        subjects: Vec<String>,
        limits: BusLimits,
        redelivery: RetryPolicy,
    ) -> Result<Self> {
        let jetstream = jetstream::new(client);

        let _stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.to_string(),
                subjects,
                ..Default::default()
            })
            .await
            .context("failed to get or create stream")?;
        tracing::info!(stream = %stream_name, "connected to stream");

        Ok(Self {
            jetstream,
            stream_name: stream_name.to_string(),
            limits,
            redelivery,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn consumer_name(topic: &str) -> String {
        topic.replace('.', "-")
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<PublishHandle> {
        let ack_future = self
            .jetstream
            .publish(topic.to_string(), payload)
            .await
            .context("failed to publish event")?;

        let (tx, handle) = PublishHandle::pending();
        tokio::spawn(async move {
            let result = ack_future
                .await
                .map(|_| ())
                .map_err(|e| anyhow!(e).context("failed to get publish ack"));
            let _ = tx.send(result);
        });
        Ok(handle)
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let stream = self
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .context("failed to get stream")?;

        let consumer_name = Self::consumer_name(topic);
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    filter_subject: topic.to_string(),
                    max_ack_pending: self.limits.max_outstanding_messages as i64,
                    ..Default::default()
                },
            )
            .await
            .context("failed to create consumer")?;
        tracing::info!(consumer = %consumer_name, topic = %topic, "consumer ready");

        let mut messages = consumer
            .messages()
            .await
            .context("failed to open message stream")?;

        let semaphore = Arc::new(Semaphore::new(self.limits.max_concurrent_handlers));
        let cancel = self.cancel.clone();
        let redelivery = self.redelivery;
        let topic = topic.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!(topic = %topic, "subscription loop stopping");
                        break;
                    }
                    msg = messages.next() => {
                        match msg {
                            Some(Ok(message)) => {
                                let permit = match semaphore.clone().acquire_owned().await {
                                    Ok(p) => p,
                                    Err(_) => break,
                                };
                                let handler = handler.clone();
                                let topic = topic.clone();
                                tokio::spawn(async move {
                                    let attempt = message
                                        .info()
                                        .map(|i| i.delivered.max(1) as u32)
                                        .unwrap_or(1);
                                    let verdict = handler
                                        .handle(Delivery {
                                            topic,
                                            payload: message.payload.clone(),
                                            attempt,
                                        })
                                        .await;
                                    let ack = match verdict {
                                        Verdict::Ack => message.ack().await,
                                        Verdict::Nack => {
                                            let delay: Duration =
                                                redelivery.delay_for(attempt.saturating_sub(1));
                                            message.ack_with(AckKind::Nak(Some(delay))).await
                                        }
                                    };
                                    if let Err(e) = ack {
                                        tracing::error!(?e, "failed to ack message");
                                    }
                                    drop(permit);
                                });
                            }
                            Some(Err(e)) => {
                                tracing::error!(?e, "error receiving message");
                            }
                            None => {
                                tracing::warn!("message stream ended unexpectedly");
                                break;
                            }
                        }
                    }
                }
            }
        });
        self.tasks.lock().push(task);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}
