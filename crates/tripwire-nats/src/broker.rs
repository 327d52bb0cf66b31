//! JetStream-backed task broker.

use async_nats::jetstream::{
    self, consumer::pull::Config as ConsumerConfig, stream::Config as StreamConfig,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};
use tripwire_core::ports::{Acknowledge, InboundMessage, InboundStream, TaskBroker};
use tripwire_core::{Error, Result, TaskMessage};

use crate::config::NatsConfig;
use crate::metrics::BrokerMetrics;

/// Task broker on a NATS JetStream work-queue stream.
#[derive(Clone)]
pub struct NatsTaskBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<AtomicBool>,
}

impl NatsTaskBroker {
    /// Connect with the given configuration and ensure the task stream exists.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        if config.username.is_empty() || config.password.is_empty() {
            return Err(Error::Config(
                "Cannot access the broker: no account information".to_string(),
            ));
        }

        let urls = config.urls.join(",");
        info!("Connecting to NATS at {}", urls);

        let client = async_nats::ConnectOptions::with_user_and_password(
            config.username.clone(),
            config.password.clone(),
        )
        .connection_timeout(config.connection_timeout)
        .request_timeout(Some(config.request_timeout))
        .connect(&urls)
        .await
        .map_err(|e| Error::Broker(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let stream_config = StreamConfig {
            name: config.stream_name.clone(),
            subjects: vec![format!("{}.>", config.subject_prefix)],
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            max_age: config.max_age,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| Error::Broker(format!("Failed to create stream: {}", e)))?;

        info!(stream = %config.stream_name, "Connected to NATS and initialized JetStream");

        Ok(Self {
            client,
            jetstream,
            config,
            metrics: BrokerMetrics::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Graceful shutdown - drain the connection.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Draining broker connection");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.client.drain().await {
            error!("Error draining NATS connection: {}", e);
        }

        let snapshot = self.metrics.snapshot();
        info!(
            published = snapshot.tasks_published,
            publish_failures = snapshot.publish_failures,
            received = snapshot.inbound_received,
            unacked = snapshot.unacked(),
            queue_resets = snapshot.queue_resets,
            by_topic = ?snapshot.published_by_topic,
            "NATS connection drained"
        );
        Ok(())
    }

    async fn stream(&self) -> Result<jetstream::stream::Stream> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| Error::Broker(format!("Failed to get stream: {}", e)))
    }

    fn consumer_config(&self, topic: &str) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: Some(self.config.queue_name_for(topic)),
            filter_subject: self.config.subject_for(topic),
            max_deliver: self.config.max_deliver,
            ack_wait: self.config.ack_wait,
            ..Default::default()
        }
    }
}

struct NatsAck {
    message: jetstream::Message,
    metrics: Arc<BrokerMetrics>,
}

#[async_trait]
impl Acknowledge for NatsAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| Error::Broker(format!("Failed to ack message: {}", e)))?;
        self.metrics.inbound_acked();
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for NatsTaskBroker {
    async fn queue_exists(&self, topic: &str) -> Result<bool> {
        let stream = self.stream().await?;
        let name = self.config.queue_name_for(topic);

        match stream.get_consumer::<ConsumerConfig>(&name).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(topic = %topic, queue = %name, error = %e, "Queue lookup failed");
                Ok(false)
            }
        }
    }

    async fn recreate_queue(&self, topic: &str) -> Result<()> {
        let stream = self.stream().await?;
        let name = self.config.queue_name_for(topic);

        match stream.delete_consumer(&name).await {
            Ok(_) => debug!(topic = %topic, queue = %name, "Queue deleted"),
            Err(e) => debug!(topic = %topic, queue = %name, error = %e, "No queue to delete"),
        }

        let created = stream.create_consumer(self.consumer_config(topic)).await;
        self.metrics.queue_reset(created.is_ok());
        created.map_err(|e| Error::QueueAdmin {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        info!(topic = %topic, queue = %name, "Queue re-created");
        Ok(())
    }

    async fn publish(&self, message: &TaskMessage) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Broker(
                "Cannot publish: shutdown in progress".to_string(),
            ));
        }

        let subject = self.config.subject_for(&message.topic);
        let payload = serde_json::to_vec(message)?;
        let payload_len = payload.len() as u64;

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, message.uid.as_str());

        debug!(subject = %subject, uid = %message.uid, "Publishing task");

        let publish_error = |reason: String| Error::Publish {
            uid: message.uid.to_string(),
            reason,
        };

        match self
            .jetstream
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
        {
            Ok(ack_future) => {
                if let Err(e) = ack_future.await {
                    self.metrics.publish_failed();
                    return Err(publish_error(format!("Failed to confirm publish: {}", e)));
                }
                self.metrics.task_published(&message.topic, payload_len);
                Ok(())
            }
            Err(e) => {
                self.metrics.publish_failed();
                Err(publish_error(format!("Failed to publish to {}: {}", subject, e)))
            }
        }
    }

    async fn listen(&self, topic: &str) -> Result<InboundStream> {
        let stream = self.stream().await?;
        let name = self.config.queue_name_for(topic);

        let consumer = stream
            .get_or_create_consumer(&name, self.consumer_config(topic))
            .await
            .map_err(|e| Error::Broker(format!("Failed to create consumer {}: {}", name, e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::Broker(format!("Failed to get messages: {}", e)))?;

        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();

        let inbound = messages.map(move |msg_result| {
            if shutdown.load(Ordering::SeqCst) {
                return Err(Error::Broker("Shutdown in progress".to_string()));
            }

            match msg_result {
                Ok(msg) => {
                    metrics.inbound_received();
                    let payload = msg.payload.to_vec();
                    let acker = NatsAck {
                        message: msg,
                        metrics: metrics.clone(),
                    };
                    Ok(InboundMessage::new(payload, Box::new(acker)))
                }
                Err(e) => {
                    warn!(error = %e, "Message error");
                    Err(Error::Broker(format!("Message error: {}", e)))
                }
            }
        });

        Ok(Box::pin(inbound))
    }
}
