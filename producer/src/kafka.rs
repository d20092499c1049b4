//! Kafka backend for the publish channel, built on librdkafka.

use crate::channel::{BrokerEnd, OutcomeReporter};
use crate::message::{Delivered, DeliveryFailure, ProduceMessage, SendOutcome};
use anyhow::{bail, Context};
use drizzle::ProducerSettings;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, DefaultClientContext};
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, ProducerContext, ThreadedProducer};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long to wait before retrying a record librdkafka had no room for.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(10);

const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// librdkafka configuration for the load producer.
pub fn producer_config(settings: &ProducerSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", &settings.broker_connect)
        .set("client.id", Uuid::new_v4().to_string())
        .set("batch.num.messages", settings.flush_msg_count.to_string())
        .set("linger.ms", settings.flush_frequency.as_millis().to_string());
    config
}

/// Create the topic with the configured partition count. An existing topic is
/// left as is, so running this twice is harmless.
pub async fn ensure_topic(settings: &ProducerSettings) -> anyhow::Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &settings.broker_connect)
        .create()
        .context("Failed to create Kafka admin client")?;

    let partitions = i32::try_from(settings.num_partitions)
        .context("Partition count does not fit the admin API")?;
    let topic = NewTopic::new(&settings.topic, partitions, TopicReplication::Fixed(1));
    let options = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

    let results = admin
        .create_topics(&[topic], &options)
        .await
        .with_context(|| format!("Failed to reach {} to create topics", settings.broker_connect))?;

    for result in results {
        match result {
            Ok(name) => info!("Created topic \"{name}\" with {partitions} partition(s)"),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                info!("Topic \"{name}\" already exists")
            }
            Err((name, code)) => bail!("Failed to create topic \"{name}\": {code}"),
        }
    }
    Ok(())
}

/// Forwards librdkafka delivery reports onto the outcome channels.
pub struct OutcomeContext {
    reports: OutcomeReporter,
}

impl ClientContext for OutcomeContext {}

impl ProducerContext for OutcomeContext {
    type DeliveryOpaque = Box<ProduceMessage>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, message: Self::DeliveryOpaque) {
        let message = *message;
        let outcome = match delivery_result {
            Ok(delivered) => SendOutcome::Success(Delivered {
                message,
                partition: delivered.partition(),
                offset: delivered.offset(),
            }),
            Err((error, _)) => SendOutcome::Failure(DeliveryFailure {
                message,
                error: error.to_string(),
            }),
        };

        // nobody is listening anymore during teardown
        if !self.reports.report(outcome) {
            debug!("Dropping delivery report, outcome channels closed");
        }
    }
}

pub struct KafkaPublisher {
    producer: ThreadedProducer<OutcomeContext>,
    input: mpsc::Receiver<ProduceMessage>,
    reports: OutcomeReporter,
}

impl KafkaPublisher {
    pub fn connect(settings: &ProducerSettings, broker: BrokerEnd) -> anyhow::Result<Self> {
        let BrokerEnd { input, reports } = broker;

        let producer: ThreadedProducer<OutcomeContext> = producer_config(settings)
            .create_with_context(OutcomeContext {
                reports: reports.clone(),
            })
            .with_context(|| format!("Failed to create producer for {}", settings.broker_connect))?;

        Ok(KafkaPublisher {
            producer,
            input,
            reports,
        })
    }

    /// Move messages from the submission queue into librdkafka until the queue closes.
    pub async fn run(mut self) {
        info!("Kafka publisher started");
        while let Some(message) = self.input.recv().await {
            self.publish(message).await;
        }
        debug!("Submission queue closed, Kafka publisher exiting");
    }

    async fn publish(&self, message: ProduceMessage) {
        let topic = message.topic.clone();
        let key = message.key_bytes();
        let payload = message.payload.clone();

        let mut record = BaseRecord::with_opaque_to(topic.as_str(), Box::new(message))
            .key(key.as_str())
            .payload(payload.as_str());

        loop {
            match self.producer.send(record) {
                Ok(()) => return,
                // librdkafka's local queue is full: hold the record, which in turn
                // holds the submission queue, until it drains
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    record = returned;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((error, returned)) => {
                    warn!("Failed to enqueue message {}: {error}", returned.delivery_opaque.key);
                    self.reports.report(SendOutcome::Failure(DeliveryFailure {
                        message: *returned.delivery_opaque,
                        error: error.to_string(),
                    }));
                    return;
                }
            }
        }
    }
}
