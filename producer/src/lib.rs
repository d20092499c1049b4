use anyhow::Context;
use clap::{Parser, ValueEnum};
use drizzle::settings::DEFAULT_PROPERTIES_FILE;
use drizzle::{MeterRegistry, ProducerSettings, PRODUCE_RATE_METER};
use ractor::{Actor, ActorRef};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::info;

use crate::aggregator::ProgressSink;
use crate::backend::BrokerBackend;
use crate::channel::publish_channel;
use crate::kafka::KafkaPublisher;
use crate::loopback::LoopbackBroker;
use crate::supervisor::{LoadSupervisor, LoadSupervisorArgs, LoadSupervisorMessage};

pub mod aggregator;
pub mod backend;
pub mod channel;
pub mod generator;
pub mod kafka;
pub mod loopback;
pub mod message;
pub mod shutdown;
pub mod supervisor;

/// Registry name of the load supervisor actor.
pub const LOAD_SUPERVISOR_NAME: &str = "drizzle.producer.supervisor";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Publish to the Kafka cluster at `broker_connect`
    Kafka,
    /// Acknowledge in-process. Nothing leaves the machine
    Loopback,
}

/// Synthetic load generator for a Kafka topic
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    /// Path to the producer properties file
    #[arg(short, long, default_value = DEFAULT_PROPERTIES_FILE)]
    pub config: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Kafka)]
    pub backend: Backend,

    /// Number of generator tasks, overrides the `generators` property
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub generators: Option<u64>,

    /// Loopback only: reject every Nth message to exercise the failure path
    #[arg(long, default_value_t = 0)]
    pub fail_every: u64,
}

impl Arguments {
    /// Apply command line overrides on top of the resolved properties.
    pub fn apply_overrides(&self, settings: &mut ProducerSettings) -> anyhow::Result<()> {
        if let Some(generators) = self.generators {
            settings.generators =
                usize::try_from(generators).context("--generators is too large")?;
        }
        Ok(())
    }
}

/// Provision the topic when needed, wire the publish channel to `backend` and
/// start the load supervisor. Errors here are fatal to startup.
pub async fn start_load(
    settings: &ProducerSettings,
    backend: Backend,
    fail_every: u64,
    registry: &MeterRegistry,
    progress: Box<dyn ProgressSink>,
) -> anyhow::Result<(ActorRef<LoadSupervisorMessage>, JoinHandle<()>)> {
    let (channel, broker_end) = publish_channel(settings.queue_capacity);

    let backend = match backend {
        Backend::Kafka => {
            kafka::ensure_topic(settings).await?;
            BrokerBackend::Kafka(KafkaPublisher::connect(settings, broker_end)?)
        }
        Backend::Loopback => BrokerBackend::loopback(
            LoopbackBroker::new(settings.num_partitions).failing_every(fail_every),
            broker_end,
        ),
    };

    let args = LoadSupervisorArgs {
        topic: settings.topic.clone(),
        sleep_time: settings.sleep_time,
        generators: settings.generators,
        channel,
        backend,
        meter: registry.get_or_register(PRODUCE_RATE_METER),
        progress,
    };

    let (supervisor, handle) =
        Actor::spawn(Some(LOAD_SUPERVISOR_NAME.to_string()), LoadSupervisor, args)
            .await
            .context("Failed to start the load supervisor")?;

    info!("Load started against {}", settings.broker_connect);
    Ok((supervisor, handle))
}
