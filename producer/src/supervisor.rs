use crate::aggregator::{AckAggregator, ProgressSink};
use crate::backend::BrokerBackend;
use crate::channel::PublishChannel;
use crate::generator::MessageGenerator;
use drizzle::{Meter, MeterSnapshot};
use ractor::{async_trait, Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Owns the load loop: the broker backend, the acknowledgment aggregator and
/// the generators. All of them run as detached tasks for the life of the actor.
pub struct LoadSupervisor;

pub struct LoadSupervisorArgs {
    pub topic: String,
    pub sleep_time: Duration,
    pub generators: usize,
    pub channel: PublishChannel,
    pub backend: BrokerBackend,
    /// Throughput meter, marked once per delivery outcome
    pub meter: Arc<Meter>,
    pub progress: Box<dyn ProgressSink>,
}

pub struct LoadSupervisorState {
    meter: Arc<Meter>,
    submitted: Arc<AtomicU64>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoadStats {
    /// Messages accepted by the submission queue across all generators
    pub submitted: u64,
    /// Delivery outcomes seen, successes and failures alike
    pub throughput: MeterSnapshot,
}

pub enum LoadSupervisorMessage {
    Stats(RpcReplyPort<LoadStats>),
}

#[async_trait]
impl Actor for LoadSupervisor {
    type Msg = LoadSupervisorMessage;
    type State = LoadSupervisorState;
    type Arguments = LoadSupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: LoadSupervisorArgs,
    ) -> Result<Self::State, ActorProcessingErr> {
        debug!("{myself:?} starting");

        let PublishChannel {
            submitter,
            outcomes,
        } = args.channel;
        let submitted = Arc::new(AtomicU64::new(0));
        let mut tasks = Vec::with_capacity(args.generators + 2);

        tasks.push(tokio::spawn(args.backend.run()));
        tasks.push(tokio::spawn(
            AckAggregator::new(outcomes, args.meter.clone(), args.progress).run(),
        ));

        for id in 0..args.generators {
            let generator = MessageGenerator::new(
                id,
                args.topic.clone(),
                args.sleep_time,
                submitter.clone(),
                submitted.clone(),
            );
            tasks.push(tokio::spawn(generator.run()));
        }

        info!(
            "Started {} generator(s) on topic \"{}\"",
            args.generators, args.topic
        );

        Ok(LoadSupervisorState {
            meter: args.meter,
            submitted,
            tasks,
        })
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // no drain, whatever is in flight is dropped
        for task in state.tasks.drain(..) {
            task.abort();
        }
        debug!("Successfully stopped {myself:?}");
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            LoadSupervisorMessage::Stats(reply) => {
                let stats = LoadStats {
                    submitted: state.submitted.load(Ordering::Relaxed),
                    throughput: state.meter.snapshot(),
                };
                if reply.send(stats).is_err() {
                    warn!("Stats requester went away before the reply");
                }
            }
        }
        Ok(())
    }
}
