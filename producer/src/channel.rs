//! The publish channel between the load loop and a broker backend.
//!
//! Submission is bounded, so a slow backend pushes back on the generators.
//! Outcomes flow back on two unbounded channels, one per kind, so that a broker
//! callback thread never has to wait on the aggregator.

use crate::message::{Delivered, DeliveryFailure, ProduceMessage, SendOutcome};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

/// Cloneable submission handle, one per generator.
#[derive(Clone, Debug)]
pub struct Submitter {
    input: mpsc::Sender<ProduceMessage>,
}

impl Submitter {
    /// Hand a message to the broker backend. Waits while the queue is full.
    pub async fn submit(&self, message: ProduceMessage) -> Result<(), SendError<ProduceMessage>> {
        self.input.send(message).await
    }
}

/// The two outcome streams, drained by the acknowledgment aggregator.
#[derive(Debug)]
pub struct Outcomes {
    pub successes: mpsc::UnboundedReceiver<Delivered>,
    pub failures: mpsc::UnboundedReceiver<DeliveryFailure>,
}

/// Client half of the publish channel.
#[derive(Debug)]
pub struct PublishChannel {
    pub submitter: Submitter,
    pub outcomes: Outcomes,
}

/// Broker half of the publish channel, owned by a backend.
#[derive(Debug)]
pub struct BrokerEnd {
    pub input: mpsc::Receiver<ProduceMessage>,
    pub reports: OutcomeReporter,
}

/// Sending side of both outcome channels.
#[derive(Clone, Debug)]
pub struct OutcomeReporter {
    successes: mpsc::UnboundedSender<Delivered>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
}

impl OutcomeReporter {
    /// Route an outcome to its channel. Returns false once the aggregator is gone.
    pub fn report(&self, outcome: SendOutcome) -> bool {
        match outcome {
            SendOutcome::Success(delivered) => self.successes.send(delivered).is_ok(),
            SendOutcome::Failure(failure) => self.failures.send(failure).is_ok(),
        }
    }
}

pub fn publish_channel(capacity: usize) -> (PublishChannel, BrokerEnd) {
    let (input_tx, input_rx) = mpsc::channel(capacity.max(1));
    let (success_tx, success_rx) = mpsc::unbounded_channel();
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();

    let client = PublishChannel {
        submitter: Submitter { input: input_tx },
        outcomes: Outcomes {
            successes: success_rx,
            failures: failure_rx,
        },
    };

    let broker = BrokerEnd {
        input: input_rx,
        reports: OutcomeReporter {
            successes: success_tx,
            failures: failure_tx,
        },
    };

    (client, broker)
}
