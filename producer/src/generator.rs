use crate::channel::Submitter;
use crate::message::ProduceMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Builds messages at a fixed pace and hands them to the publish channel without
/// waiting for their acknowledgment.
///
/// Each generator owns its sequence counter, so keys are only unique within one
/// generator. Submission order equals generation order.
pub struct MessageGenerator {
    id: usize,
    topic: String,
    pacing: Duration,
    sequence: u64,
    submitter: Submitter,
    /// Shared total of messages the publish channel accepted
    submitted: Arc<AtomicU64>,
}

impl MessageGenerator {
    pub fn new(
        id: usize,
        topic: String,
        pacing: Duration,
        submitter: Submitter,
        submitted: Arc<AtomicU64>,
    ) -> Self {
        MessageGenerator {
            id,
            topic,
            pacing,
            sequence: 0,
            submitter,
            submitted,
        }
    }

    /// Build the next message. The counter advances even if the message never
    /// makes it into the channel.
    pub fn next_message(&mut self) -> ProduceMessage {
        let message = ProduceMessage::new(&self.topic, self.sequence);
        self.sequence += 1;
        message
    }

    /// Generate until the process exits. Only returns if the broker side of the
    /// channel has gone away.
    pub async fn run(mut self) {
        info!(
            "Generator {} publishing to \"{}\" every {}",
            self.id,
            self.topic,
            humantime::format_duration(self.pacing)
        );

        loop {
            let message = self.next_message();

            // blocks while the backend applies backpressure
            if self.submitter.submit(message).await.is_err() {
                debug!("Generator {} stopping, publish channel closed", self.id);
                return;
            }
            self.submitted.fetch_add(1, Ordering::Relaxed);

            if self.pacing.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.pacing).await;
            }
        }
    }
}
