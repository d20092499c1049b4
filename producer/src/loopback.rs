//! In-process stand-in for a broker. Acknowledges every submission in order,
//! optionally rejecting every Nth one.

use crate::channel::BrokerEnd;
use crate::message::{Delivered, DeliveryFailure, ProduceMessage, SendOutcome};
use std::collections::HashMap;
use tracing::{debug, info};

pub const INJECTED_FAILURE: &str = "injected failure";

pub struct LoopbackBroker {
    partitions: u32,
    /// Next offset per partition, filled in as partitions see their first message
    offsets: HashMap<u32, i64>,
    fail_every: Option<u64>,
    received: u64,
}

impl LoopbackBroker {
    pub fn new(partitions: u32) -> Self {
        LoopbackBroker {
            partitions: partitions.max(1),
            offsets: HashMap::new(),
            fail_every: None,
            received: 0,
        }
    }

    /// Reject every `n`th submission. `0` disables failures.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn acknowledge(&mut self, message: ProduceMessage) -> SendOutcome {
        self.received += 1;

        if let Some(n) = self.fail_every {
            if self.received % n == 0 {
                return SendOutcome::Failure(DeliveryFailure {
                    message,
                    error: INJECTED_FAILURE.to_string(),
                });
            }
        }

        let partition = (message.key % u64::from(self.partitions)) as u32;
        let next = self.offsets.entry(partition).or_insert(0);
        let offset = *next;
        *next += 1;

        SendOutcome::Success(Delivered {
            message,
            partition: partition as i32,
            offset,
        })
    }

    /// Serve the broker end of a publish channel until either side goes away.
    pub async fn run(mut self, mut broker: BrokerEnd) {
        info!(
            "Loopback broker serving {} partition(s), no messages leave this process",
            self.partitions
        );

        while let Some(message) = broker.input.recv().await {
            if !broker.reports.report(self.acknowledge(message)) {
                break;
            }
        }
        debug!("Loopback broker stopped after {} messages", self.received);
    }
}
