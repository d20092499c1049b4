use std::fmt;

/// A single message bound for the broker. Built fresh for every send and owned by
/// the publish channel once submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProduceMessage {
    pub topic: String,
    /// Sequence number of the generator that built this message
    pub key: u64,
    pub payload: String,
}

impl ProduceMessage {
    pub fn new(topic: &str, key: u64) -> Self {
        ProduceMessage {
            topic: topic.to_string(),
            key,
            payload: format!("message {key}!"),
        }
    }

    /// Key bytes as sent on the wire.
    pub fn key_bytes(&self) -> String {
        self.key.to_string()
    }
}

/// Acknowledgment that the broker accepted a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub message: ProduceMessage,
    pub partition: i32,
    pub offset: i64,
}

/// A send the broker rejected or that timed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub message: ProduceMessage,
    pub error: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to deliver message {} to topic \"{}\": {}",
            self.message.key, self.message.topic, self.error
        )
    }
}

/// Result of one submitted message, consumed exactly once by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Success(Delivered),
    Failure(DeliveryFailure),
}
