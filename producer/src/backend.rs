use crate::channel::BrokerEnd;
use crate::kafka::KafkaPublisher;
use crate::loopback::LoopbackBroker;

/// Whatever sits on the broker end of the publish channel.
pub enum BrokerBackend {
    Kafka(KafkaPublisher),
    Loopback { broker: LoopbackBroker, end: BrokerEnd },
}

impl BrokerBackend {
    pub fn loopback(broker: LoopbackBroker, end: BrokerEnd) -> Self {
        BrokerBackend::Loopback { broker, end }
    }

    pub async fn run(self) {
        match self {
            BrokerBackend::Kafka(publisher) => publisher.run().await,
            BrokerBackend::Loopback { broker, end } => broker.run(end).await,
        }
    }
}
