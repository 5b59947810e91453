use async_trait::async_trait;
use coachline_core::ports::EventPort;
use coachline_core::BoxError;
use coachline_shared::models::events::EVENT_SOURCE;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: "source",
            value: Some(EVENT_SOURCE),
        });
        let record = FutureRecord::to(topic).key(key).payload(payload).headers(headers);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent {} to {}: partition {} offset {}",
                    key, topic, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send {} to {}: {}", key, topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventPort for EventProducer {
    async fn publish(&self, topic: &str, event_type: &str, payload: &Value) -> Result<(), BoxError> {
        let body = serde_json::to_string(payload)?;
        EventProducer::publish(self, topic, event_type, &body).await?;
        Ok(())
    }
}
