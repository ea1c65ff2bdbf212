use logbus_core::{BusError, LogSpec};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;

/// Publishes records onto the bus; backs `POST /log-events`.
pub struct LogProducer {
    producer: FutureProducer,
}

impl LogProducer {
    pub fn connect(brokers: &[String], client_id: &str) -> Result<LogProducer, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("client.id", client_id)
            .set("message.timeout.ms", "6000")
            .create()
            .map_err(|e| BusError::Broker(e.to_string()))?;
        Ok(LogProducer { producer })
    }

    /// Publish an envelope to its own topic.
    pub async fn add_log(&self, spec: &LogSpec) -> Result<(), BusError> {
        let payload = serde_json::to_vec(spec)?;
        let record = FutureRecord::to(&spec.topic).payload(&payload).key("message");
        self.producer
            .send(record, Timeout::After(Duration::from_secs(6)))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BusError::Broker(e.to_string()))
    }
}
