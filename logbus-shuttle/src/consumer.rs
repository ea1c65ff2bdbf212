use crate::{BUILD_TOPIC, WEB_ROUTER_TOPIC};
use chrono::{DateTime, TimeZone, Utc};
use logbus_core::BusError;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{error, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const LANE_BUFFER: usize = 64;

/// One record pulled off the broker, reduced to what the parsers need.
#[derive(Debug, Clone)]
pub struct BrokerEvent {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Receiving halves of the three fan-out lanes.
pub struct Lanes {
    pub app_logs: mpsc::Receiver<BrokerEvent>,
    pub web_logs: mpsc::Receiver<BrokerEvent>,
    pub build_logs: mpsc::Receiver<BrokerEvent>,
}

/// Sending halves; tests inject events here directly.
#[derive(Clone)]
pub struct LaneSenders {
    pub app_logs: mpsc::Sender<BrokerEvent>,
    pub web_logs: mpsc::Sender<BrokerEvent>,
    pub build_logs: mpsc::Sender<BrokerEvent>,
}

pub fn lane_channels() -> (LaneSenders, Lanes) {
    let (app_tx, app_rx) = mpsc::channel(LANE_BUFFER);
    let (web_tx, web_rx) = mpsc::channel(LANE_BUFFER);
    let (build_tx, build_rx) = mpsc::channel(LANE_BUFFER);
    (
        LaneSenders {
            app_logs: app_tx,
            web_logs: web_tx,
            build_logs: build_tx,
        },
        Lanes {
            app_logs: app_rx,
            web_logs: web_rx,
            build_logs: build_rx,
        },
    )
}

/// Pattern-subscribed consumer that splits broker events into the three
/// lanes. Topics starting with `_` are broker-internal and skipped.
pub struct LogConsumer {
    consumer: Arc<StreamConsumer>,
    stop: Arc<Notify>,
}

impl LogConsumer {
    /// Connect and subscribe to every topic; the poll loop feeds the
    /// returned lanes until the consumer closes or the broker errors.
    pub fn connect(brokers: &[String], group: &str) -> Result<(LogConsumer, Lanes), BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("group.id", group)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("session.timeout.ms", "30000")
            .set("socket.keepalive.enable", "true")
            .create()
            .map_err(|e| BusError::Broker(e.to_string()))?;
        consumer
            .subscribe(&["^.*$"])
            .map_err(|e| BusError::Broker(e.to_string()))?;
        info!(brokers = %brokers.join(","), group = %group, "Consumer subscribed to all topics");

        let consumer = Arc::new(consumer);
        let stop = Arc::new(Notify::new());
        let (senders, lanes) = lane_channels();
        tokio::spawn(run_pooler(
            Arc::clone(&consumer),
            Arc::clone(&stop),
            senders,
        ));
        Ok((LogConsumer { consumer, stop }, lanes))
    }

    /// Re-subscribe the topic pattern so newly created topics are picked up.
    pub fn refresh(&self) -> Result<(), BusError> {
        self.consumer
            .subscribe(&["^.*$"])
            .map_err(|e| BusError::Broker(e.to_string()))
    }

    pub fn close(&self) {
        self.stop.notify_one();
    }
}

async fn run_pooler(consumer: Arc<StreamConsumer>, stop: Arc<Notify>, senders: LaneSenders) {
    loop {
        tokio::select! {
            _ = stop.notified() => return,
            polled = timeout(POLL_INTERVAL, consumer.recv()) => {
                let result = match polled {
                    Err(_) => continue,
                    Ok(r) => r,
                };
                let message = match result {
                    Ok(m) => m,
                    Err(e) => {
                        // Broker errors close the consumer; process-level
                        // supervision restarts the loop.
                        error!(error = %e, "Broker error, closing consumer");
                        return;
                    }
                };
                let topic = message.topic().to_string();
                if topic.starts_with('_') {
                    continue;
                }
                let event = BrokerEvent {
                    payload: message.payload().unwrap_or_default().to_vec(),
                    timestamp: event_time(&message),
                    topic: topic.clone(),
                };
                drop(message);
                let lane = match topic.as_str() {
                    WEB_ROUTER_TOPIC => &senders.web_logs,
                    BUILD_TOPIC => &senders.build_logs,
                    _ => &senders.app_logs,
                };
                if lane.send(event).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn event_time(message: &impl Message) -> DateTime<Utc> {
    message
        .timestamp()
        .to_millis()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}
