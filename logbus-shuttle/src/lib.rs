pub mod consumer;
pub mod producer;
pub mod session;
pub mod shuttle;

pub use consumer::{lane_channels, BrokerEvent, LaneSenders, Lanes, LogConsumer};
pub use producer::LogProducer;
pub use session::TailSession;
pub use shuttle::Shuttle;

/// Topics with fixed meaning on the bus; everything else is a space.
pub const WEB_ROUTER_TOPIC: &str = "web-router-logs";
pub const BUILD_TOPIC: &str = "build-logs";
pub const ISTIO_TOPIC: &str = "istio-access-logs";
