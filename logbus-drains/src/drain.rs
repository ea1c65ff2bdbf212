use crate::http::HttpDrain;
use crate::pool::SyslogDrain;
use logbus_syslog::Packet;

/// A long-lived emitter bound to a single destination URL.
///
/// The registry owns exactly one `Drain` per distinct URL; routes hold a
/// shared handle. The two variants differ in buffering and transport but
/// share the same small capability set.
pub enum Drain {
    Http(HttpDrain),
    Syslog(SyslogDrain),
}

impl Drain {
    pub fn id(&self) -> &str {
        match self {
            Drain::Http(d) => d.id(),
            Drain::Syslog(d) => d.id(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Drain::Http(d) => d.url(),
            Drain::Syslog(d) => d.url(),
        }
    }

    /// Enqueue a packet for delivery. Blocks under back-pressure; stalling
    /// one destination must not drop others.
    pub async fn send(&self, packet: Packet) {
        match self {
            Drain::Http(d) => d.send(packet).await,
            Drain::Syslog(d) => d.send(packet).await,
        }
    }

    /// Push buffered records out. A no-op for syslog drains (they are live).
    pub async fn flush(&self) {
        match self {
            Drain::Http(d) => d.flush().await,
            Drain::Syslog(_) => {}
        }
    }

    pub fn close(&self) {
        match self {
            Drain::Http(d) => d.close(),
            Drain::Syslog(d) => d.close(),
        }
    }

    /// Snapshot delivery counters since the last call (counters reset).
    pub fn take_stats(&self) -> DrainStats {
        match self {
            Drain::Http(d) => d.take_stats(),
            Drain::Syslog(d) => d.take_stats(),
        }
    }
}

/// One reporting interval's worth of delivery counters for a drain.
#[derive(Debug, Clone)]
pub struct DrainStats {
    pub url: String,
    /// -1 for HTTP drains (no connection cap)
    pub max_connections: i64,
    pub connections: u64,
    pub pressure: f64,
    pub sent: u64,
    pub errors: u64,
}
