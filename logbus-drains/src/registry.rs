use crate::drain::Drain;
use crate::http::HttpDrain;
use crate::pool::SyslogDrain;
use dashmap::DashSet;
use logbus_core::BusError;
use logbus_observability::MetricsCollector;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const BAD_HOST_EXPIRY: Duration = Duration::from_secs(300);
const FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Process-wide registry holding at most one drain per destination URL,
/// with a refcount per URL and a quarantine list for hosts that failed to
/// construct.
pub struct DrainRegistry {
    inner: Mutex<RegistryInner>,
    bad_hosts: DashSet<String>,
    metrics: Arc<MetricsCollector>,
    /// Configured per-pool connection cap (`MAX_SYSLOG_CONNECTIONS`);
    /// `None` leaves each pool at its default.
    max_syslog_connections: Option<u32>,
}

#[derive(Default)]
struct RegistryInner {
    drains: HashMap<String, Arc<Drain>>,
    refs: HashMap<String, usize>,
    /// Append-only: deterministic iteration order for flush/metrics
    keys: Vec<String>,
}

impl DrainRegistry {
    pub fn new(
        metrics: Arc<MetricsCollector>,
        max_syslog_connections: Option<u32>,
    ) -> Arc<DrainRegistry> {
        Arc::new(DrainRegistry {
            inner: Mutex::new(RegistryInner::default()),
            bad_hosts: DashSet::new(),
            metrics,
            max_syslog_connections,
        })
    }

    /// Obtain the drain for `url`, constructing it on first reference.
    ///
    /// A URL on the quarantine list produces no drain until the list is
    /// cleared; a URL that fails construction joins the list.
    pub async fn dial(&self, route_id: &str, url: &str) -> Result<Arc<Drain>, BusError> {
        if url.is_empty() {
            return Err(BusError::EmptyDrainUrl);
        }
        if self.bad_hosts.contains(url) {
            return Err(BusError::QuarantinedHost);
        }

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.drains.get(url) {
            let existing = Arc::clone(existing);
            *inner.refs.entry(url.to_string()).or_insert(0) += 1;
            return Ok(existing);
        }

        let drain = if url.starts_with("http://") || url.starts_with("https://") {
            HttpDrain::new(route_id, url).map(Drain::Http)
        } else if url.starts_with("syslog://")
            || url.starts_with("syslog+tcp://")
            || url.starts_with("syslog+udp://")
            || url.starts_with("syslog+tls://")
            || url.starts_with("ssh://")
        {
            SyslogDrain::dial(route_id, url, self.max_syslog_connections)
                .await
                .map(Drain::Syslog)
        } else {
            return Err(BusError::UnsupportedScheme(url.to_string()));
        };

        match drain {
            Ok(drain) => {
                let drain = Arc::new(drain);
                inner.drains.insert(url.to_string(), Arc::clone(&drain));
                inner.refs.insert(url.to_string(), 1);
                inner.keys.push(url.to_string());
                Ok(drain)
            }
            Err(e) => {
                self.bad_hosts.insert(url.to_string());
                Err(e)
            }
        }
    }

    /// Release one reference; the last reference closes the drain.
    pub async fn undial(&self, route_id: &str, url: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        let Some(count) = inner.refs.get_mut(url) else {
            return Err(BusError::RouteNotFound(url.to_string()));
        };
        *count -= 1;
        if *count > 0 {
            return Ok(());
        }
        inner.refs.remove(url);
        inner.keys.retain(|k| k != url);
        if let Some(drain) = inner.drains.remove(url) {
            info!(route = %route_id, url = %url, "Closing drain, last reference removed");
            tokio::spawn(async move { drain.close() });
        }
        Ok(())
    }

    /// Current reference count for a URL (test introspection).
    pub async fn count(&self, url: &str) -> usize {
        self.inner.lock().await.refs.get(url).copied().unwrap_or(0)
    }

    pub async fn flush_all(&self) {
        let drains = self.snapshot().await;
        for drain in drains {
            drain.flush().await;
        }
    }

    pub async fn close_all(&self) {
        let drains = self.snapshot().await;
        for drain in drains {
            drain.close();
        }
    }

    /// Emit one `[metrics]` report line per drain and feed the collector.
    pub async fn report_metrics(&self) {
        let drains = self.snapshot().await;
        for drain in drains {
            if let Drain::Syslog(pool) = drain.as_ref() {
                pool.report_connections();
            }
            let stats = drain.take_stats();
            info!(
                "[metrics] syslog={} max#connections={} count#connections={} measure#pressure={:.4}% count#sent={} count#errors={}",
                stats.url,
                stats.max_connections,
                stats.connections,
                stats.pressure * 100.0,
                stats.sent,
                stats.errors
            );
            if stats.pressure > 0.98 && stats.connections as i64 == stats.max_connections {
                warn!(
                    url = %stats.url,
                    connections = stats.connections,
                    "Connection cap reached with sustained back-pressure; log data may be lost"
                );
            }
            self.metrics
                .drain_sent
                .with_label_values(&[stats.url.as_str()])
                .inc_by(stats.sent);
            self.metrics
                .drain_errors
                .with_label_values(&[stats.url.as_str()])
                .inc_by(stats.errors);
            self.metrics
                .drain_pressure
                .with_label_values(&[stats.url.as_str()])
                .set(stats.pressure);
            self.metrics
                .drain_connections
                .with_label_values(&[stats.url.as_str()])
                .set(stats.connections as i64);
        }
    }

    /// Start the periodic tasks: quarantine expiry and the flush tick.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let registry = Arc::clone(self);
        let clear_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(BAD_HOST_EXPIRY);
            loop {
                tick.tick().await;
                registry.bad_hosts.clear();
            }
        });

        let registry = Arc::clone(self);
        let flush_task = tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                tick.tick().await;
                registry.flush_all().await;
            }
        });

        vec![clear_task, flush_task]
    }

    /// Test hook mirroring the quarantine expiry tick.
    pub fn clear_bad_hosts(&self) {
        self.bad_hosts.clear();
    }

    async fn snapshot(&self) -> Vec<Arc<Drain>> {
        let inner = self.inner.lock().await;
        inner
            .keys
            .iter()
            .filter_map(|k| inner.drains.get(k).cloned())
            .collect()
    }
}
