use crate::consumer::{BrokerEvent, Lanes};
use crate::ISTIO_TOPIC;
use logbus_core::envelope::{container_to_proc, syslog_tag};
use logbus_core::humanize::pod_phase_to_human_readable;
use logbus_core::parse::{parse_app_log, parse_build_log, parse_istio_log, parse_router_log};
use logbus_core::route::site_key;
use logbus_core::{BusError, LogEnvelope, Route};
use logbus_drains::{Drain, DrainRegistry};
use logbus_observability::MetricsCollector;
use logbus_store::Storage;
use logbus_syslog::{Facility, Packet, Severity};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One installed subscriber endpoint for a routing key.
#[derive(Clone)]
pub struct Destination {
    route: Route,
    drain: Arc<Drain>,
}

#[derive(Default)]
struct RouteTable {
    map: HashMap<String, Vec<Destination>>,
    keys: Vec<String>,
}

/// The fan-out engine: reads the three lanes, parses each record into an
/// envelope, looks up matching drains, and emits one syslog packet per
/// destination.
pub struct Shuttle {
    routes: Mutex<RouteTable>,
    registry: Arc<DrainRegistry>,
    storage: Arc<dyn Storage>,
    metrics: Arc<MetricsCollector>,
    sent: AtomicU64,
    received: AtomicU64,
    failed_decode: AtomicU64,
    test_mode: bool,
}

impl Shuttle {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<DrainRegistry>,
        metrics: Arc<MetricsCollector>,
        test_mode: bool,
    ) -> Arc<Shuttle> {
        Arc::new(Shuttle {
            routes: Mutex::new(RouteTable::default()),
            registry,
            storage,
            metrics,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            failed_decode: AtomicU64::new(0),
            test_mode,
        })
    }

    /// Spawn the three forward loops. They exit when their lanes close.
    pub fn start(self: &Arc<Self>, lanes: Lanes) -> Vec<JoinHandle<()>> {
        let shuttle = Arc::clone(self);
        let app = tokio::spawn(async move { shuttle.forward_app_logs(lanes.app_logs).await });
        let shuttle = Arc::clone(self);
        let web = tokio::spawn(async move { shuttle.forward_web_logs(lanes.web_logs).await });
        let shuttle = Arc::clone(self);
        let build =
            tokio::spawn(async move { shuttle.forward_build_logs(lanes.build_logs).await });
        vec![app, web, build]
    }

    async fn forward_app_logs(&self, mut lane: mpsc::Receiver<BrokerEvent>) {
        while let Some(event) = lane.recv().await {
            self.count_received();
            // The mesh access-log topic shares the app lane but speaks its
            // own format.
            let parsed = if event.topic == ISTIO_TOPIC {
                parse_istio_log(&event.payload)
            } else {
                parse_app_log(&event.payload, &event.topic)
            };
            match parsed {
                Ok(envelope) => self.send_message(envelope).await,
                Err(_) => self.count_failed_decode(),
            }
        }
    }

    async fn forward_web_logs(&self, mut lane: mpsc::Receiver<BrokerEvent>) {
        while let Some(event) = lane.recv().await {
            self.count_received();
            match parse_router_log(&event.payload) {
                Ok(mut envelope) => {
                    let original = envelope.log.clone();
                    envelope.log = format!(
                        "{} host={}-{} path={}",
                        original, envelope.container_name, envelope.topic, envelope.path
                    );
                    let site = envelope.site.clone();
                    let site_path = envelope.site_path.clone();
                    self.send_message(envelope.clone()).await;

                    // A request routed through a site matches twice: once
                    // for the app and once for the site domain.
                    if !site.is_empty() {
                        let mut site_env = envelope;
                        site_env.log = format!("{} host={} path={}", original, site, site_path);
                        site_env.container_name = site.clone();
                        site_env.topic = String::new();
                        self.send_message_keyed(&site_key(&site), site_env).await;
                    }
                }
                Err(_) => self.count_failed_decode(),
            }
        }
    }

    async fn forward_build_logs(&self, mut lane: mpsc::Receiver<BrokerEvent>) {
        while let Some(event) = lane.recv().await {
            self.count_received();
            match parse_build_log(&event.payload) {
                Ok(envelope) => self.send_message(envelope).await,
                Err(_) => self.count_failed_decode(),
            }
        }
    }

    /// Fan an envelope out to the destinations under its derived key.
    pub async fn send_message(&self, envelope: LogEnvelope) {
        let proc = container_to_proc(&envelope.container_name);
        let key = format!("{}{}", proc.app, envelope.topic);
        self.send_message_keyed(&key, envelope).await;
    }

    async fn send_message_keyed(&self, key: &str, envelope: LogEnvelope) {
        let destinations: Vec<Destination> = {
            let table = self.routes.lock().unwrap();
            table.map.get(key).cloned().unwrap_or_default()
        };
        if destinations.is_empty() {
            return;
        }

        let proc = container_to_proc(&envelope.container_name);
        let tag = syslog_tag(&proc, &envelope.pod_name);
        let hostname = if self.test_mode {
            "logshuttle-test".to_string()
        } else if envelope.topic.is_empty() {
            proc.app.clone()
        } else {
            format!("{}-{}", proc.app, envelope.topic)
        };
        let severity = if envelope.stream == "stderr" {
            Severity::Err
        } else {
            Severity::Info
        };
        let message = pod_phase_to_human_readable(&envelope.log);

        for destination in destinations {
            let packet = Packet {
                severity,
                facility: Facility::User,
                hostname: hostname.clone(),
                tag: tag.clone(),
                time: envelope.time,
                message: message.clone(),
            };
            destination.drain.send(packet).await;
            self.sent.fetch_add(1, Ordering::Relaxed);
            self.metrics.logs_sent.inc();
        }
    }

    /// Reconcile the in-memory table against storage: install routes that
    /// appeared, release routes that are gone. Idempotent; a storage
    /// failure leaves the table untouched until the next tick.
    pub async fn refresh_routes(&self) {
        let stored = match self.storage.get_routes().await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(error = %e, "Cannot obtain routes, will retry on next tick");
                return;
            }
        };

        for route in &stored {
            let key = route.route_key();
            let (already_installed, duplicate_url) = {
                let table = self.routes.lock().unwrap();
                match table.map.get(&key) {
                    Some(destinations) => (
                        destinations.iter().any(|d| d.route.id == route.id),
                        destinations
                            .iter()
                            .any(|d| d.drain.url() == route.destination_url),
                    ),
                    None => (false, false),
                }
            };
            if already_installed {
                continue;
            }
            if duplicate_url {
                info!(route = %route.describe(), "Not adding duplicate route");
                continue;
            }
            match self
                .registry
                .dial(&route.id, &route.destination_url)
                .await
            {
                Ok(drain) => {
                    let raced = {
                        let mut table = self.routes.lock().unwrap();
                        let destinations = table.map.entry(key.clone()).or_default();
                        // Another refresh may have raced us inside the lock
                        // gap; give the reference back instead of installing
                        // twice.
                        if destinations.iter().any(|d| d.route.id == route.id) {
                            true
                        } else {
                            destinations.push(Destination {
                                route: route.clone(),
                                drain,
                            });
                            if !table.keys.contains(&key) {
                                table.keys.push(key.clone());
                            }
                            false
                        }
                    };
                    if raced {
                        let _ = self.registry.undial(&route.id, &route.destination_url).await;
                        continue;
                    }
                    info!(route = %route.describe(), "Adding route");
                }
                Err(BusError::QuarantinedHost) => {}
                Err(e) => {
                    warn!(route = %route.describe(), error = %e, "Cannot add route, will retry in 5 minutes");
                }
            }
        }

        // Release everything storage no longer knows about.
        let removed: Vec<(String, String)> = {
            let mut table = self.routes.lock().unwrap();
            let mut removed = Vec::new();
            for key in table.keys.clone() {
                let Some(destinations) = table.map.get_mut(&key) else {
                    continue;
                };
                destinations.retain(|destination| {
                    let live = stored.iter().any(|r| r.id == destination.route.id);
                    if !live {
                        info!(route = %destination.route.describe(), "Removing route");
                        removed.push((
                            destination.route.id.clone(),
                            destination.drain.url().to_string(),
                        ));
                    }
                    live
                });
            }
            removed
        };
        for (route_id, url) in removed {
            if let Err(e) = self.registry.undial(&route_id, &url).await {
                warn!(route = %route_id, url = %url, error = %e, "Unable to remove stale drain");
            }
        }
    }

    /// Emit the fan-out `[metrics]` report line; counters reset.
    pub fn report_metrics(&self) {
        info!(
            "[metrics] count#logs_sent={} count#logs_received={} count#failed_decode={}",
            self.sent.swap(0, Ordering::Relaxed),
            self.received.swap(0, Ordering::Relaxed),
            self.failed_decode.swap(0, Ordering::Relaxed)
        );
    }

    /// Number of keys currently routed (test introspection).
    pub fn route_count(&self) -> usize {
        let table = self.routes.lock().unwrap();
        table.map.values().filter(|d| !d.is_empty()).count()
    }

    /// Number of destinations under one key (test introspection).
    pub fn destination_count(&self, key: &str) -> usize {
        let table = self.routes.lock().unwrap();
        table.map.get(key).map(Vec::len).unwrap_or(0)
    }

    fn count_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.metrics.logs_received.inc();
    }

    fn count_failed_decode(&self) {
        self.failed_decode.fetch_add(1, Ordering::Relaxed);
        self.metrics.failed_decode.inc();
    }
}
