use crate::drain::DrainStats;
use logbus_core::BusError;
use logbus_syslog::conn::{transport_for_url, ConnMetrics, Connection, Transport};
use logbus_syslog::{Packet, MAX_LOG_SIZE};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

const INGRESS_BUFFER: usize = 512;
const INITIAL_CONNECTIONS: usize = 1;
const DEFAULT_MAX_CONNECTIONS: u32 = 40;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);
const WRITE_TIMEOUT: Duration = Duration::from_secs(4);

/// Grow the pool once smoothed back-pressure crosses this threshold.
const EXPAND_PRESSURE: f64 = 0.10;

/// Syslog drain: a pool of live connections to one destination. Packets
/// with the same tag always traverse the same connection, preserving
/// per-process ordering across the pool.
pub struct SyslogDrain {
    sender: mpsc::Sender<Packet>,
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: String,
    url: String,
    host: String,
    transport: Transport,
    max_connections: u32,
    conns: Mutex<Vec<PoolConn>>,
    /// Single-flight guard: at most one concurrent dial per drain
    attempting: AtomicBool,
    sent: AtomicU64,
    /// f64 bits of the EWMA pressure
    pressure: AtomicU64,
    stop: Notify,
}

struct PoolConn {
    handle: mpsc::Sender<Packet>,
    metrics: Arc<ConnMetrics>,
    // Keeps the writer task alive; dropping it closes the connection.
    _conn: Connection,
}

impl SyslogDrain {
    /// Open the pool with its initial connection. Construction fails when
    /// zero connections succeed. `max_connections` overrides the default
    /// cap of 40 (the registry injects the configured value).
    pub async fn dial(
        id: &str,
        url: &str,
        max_connections: Option<u32>,
    ) -> Result<SyslogDrain, BusError> {
        let (transport, host) = transport_for_url(url)?;
        info!(url = %url, "Creating syslog drain");

        let inner = Arc::new(PoolInner {
            id: id.to_string(),
            url: url.to_string(),
            host,
            transport,
            max_connections: max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            conns: Mutex::new(Vec::new()),
            attempting: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            pressure: AtomicU64::new(0f64.to_bits()),
            stop: Notify::new(),
        });

        for _ in 0..INITIAL_CONNECTIONS {
            if let Err(e) = inner.connect(false, 0.0).await {
                warn!(url = %inner.url, error = %e, "Initial connection failed");
            }
        }
        if inner.open_connections() == 0 {
            return Err(BusError::DrainUnreachable(inner.url.clone()));
        }

        let (sender, receiver) = mpsc::channel(INGRESS_BUFFER);
        tokio::spawn(Arc::clone(&inner).write_loop(receiver));
        info!(url = %inner.url, "Pool successfully created");
        Ok(SyslogDrain { sender, inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Enqueue a packet; blocks when the drain's ingress buffer is full.
    pub async fn send(&self, packet: Packet) {
        let _ = self.sender.send(packet).await;
    }

    /// Stop the writer, then drop every pooled connection.
    pub fn close(&self) {
        self.inner.stop.notify_one();
        self.inner.conns.lock().unwrap().clear();
    }

    /// One `[metrics]` line per pooled connection (counters not reset;
    /// call before [`SyslogDrain::take_stats`], which consumes the error
    /// counts).
    pub fn report_connections(&self) {
        let conns = self.inner.conns.lock().unwrap();
        for (ndx, conn) in conns.iter().enumerate() {
            info!(
                "[metrics] syslog[{}]={} count#sent={} count#errors={}",
                ndx,
                self.inner.url,
                conn.metrics.sent.load(Ordering::Relaxed),
                conn.metrics.errors.load(Ordering::Relaxed)
            );
        }
    }

    pub fn take_stats(&self) -> DrainStats {
        let conns = self.inner.conns.lock().unwrap();
        let mut errors = 0;
        for conn in conns.iter() {
            errors += conn.metrics.errors.swap(0, Ordering::Relaxed);
        }
        DrainStats {
            url: self.inner.url.clone(),
            max_connections: self.inner.max_connections as i64,
            connections: conns.len() as u64,
            pressure: f64::from_bits(self.inner.pressure.load(Ordering::Relaxed)),
            sent: self.inner.sent.swap(0, Ordering::Relaxed),
            errors,
        }
    }
}

impl PoolInner {
    fn open_connections(&self) -> u32 {
        self.conns.lock().unwrap().len() as u32
    }

    async fn write_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<Packet>) {
        loop {
            tokio::select! {
                maybe = receiver.recv() => {
                    let Some(packet) = maybe else { return };
                    self.sent.fetch_add(1, Ordering::Relaxed);

                    let handle = {
                        let conns = self.conns.lock().unwrap();
                        if conns.is_empty() {
                            continue;
                        }
                        let idx = pick_connection(&packet.tag, conns.len() as u32);
                        conns[idx as usize].handle.clone()
                    };
                    let _ = handle.send(packet).await;

                    let fill = receiver.len() as f64 / receiver.max_capacity() as f64;
                    let pressure =
                        (f64::from_bits(self.pressure.load(Ordering::Relaxed)) + fill) / 2.0;
                    self.pressure.store(pressure.to_bits(), Ordering::Relaxed);

                    if pressure > EXPAND_PRESSURE && self.open_connections() < self.max_connections {
                        let inner = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = inner.connect(true, pressure).await {
                                warn!(url = %inner.url, error = %e, "Pool expansion failed");
                            }
                        });
                    }
                }
                _ = self.stop.notified() => return,
            }
        }
    }

    async fn connect(&self, increase_pool: bool, pressure: f64) -> Result<(), BusError> {
        if self
            .attempting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let result = self.connect_inner(increase_pool, pressure).await;
        self.attempting.store(false, Ordering::Release);
        result
    }

    async fn connect_inner(&self, increase_pool: bool, pressure: f64) -> Result<(), BusError> {
        info!(host = %self.host, "Opening connection");
        let conn = Connection::dial(
            self.transport,
            &self.host,
            CONNECT_TIMEOUT,
            WRITE_TIMEOUT,
            MAX_LOG_SIZE,
        )
        .await?;
        let metrics = conn.metrics();
        let mut conns = self.conns.lock().unwrap();
        conns.push(PoolConn {
            handle: conn.handle(),
            metrics,
            _conn: conn,
        });
        if increase_pool {
            info!(
                url = %self.url,
                connections = conns.len(),
                pressure = pressure * 100.0,
                "Increasing pool size under back-pressure"
            );
        }
        Ok(())
    }
}

/// Map a tag onto one of `open` connections. The same tag always maps to
/// the same connection so logs stay in order; the CRC pick can skew load
/// toward hot connections, so alternative mappings plug in here.
fn pick_connection(tag: &str, open: u32) -> u32 {
    crc32fast::hash(tag.as_bytes()) % open
}
