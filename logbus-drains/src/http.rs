use crate::drain::DrainStats;
use logbus_core::BusError;
use logbus_syslog::Packet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const INGRESS_BUFFER: usize = 512;

/// Flush as soon as this many records are buffered; the 3 s registry tick
/// covers the idle case.
const FLUSH_TRIGGER: usize = 64;

/// Hard cap on the append buffer. A remote accepting records slower than
/// they arrive sheds the oldest records first so the live tail keeps
/// flowing.
const BUFFER_WATERMARK: usize = 4096;

const FRAME_MAX: usize = 4096;

/// HTTP(S) drain: buffers parsed records and periodically POSTs them as an
/// octet-counted `application/logplex-1` body.
pub struct HttpDrain {
    sender: mpsc::Sender<Packet>,
    inner: Arc<HttpInner>,
}

struct HttpInner {
    id: String,
    url: String,
    client: reqwest::Client,
    buffered: Mutex<Vec<Packet>>,
    /// Monotone per drain, advanced for every frame whether or not the POST
    /// succeeds, so the next batch is distinguishable downstream.
    frame: AtomicU64,
    sent: AtomicU64,
    conns: AtomicU64,
    errors: AtomicU64,
    /// f64 bits; observed buffer fullness at the last flush
    pressure: AtomicU64,
    draining: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl HttpDrain {
    pub fn new(id: &str, url: &str) -> Result<HttpDrain, BusError> {
        reqwest::Url::parse(url)
            .map_err(|e| BusError::DrainUnreachable(format!("{}: {}", url, e)))?;
        info!(url = %url, "Creating URL drain");

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BusError::Internal(e.to_string()))?;

        let (sender, receiver) = mpsc::channel(INGRESS_BUFFER);
        let inner = Arc::new(HttpInner {
            id: id.to_string(),
            url: url.to_string(),
            client,
            buffered: Mutex::new(Vec::new()),
            frame: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            conns: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            pressure: AtomicU64::new(0f64.to_bits()),
            draining: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(Arc::clone(&inner).write_loop(receiver));
        Ok(HttpDrain { sender, inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub async fn send(&self, packet: Packet) {
        if self.inner.closed.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.sender.send(packet).await;
    }

    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    /// Stop ingesting. In-flight flushes complete; later packets are
    /// dropped.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
    }

    pub fn take_stats(&self) -> DrainStats {
        DrainStats {
            url: self.inner.url.clone(),
            max_connections: -1,
            connections: self.inner.conns.swap(0, Ordering::Relaxed),
            pressure: f64::from_bits(self.inner.pressure.load(Ordering::Relaxed)),
            sent: self.inner.sent.swap(0, Ordering::Relaxed),
            errors: self.inner.errors.swap(0, Ordering::Relaxed),
        }
    }
}

impl HttpInner {
    async fn write_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<Packet>) {
        while let Some(packet) = receiver.recv().await {
            if self.closed.load(Ordering::Relaxed) {
                return;
            }
            let trigger = {
                let mut buffered = self.buffered.lock().unwrap();
                if buffered.len() >= BUFFER_WATERMARK {
                    buffered.remove(0);
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
                buffered.push(packet);
                buffered.len() > FLUSH_TRIGGER
            };
            if trigger {
                let inner = Arc::clone(&self);
                tokio::spawn(async move { inner.flush().await });
            }
        }
    }

    async fn flush(&self) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        // A frame in flight reserves the buffer exclusively; parallel
        // flushes must not interleave.
        let Ok(_guard) = self.draining.try_lock() else {
            return;
        };

        let batch = {
            let mut buffered = self.buffered.lock().unwrap();
            self.pressure.store(
                (buffered.len() as f64 / 1024.0).to_bits(),
                Ordering::Relaxed,
            );
            std::mem::take(&mut *buffered)
        };
        if batch.is_empty() {
            return;
        }

        let mut body = String::new();
        for packet in &batch {
            let frame = packet.generate(FRAME_MAX);
            body.push_str(&format!("{} {}\n", frame.len() + 1, frame));
        }
        let count = batch.len();
        self.sent.fetch_add(count as u64, Ordering::Relaxed);
        self.conns.fetch_add(1, Ordering::Relaxed);
        let frame_id = self.frame.fetch_add(1, Ordering::Relaxed) + 1;

        let result = self
            .client
            .post(&self.url)
            .header("Logplex-Msg-Count", count.to_string())
            .header("Logplex-Frame-Id", frame_id.to_string())
            .header("Logplex-Drain-Token", &self.id)
            .header("User-Agent", "Logplex/v72")
            .header("Content-Type", "application/logplex-1")
            .body(body)
            .send()
            .await;

        match result {
            Ok(res) => {
                let status = res.status().as_u16();
                if !(200..=399).contains(&status) {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(url = %self.url, status, "Drain endpoint rejected frame");
                }
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(url = %self.url, error = %e, "Drain POST failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::Router;
    use chrono::Utc;
    use logbus_syslog::{Facility, Severity};

    fn packet(message: &str) -> Packet {
        Packet {
            severity: Severity::Info,
            facility: Facility::User,
            hostname: "app-space".into(),
            tag: "web.1".into(),
            time: Utc::now(),
            message: message.into(),
        }
    }

    async fn capture_server() -> (String, mpsc::Receiver<(HeaderMap, String)>) {
        let (tx, rx) = mpsc::channel(8);
        let app = Router::new().route(
            "/drain",
            post(
                |State(tx): State<mpsc::Sender<(HeaderMap, String)>>,
                 headers: HeaderMap,
                 body: String| async move {
                    let _ = tx.send((headers, body)).await;
                    "ok"
                },
            ),
        )
        .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}/drain", addr), rx)
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(HttpDrain::new("id", "this is not a url").is_err());
    }

    #[tokio::test]
    async fn test_flush_posts_logplex_frame() {
        let (url, mut rx) = capture_server().await;
        let drain = HttpDrain::new("token-1", &url).unwrap();

        drain.send(packet("Oh hello.")).await;
        drain.send(packet("Oh hello2.")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain.flush().await;

        let (headers, body) = rx.recv().await.unwrap();
        assert_eq!(headers.get("Logplex-Msg-Count").unwrap(), "2");
        assert_eq!(headers.get("Logplex-Frame-Id").unwrap(), "1");
        assert_eq!(headers.get("Logplex-Drain-Token").unwrap(), "token-1");
        assert_eq!(headers.get("User-Agent").unwrap(), "Logplex/v72");
        assert_eq!(headers.get("Content-Type").unwrap(), "application/logplex-1");

        // Each record: "<octets+1> <frame>\n"
        let mut lines = 0;
        for line in body.lines() {
            let (len, frame) = line.split_once(' ').unwrap();
            assert_eq!(len.parse::<usize>().unwrap(), frame.len() + 1);
            lines += 1;
        }
        assert_eq!(lines, 2);
        assert!(body.contains("Oh hello."));
        assert!(body.contains("Oh hello2."));
    }

    #[tokio::test]
    async fn test_frame_ids_are_monotone() {
        let (url, mut rx) = capture_server().await;
        let drain = HttpDrain::new("token-2", &url).unwrap();

        for round in 1..=3u64 {
            drain.send(packet("x")).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            drain.flush().await;
            let (headers, _) = rx.recv().await.unwrap();
            assert_eq!(
                headers.get("Logplex-Frame-Id").unwrap().to_str().unwrap(),
                round.to_string()
            );
        }
    }

    #[tokio::test]
    async fn test_flush_with_empty_buffer_posts_nothing() {
        let (url, mut rx) = capture_server().await;
        let drain = HttpDrain::new("token-3", &url).unwrap();
        drain.flush().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_drain_drops_ingest() {
        let (url, mut rx) = capture_server().await;
        let drain = HttpDrain::new("token-4", &url).unwrap();
        drain.close();
        drain.send(packet("late")).await;
        drain.flush().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_counts_error_and_advances_frame() {
        let drain = HttpDrain::new("token-5", "http://127.0.0.1:1/drain").unwrap();
        drain.send(packet("x")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        drain.flush().await;
        let stats = drain.take_stats();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(drain.inner.frame.load(Ordering::Relaxed), 1);
    }
}
