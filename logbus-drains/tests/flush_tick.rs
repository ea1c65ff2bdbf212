use axum::extract::State;
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use logbus_drains::DrainRegistry;
use logbus_observability::MetricsCollector;
use logbus_syslog::{Facility, Packet, Severity};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn capture_server() -> (String, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(8);
    let app = Router::new()
        .route(
            "/drain",
            post(|State(tx): State<mpsc::Sender<String>>, body: String| async move {
                let _ = tx.send(body).await;
                "ok"
            }),
        )
        .with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{}/drain", addr), rx)
}

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

/// The registry's 3 s tick must push buffered HTTP records out without the
/// size trigger ever firing.
#[tokio::test]
async fn test_periodic_flush_drains_small_buffers() {
    let registry = DrainRegistry::new(Arc::new(MetricsCollector::new().unwrap()), None);
    let tasks = registry.start();

    let (url, mut rx) = capture_server().await;
    let drain = registry.dial("r1", &url).await.unwrap();
    drain.send(packet("only one record")).await;

    let body = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("periodic flush never fired")
        .unwrap();
    assert!(body.contains("only one record"));

    for task in tasks {
        task.abort();
    }
}

#[tokio::test]
async fn test_report_metrics_covers_both_variants() {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let registry = DrainRegistry::new(Arc::clone(&metrics), None);

    let (url, _rx) = capture_server().await;
    let http = registry.dial("r1", &url).await.unwrap();
    http.send(packet("x")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    http.flush().await;

    let udp = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let syslog_url = format!("syslog+udp://{}", udp.local_addr().unwrap());
    let syslog = registry.dial("r2", &syslog_url).await.unwrap();
    syslog.send(packet("y")).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    registry.report_metrics().await;
    let text = metrics.gather_text();
    assert!(text.contains("logbus_drain_sent_total"), "text: {}", text);
    assert!(text.contains("logbus_drain_connections"), "text: {}", text);
}
