use crate::packet::Packet;
use logbus_core::BusError;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Wire transport for one drain connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Tls,
}

/// Map a destination URL onto its transport and host:port.
///
/// `syslog://`, `syslog+tcp://`, `tcp://`  → TCP
/// `syslog+udp://`, `udp://`               → UDP
/// `syslog+tls://`, `ssh://`               → TLS
pub fn transport_for_url(url: &str) -> Result<(Transport, String), BusError> {
    let transport = if url.starts_with("syslog+tcp://")
        || url.starts_with("syslog://")
        || url.starts_with("tcp://")
    {
        Transport::Tcp
    } else if url.starts_with("syslog+udp://") || url.starts_with("udp://") {
        Transport::Udp
    } else if url.starts_with("syslog+tls://") || url.starts_with("ssh://") {
        Transport::Tls
    } else {
        return Err(BusError::UnsupportedScheme(url.to_string()));
    };
    let host = match url.split_once("://") {
        Some((_, host)) => host.to_string(),
        None => url.to_string(),
    };
    Ok((transport, host))
}

/// Delivery counters shared between a connection's writer task and the
/// metrics reporter.
#[derive(Debug, Default)]
pub struct ConnMetrics {
    pub sent: AtomicU64,
    pub errors: AtomicU64,
}

enum Socket {
    Tcp(TcpStream),
    Udp(UdpSocket),
    Tls(Box<TlsStream<TcpStream>>),
}

/// One live outbound syslog connection with its own bounded channel and
/// writer task. Stream transports use octet-counted framing; UDP sends the
/// bare frame as one datagram.
pub struct Connection {
    sender: mpsc::Sender<Packet>,
    metrics: Arc<ConnMetrics>,
}

const CONN_BUFFER: usize = 100;

impl Connection {
    /// Open a connection, failing if the initial dial does not complete
    /// within `connect_timeout`. The writer task reconnects lazily after a
    /// write failure; a packet that cannot be written is dropped and
    /// counted.
    pub async fn dial(
        transport: Transport,
        host: &str,
        connect_timeout: Duration,
        write_timeout: Duration,
        max_frame: usize,
    ) -> Result<Connection, BusError> {
        let socket = open_socket(transport, host, connect_timeout).await?;
        let (sender, receiver) = mpsc::channel(CONN_BUFFER);
        let metrics = Arc::new(ConnMetrics::default());
        let writer = Writer {
            transport,
            host: host.to_string(),
            connect_timeout,
            write_timeout,
            max_frame,
            metrics: Arc::clone(&metrics),
        };
        tokio::spawn(writer.run(socket, receiver));
        Ok(Connection { sender, metrics })
    }

    /// Enqueue a packet; blocks when the connection's channel is full.
    pub async fn send(&self, packet: Packet) {
        // The writer task only dies when the connection is closed; a failed
        // send at that point is a drop, matching close semantics.
        let _ = self.sender.send(packet).await;
    }

    /// Handle for forwarding without holding a pool lock across the send.
    pub fn handle(&self) -> mpsc::Sender<Packet> {
        self.sender.clone()
    }

    pub fn metrics(&self) -> Arc<ConnMetrics> {
        Arc::clone(&self.metrics)
    }
}

struct Writer {
    transport: Transport,
    host: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    max_frame: usize,
    metrics: Arc<ConnMetrics>,
}

impl Writer {
    async fn run(self, socket: Socket, mut receiver: mpsc::Receiver<Packet>) {
        let mut socket = Some(socket);
        while let Some(packet) = receiver.recv().await {
            if socket.is_none() {
                match open_socket(self.transport, &self.host, self.connect_timeout).await {
                    Ok(s) => socket = Some(s),
                    Err(e) => {
                        debug!(host = %self.host, error = %e, "Reconnect failed, dropping packet");
                        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
            }
            let Some(current) = socket.as_mut() else {
                continue;
            };
            match timeout(self.write_timeout, write_packet(current, &packet, self.max_frame)).await
            {
                Ok(Ok(())) => {
                    self.metrics.sent.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    warn!(host = %self.host, error = %e, "Write failed, will reconnect");
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    socket = None;
                }
                Err(_) => {
                    warn!(host = %self.host, "Write timed out, will reconnect");
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    socket = None;
                }
            }
        }
    }
}

async fn write_packet(socket: &mut Socket, packet: &Packet, max_frame: usize) -> std::io::Result<()> {
    match socket {
        Socket::Tcp(stream) => {
            let framed = packet.framed(max_frame);
            stream.write_all(framed.as_bytes()).await
        }
        Socket::Tls(stream) => {
            let framed = packet.framed(max_frame);
            stream.write_all(framed.as_bytes()).await
        }
        Socket::Udp(sock) => {
            let frame = packet.generate(max_frame);
            sock.send(frame.as_bytes()).await.map(|_| ())
        }
    }
}

async fn open_socket(
    transport: Transport,
    host: &str,
    connect_timeout: Duration,
) -> Result<Socket, BusError> {
    match transport {
        Transport::Tcp => {
            let stream = timeout(connect_timeout, TcpStream::connect(host))
                .await
                .map_err(|_| BusError::DrainUnreachable(host.to_string()))??;
            stream.set_nodelay(true)?;
            Ok(Socket::Tcp(stream))
        }
        Transport::Udp => {
            let sock = UdpSocket::bind("0.0.0.0:0").await?;
            sock.connect(host).await?;
            Ok(Socket::Udp(sock))
        }
        Transport::Tls => {
            let stream = timeout(connect_timeout, TcpStream::connect(host))
                .await
                .map_err(|_| BusError::DrainUnreachable(host.to_string()))??;
            stream.set_nodelay(true)?;
            let server = host.split(':').next().unwrap_or(host).to_string();
            let name = ServerName::try_from(server)
                .map_err(|_| BusError::DrainUnreachable(host.to_string()))?;
            let connector = TlsConnector::from(tls_config());
            let tls = timeout(connect_timeout, connector.connect(name, stream))
                .await
                .map_err(|_| BusError::DrainUnreachable(host.to_string()))??;
            Ok(Socket::Tls(Box::new(tls)))
        }
    }
}

fn tls_config() -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
