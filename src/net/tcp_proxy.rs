//! The L4 forwarding engine.
//!
//! # Responsibilities
//! - Accept TCP clients for one listener bound to one service
//! - Pick an endpoint, dial it with a bounded timeout, report feedback
//! - Splice bytes both ways with half-close on EOF, a connection-wide idle
//!   deadline, and a hard overall-connection deadline
//! - Keep the active-connections gauge honest
//!
//! An I/O error in one direction ends that direction only; the other half
//! finishes draining before both sockets close.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::SmoothWrr;
use crate::observability::MetricsRegistry;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const COPY_BUFFER: usize = 16 * 1024;

pub struct TcpProxy {
    listener_name: String,
    service_name: String,
    balancer: Arc<SmoothWrr>,
    idle_timeout: Duration,
    connection_timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl TcpProxy {
    pub fn new(
        listener_name: impl Into<String>,
        service_name: impl Into<String>,
        balancer: Arc<SmoothWrr>,
        idle_timeout: Duration,
        connection_timeout: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            listener_name: listener_name.into(),
            service_name: service_name.into(),
            balancer,
            idle_timeout,
            connection_timeout,
            metrics,
        })
    }

    /// Accept loop; one task per client connection.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: ShutdownSignal) {
        loop {
            let (client, peer) = tokio::select! {
                _ = shutdown.triggered() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(listener = %self.listener_name, error = %err, "accept failed");
                        continue;
                    }
                },
            };
            let proxy = self.clone();
            tokio::spawn(async move {
                proxy.handle(client, peer).await;
            });
        }
    }

    async fn handle(&self, client: TcpStream, peer: SocketAddr) {
        let _gauge = ConnectionGauge::new(
            self.metrics.clone(),
            self.listener_name.clone(),
            self.service_name.clone(),
        );

        let Some(handle) = self.balancer.next() else {
            tracing::warn!(
                listener = %self.listener_name,
                service = %self.service_name,
                "no healthy upstream endpoint"
            );
            return;
        };
        let upstream_addr = handle.endpoint().authority();

        let upstream =
            match tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(upstream_addr.as_str()))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    tracing::info!(upstream = %upstream_addr, error = %err, "dial upstream failed");
                    handle.feedback(false);
                    return;
                }
                Err(_) => {
                    tracing::info!(upstream = %upstream_addr, "dial upstream timed out");
                    handle.feedback(false);
                    return;
                }
            };
        handle.feedback(true);

        let activity = Activity::new();
        let (client_read, client_write) = client.into_split();
        let (upstream_read, upstream_write) = upstream.into_split();

        let mut client_to_upstream = tokio::spawn(copy_half(
            client_read,
            upstream_write,
            self.idle_timeout,
            activity.clone(),
        ));
        let upstream_to_client =
            copy_half(upstream_read, client_write, self.idle_timeout, activity);

        let drive = async {
            if let Err(err) = upstream_to_client.await {
                tracing::debug!(peer = %peer, error = %err, "upstream-to-client copy ended");
            }
            let _ = (&mut client_to_upstream).await;
        };

        if self.connection_timeout > Duration::ZERO {
            if tokio::time::timeout(self.connection_timeout, drive).await.is_err() {
                client_to_upstream.abort();
                tracing::debug!(peer = %peer, "connection deadline reached, closing");
            }
        } else {
            drive.await;
        }
    }
}

/// Copy one direction. On EOF or error the write side is shut down so the
/// peer sees FIN and can drain. The idle deadline is connection-wide: any
/// I/O on either half pushes it forward via the shared [`Activity`] clock.
async fn copy_half<R, W>(
    mut reader: R,
    mut writer: W,
    idle: Duration,
    activity: Activity,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;

    let result = loop {
        let n = if idle > Duration::ZERO {
            match read_with_idle(&mut reader, &mut buf, idle, &activity).await {
                Ok(n) => n,
                Err(err) => break Err(err),
            }
        } else {
            match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => break Err(err),
            }
        };
        if n == 0 {
            break Ok(());
        }
        activity.touch();

        let write = async {
            if idle > Duration::ZERO {
                tokio::time::timeout(idle, writer.write_all(&buf[..n]))
                    .await
                    .map_err(|_| idle_error())?
            } else {
                writer.write_all(&buf[..n]).await
            }
        };
        if let Err(err) = write.await {
            break Err(err);
        }
        activity.touch();
        total += n as u64;
    };

    // Half-close regardless of how the loop ended.
    let _ = writer.shutdown().await;
    result.map(|()| total)
}

async fn read_with_idle<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle: Duration,
    activity: &Activity,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    loop {
        match tokio::time::timeout(idle, reader.read(buf)).await {
            Ok(res) => return res,
            // The other half may have been active; only a connection-wide
            // quiet period counts as idle.
            Err(_) if activity.idle_for() < idle => continue,
            Err(_) => return Err(idle_error()),
        }
    }
}

fn idle_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "idle timeout")
}

/// Shared last-activity clock for one spliced connection pair.
#[derive(Clone)]
struct Activity {
    base: Instant,
    last_millis: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            last_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        self.last_millis
            .store(self.base.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.base.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_millis.load(Ordering::Relaxed)))
    }
}

/// RAII wrapper around the active-connections gauge.
struct ConnectionGauge {
    metrics: Arc<MetricsRegistry>,
    listener: String,
    service: String,
}

impl ConnectionGauge {
    fn new(metrics: Arc<MetricsRegistry>, listener: String, service: String) -> Self {
        metrics.inc_active_connections(&listener, &service);
        Self {
            metrics,
            listener,
            service,
        }
    }
}

impl Drop for ConnectionGauge {
    fn drop(&mut self) {
        self.metrics
            .dec_active_connections(&self.listener, &self.service);
    }
}
