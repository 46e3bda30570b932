//! Flow listener: receives exporter datagrams and decodes them in arrival
//! order into the record sink.
//!
//! A separate expiry task evicts templates exporters stopped refreshing.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use nf9_core::config::ListenConfig;
use nf9_services::{DecodeOutcome, PacketDecoder, RecordSink, TemplateStore};

pub struct Listener<S> {
    socket: UdpSocket,
    decoder: PacketDecoder,
    sink: S,
    max_datagram: usize,
    shutdown: broadcast::Receiver<()>,
}

impl<S: RecordSink + Send> Listener<S> {
    pub fn new(
        socket: UdpSocket,
        decoder: PacketDecoder,
        sink: S,
        max_datagram: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            decoder,
            sink,
            max_datagram,
            shutdown,
        }
    }

    /// Receive until shutdown. A receive error is fatal.
    ///
    /// The sink is dropped on return, which releases its producer handle.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; self.max_datagram.max(1)];
        let local = self.socket.local_addr().ok();
        tracing::info!(addr = ?local, "flow listener starting");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("flow listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, exporter) = result.context("udp receive failed")?;
                    let outcome = self.decoder.decode(exporter, &buf[..len], &mut self.sink);
                    log_outcome(exporter, len, &outcome);
                }
            }
        }
    }
}

fn log_outcome(exporter: SocketAddr, len: usize, outcome: &DecodeOutcome) {
    match outcome {
        DecodeOutcome::Malformed(e) => {
            tracing::debug!(%exporter, len, error = %e, "dropping malformed datagram");
        }
        DecodeOutcome::Processed(summary) => {
            if let Some(e) = &summary.aborted {
                tracing::debug!(
                    %exporter,
                    records = summary.records,
                    error = %e,
                    "datagram partially decoded"
                );
            }
            if summary.missing_templates > 0 {
                tracing::trace!(
                    %exporter,
                    source_id = summary.header.source_id.get(),
                    sets = summary.missing_templates,
                    "data sets skipped, template not yet known"
                );
            }
        }
    }
}

/// Bind the flow socket with the configured receive buffer.
pub fn bind(config: &ListenConfig) -> Result<UdpSocket> {
    let addr = resolve(&config.address)?;
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    if config.recv_buffer_bytes > 0 {
        if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_bytes) {
            tracing::warn!(error = %e, bytes = config.recv_buffer_bytes, "SO_RCVBUF not applied");
        }
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind {addr}"))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).context("failed to convert to tokio UdpSocket")
}

/// Resolve a listen address. A bare `:port` listens on every IPv4 address.
fn resolve(address: &str) -> Result<SocketAddr> {
    let address = match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => address.to_string(),
    };
    address
        .to_socket_addrs()
        .with_context(|| format!("invalid listen address {address}"))?
        .next()
        .with_context(|| format!("listen address {address} resolved to nothing"))
}

/// Evict templates not refreshed within `ttl`.
///
/// Runs until the task handle is aborted.
pub async fn expiry_loop(store: TemplateStore, ttl: Duration, check_interval: Duration) {
    let mut interval = tokio::time::interval(check_interval);

    loop {
        interval.tick().await;

        let removed = store.sweep(ttl);
        if removed > 0 {
            tracing::debug!(removed, remaining = store.len(), "expired templates");
        }
    }
}
