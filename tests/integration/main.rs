//! nf9 integration test harness.
//!
//! Tests in this crate run the decode path and the delivery pipeline
//! together over a real localhost UDP socket, with an in-memory message
//! bus in place of Kafka. No external services are needed:
//!
//!   cargo test --test integration
//!
//! Each test starts its own collector on an ephemeral port.

use std::net::SocketAddr;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use nf9_core::DecodedRecord;
use nf9_services::{
    BusError, DeliveryFailure, DeliveryHandle, DeliveryPipeline, DeliverySettings, FlowProducer,
    MessageBus, OutboundMessage, PacketDecoder, PipelineStats, RecordSink, TemplateStore,
};

mod decoding;
mod delivery;

// ── Datagram builders ─────────────────────────────────────────────────────────

/// A NetFlow v9 datagram with the given source id and sets.
pub fn packet(source_id: u32, sets: &[Vec<u8>]) -> Vec<u8> {
    let mut p = Vec::with_capacity(20);
    p.extend_from_slice(&9u16.to_be_bytes());
    p.extend_from_slice(&(sets.len() as u16).to_be_bytes());
    p.extend_from_slice(&360_000u32.to_be_bytes());
    p.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    p.extend_from_slice(&42u32.to_be_bytes());
    p.extend_from_slice(&source_id.to_be_bytes());
    for s in sets {
        p.extend_from_slice(s);
    }
    p
}

/// A template set announcing one template of (field type, length) pairs.
pub fn template_set(template_id: u16, fields: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&template_id.to_be_bytes());
    body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
    for (field_type, length) in fields {
        body.extend_from_slice(&field_type.to_be_bytes());
        body.extend_from_slice(&length.to_be_bytes());
    }
    set(0, &body)
}

pub fn data_set(template_id: u16, body: &[u8]) -> Vec<u8> {
    set(template_id, body)
}

fn set(id: u16, body: &[u8]) -> Vec<u8> {
    let mut s = Vec::with_capacity(body.len() + 4);
    s.extend_from_slice(&id.to_be_bytes());
    s.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    s.extend_from_slice(body);
    s
}

/// IPV4_SRC_ADDR/4, IPV4_DST_ADDR/4, L4_DST_PORT/2, PROTOCOL/1
pub const FLOW_FIELDS: &[(u16, u16)] = &[(8, 4), (12, 4), (11, 2), (4, 1)];

pub fn flow_record(src: [u8; 4], dst: [u8; 4], port: u16, protocol: u8) -> Vec<u8> {
    let mut r = Vec::with_capacity(11);
    r.extend_from_slice(&src);
    r.extend_from_slice(&dst);
    r.extend_from_slice(&port.to_be_bytes());
    r.push(protocol);
    r
}

// ── Buses ─────────────────────────────────────────────────────────────────────

/// Keeps every published message. With a gate, each publish first waits
/// for a token.
#[derive(Clone, Default)]
pub struct RecordingBus {
    pub published: Arc<Mutex<Vec<OutboundMessage>>>,
    gate: Option<Arc<Mutex<std_mpsc::Receiver<()>>>>,
}

impl RecordingBus {
    pub fn gated() -> (Self, std_mpsc::Sender<()>) {
        let (tx, rx) = std_mpsc::channel();
        let bus = Self {
            published: Arc::default(),
            gate: Some(Arc::new(Mutex::new(rx))),
        };
        (bus, tx)
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Published payloads parsed back into JSON objects.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).expect("payload is JSON"))
            .collect()
    }
}

impl MessageBus for RecordingBus {
    fn publish(&mut self, batch: &[OutboundMessage]) -> Result<(), BusError> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().unwrap().recv();
        }
        self.published.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

/// Rejects everything.
#[derive(Clone, Default)]
pub struct DownBus {
    pub attempts: Arc<Mutex<usize>>,
}

impl MessageBus for DownBus {
    fn publish(&mut self, _batch: &[OutboundMessage]) -> Result<(), BusError> {
        *self.attempts.lock().unwrap() += 1;
        Err(BusError::Connect("all brokers down".into()))
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

struct ProducerSink(FlowProducer);

impl RecordSink for ProducerSink {
    fn accept(&mut self, record: DecodedRecord) {
        let _ = self.0.enqueue(&record);
    }
}

pub fn test_settings() -> DeliverySettings {
    DeliverySettings {
        flush_interval: Duration::from_millis(20),
        queue_capacity: 1_000,
        max_batch: 100,
        retries: 2,
        retry_backoff: Duration::from_millis(1),
    }
}

/// A decode loop on a localhost socket feeding a delivery pipeline.
pub struct Collector {
    pub addr: SocketAddr,
    pub store: TemplateStore,
    pub stats: Arc<PipelineStats>,
    pub failures: tokio::sync::mpsc::UnboundedReceiver<DeliveryFailure>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    handle: DeliveryHandle,
}

impl Collector {
    pub async fn start<B: MessageBus>(bus: B, settings: DeliverySettings) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .context("failed to bind collector socket")?;
        let addr = socket.local_addr()?;
        let store = TemplateStore::new();
        let decoder = PacketDecoder::new(store.clone());

        let DeliveryPipeline {
            producer,
            failures,
            handle,
        } = DeliveryPipeline::spawn(bus, settings);
        let stats = producer.stats();
        let (stop, mut stopped) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut sink = ProducerSink(producer);
            let mut buf = vec![0u8; 8960];
            loop {
                tokio::select! {
                    _ = &mut stopped => return,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, exporter)) = result else { return };
                        decoder.decode(exporter, &buf[..len], &mut sink);
                    }
                }
            }
        });

        Ok(Self {
            addr,
            store,
            stats,
            failures,
            stop,
            task,
            handle,
        })
    }

    /// Stop receiving and wait for the pipeline to drain. Returns the
    /// failure stream, which ends once the pipeline has exited.
    pub async fn stop(self) -> Result<tokio::sync::mpsc::UnboundedReceiver<DeliveryFailure>> {
        let _ = self.stop.send(());
        self.task.await.context("collector task failed")?;
        if !self.handle.shutdown(Duration::from_secs(5)).await {
            bail!("delivery pipeline did not drain");
        }
        Ok(self.failures)
    }
}

/// An exporter socket sending to a collector.
pub struct Exporter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Exporter {
    pub async fn new(target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        Ok(Self { socket, target })
    }

    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        self.socket.send_to(datagram, self.target).await?;
        Ok(())
    }
}

/// Poll `condition` every 10 ms for up to `secs` seconds.
pub async fn wait_for(secs: u64, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("condition not met within {secs}s")
}
