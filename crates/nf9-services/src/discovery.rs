//! Broker discovery: resolve the Kafka broker list from ZooKeeper.
//!
//! Kafka registers each live broker as a child of `<root>/brokers/ids`,
//! with a JSON payload carrying at least `host` and `port`. Discovery runs
//! once at startup; any failure is fatal to the caller.

use std::time::Duration;

use serde::Deserialize;
use zookeeper::{WatchedEvent, Watcher, ZooKeeper};

/// Read access to a hierarchical registry. Blocking.
pub trait BrokerRegistry {
    fn children(&self, path: &str) -> Result<Vec<String>, DiscoveryError>;
    fn data(&self, path: &str) -> Result<Vec<u8>, DiscoveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to connect to zookeeper at {hosts}: {reason}")]
    Connect { hosts: String, reason: String },

    #[error("failed to list {path}: {reason}")]
    List { path: String, reason: String },

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("invalid broker registration at {path}: {source}")]
    Registration {
        path: String,
        source: serde_json::Error,
    },

    #[error("no brokers registered under {0}")]
    NoBrokers(String),
}

/// The part of a broker registration we need.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerEntry {
    pub host: String,
    pub port: u16,
}

impl BrokerEntry {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `<root>/brokers/ids`, with surrounding slashes on `root` ignored.
pub fn broker_path(root: &str) -> String {
    let root = root.trim_matches('/');
    if root.is_empty() {
        "/brokers/ids".to_string()
    } else {
        format!("/{root}/brokers/ids")
    }
}

/// Comma-joined `host:port` list of every registered broker, in the order
/// the registry enumerates them.
pub fn discover_brokers(
    registry: &dyn BrokerRegistry,
    root: &str,
) -> Result<String, DiscoveryError> {
    let ids_path = broker_path(root);
    let ids = registry.children(&ids_path)?;

    let mut addresses = Vec::with_capacity(ids.len());
    for id in ids {
        let path = format!("{ids_path}/{id}");
        let raw = registry.data(&path)?;
        let entry: BrokerEntry = serde_json::from_slice(&raw)
            .map_err(|source| DiscoveryError::Registration { path: path.clone(), source })?;
        tracing::debug!(broker = %id, address = %entry.address(), "broker discovered");
        addresses.push(entry.address());
    }

    if addresses.is_empty() {
        return Err(DiscoveryError::NoBrokers(ids_path));
    }
    Ok(addresses.join(","))
}

// ── ZooKeeper ─────────────────────────────────────────────────────────────────

struct SessionWatcher;

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        tracing::debug!(?event, "zookeeper event");
    }
}

/// [`BrokerRegistry`] backed by a ZooKeeper session.
pub struct ZkRegistry {
    zk: ZooKeeper,
}

impl ZkRegistry {
    pub fn connect(hosts: &str, timeout: Duration) -> Result<Self, DiscoveryError> {
        let zk = ZooKeeper::connect(hosts, timeout, SessionWatcher).map_err(|e| {
            DiscoveryError::Connect {
                hosts: hosts.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { zk })
    }
}

impl BrokerRegistry for ZkRegistry {
    fn children(&self, path: &str) -> Result<Vec<String>, DiscoveryError> {
        self.zk.get_children(path, false).map_err(|e| DiscoveryError::List {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn data(&self, path: &str) -> Result<Vec<u8>, DiscoveryError> {
        self.zk
            .get_data(path, false)
            .map(|(data, _stat)| data)
            .map_err(|e| DiscoveryError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Drop for ZkRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.zk.close() {
            tracing::debug!(error = %e, "zookeeper close failed");
        }
    }
}

/// Connect, resolve and disconnect. Blocking.
pub fn discover_from_zookeeper(
    hosts: &str,
    root: &str,
    timeout: Duration,
) -> Result<String, DiscoveryError> {
    let registry = ZkRegistry::connect(hosts, timeout)?;
    discover_brokers(&registry, root)
}
