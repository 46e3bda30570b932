//! Configuration system for nf9.
//!
//! Resolution order: defaults → config file → environment variables.
//! Command-line flags are applied on top by the daemon.
//!
//! Config file location:
//!   1. $NF9_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/nf9/config.toml
//!   3. ~/.config/nf9/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::MAX_DATAGRAM;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Nf9Config {
    pub listen: ListenConfig,
    pub kafka: KafkaConfig,
    pub discovery: DiscoveryConfig,
    pub templates: TemplateConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// UDP address exporters send to.
    pub address: String,
    /// SO_RCVBUF size. 0 = leave the OS default.
    pub recv_buffer_bytes: usize,
    /// Receive buffer size; longer datagrams are truncated by the kernel.
    pub max_datagram: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Broker addresses (host:port). Empty = discover via ZooKeeper.
    pub brokers: Vec<String>,
    pub client_id: String,
    /// How long the leader may take to acknowledge a produce request.
    pub ack_timeout_ms: u64,
    /// Queued records are published at least this often.
    pub flush_interval_ms: u64,
    /// Records waiting for the flush worker. Records beyond this are dropped.
    pub queue_capacity: usize,
    /// A batch reaching this size is published without waiting for the tick.
    pub max_batch: usize,
    /// Publish attempts after the first before a batch is given up.
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Comma-separated ZooKeeper hosts. Empty = discovery disabled.
    pub zookeeper: String,
    /// Chroot of the Kafka cluster inside ZooKeeper.
    pub root: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Evict templates not refreshed within this many seconds. 0 = never.
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for queued records to flush at exit.
    pub grace_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:9995".to_string(),
            recv_buffer_bytes: 4 * 1024 * 1024,
            max_datagram: MAX_DATAGRAM,
        }
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            client_id: "nf9".to_string(),
            ack_timeout_ms: 1_000,
            flush_interval_ms: 500,
            queue_capacity: 10_000,
            max_batch: 1_000,
            retries: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: 5_000 }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl KafkaConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl DiscoveryConfig {
    pub fn enabled(&self) -> bool {
        !self.zookeeper.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(if self.timeout_ms == 0 { 1_000 } else { self.timeout_ms })
    }
}

impl TemplateConfig {
    /// None when templates never expire.
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Split a comma-separated broker list, dropping empty entries.
pub fn split_brokers(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("nf9")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Nf9Config {
    /// Load config from the default location: file → env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load config from an explicit path. A missing file means defaults.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            Nf9Config::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("NF9_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply NF9_* overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("NF9_LISTEN__ADDRESS") {
            self.listen.address = v;
        }
        if let Some(v) = lookup("NF9_KAFKA__BROKERS") {
            self.kafka.brokers = split_brokers(&v);
        }
        if let Some(v) = lookup("NF9_DISCOVERY__ZOOKEEPER") {
            self.discovery.zookeeper = v;
        }
        if let Some(v) = lookup("NF9_DISCOVERY__ROOT") {
            self.discovery.root = v;
        }
        if let Some(v) = lookup("NF9_TEMPLATES__TTL_SECS") {
            if let Ok(secs) = v.parse() {
                self.templates.ttl_secs = secs;
            }
        }
    }
}
