//! nf9d: NetFlow v9 collector daemon.
//!
//! Receives NetFlow v9 export datagrams over UDP, decodes every flow record
//! against the templates each exporter announced and publishes the records
//! as JSON objects to the `netflow` Kafka topic.
//!
//! ```bash
//! nf9d --brokers k1:9092,k2:9092
//! nf9d --zks zk1:2181,zk2:2181 --zknode kafka --listen :2055
//! nf9d --brokers k1:9092 --verbose --json --pretty
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use nf9_core::config::{split_brokers, Nf9Config};
use nf9_services::{
    discover_from_zookeeper, log_failures, DeliveryPipeline, DeliverySettings, KafkaBus,
    PacketDecoder, TemplateStore,
};

mod forward;
mod listener;

use forward::{EchoFormat, Forwarder};
use listener::Listener;

/// NetFlow v9 to Kafka collector
#[derive(Parser, Debug)]
#[command(name = "nf9d")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to listen for NetFlow v9 packets
    #[arg(long)]
    listen: Option<String>,

    /// Kafka brokers to connect to, as a comma separated list
    #[arg(long)]
    brokers: Option<String>,

    /// ZooKeeper hosts to discover brokers from, when --brokers is not given
    #[arg(long)]
    zks: Option<String>,

    /// Root node of the Kafka cluster in ZooKeeper
    #[arg(long)]
    zknode: Option<String>,

    /// Debug logging and an echo of every record on stdout
    #[arg(long)]
    verbose: bool,

    /// Echo records as JSON instead of plain text
    #[arg(long)]
    json: bool,

    /// With --json, pretty-print the echo
    #[arg(long)]
    pretty: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Flags take precedence over the file and the environment.
    fn apply(&self, config: &mut Nf9Config) {
        if let Some(listen) = &self.listen {
            config.listen.address = listen.clone();
        }
        if let Some(brokers) = &self.brokers {
            config.kafka.brokers = split_brokers(brokers);
        }
        if let Some(zks) = &self.zks {
            config.discovery.zookeeper = zks.clone();
        }
        if let Some(root) = &self.zknode {
            config.discovery.root = root.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Nf9Config::load_from(path.clone()),
        None => Nf9Config::load(),
    }
    .context("failed to load configuration")?;
    cli.apply(&mut config);

    // ── Brokers ──────────────────────────────────────────────────────────────

    let brokers = resolve_brokers(&config).await?;
    if brokers.is_empty() {
        eprintln!("nf9d: either --brokers or --zks must be provided\n");
        let _ = Cli::command().print_help();
        std::process::exit(1);
    }
    tracing::info!(brokers = %brokers.join(", "), "kafka brokers");

    let bus = {
        let kafka = config.kafka.clone();
        tokio::task::spawn_blocking(move || KafkaBus::connect(brokers, &kafka))
            .await
            .context("kafka connect task failed")?
            .context("failed to create kafka producer")?
    };

    // ── Pipeline and listener ────────────────────────────────────────────────

    let DeliveryPipeline {
        producer,
        failures,
        handle,
    } = DeliveryPipeline::spawn(bus, DeliverySettings::from(&config.kafka));
    let stats = producer.stats();

    let store = TemplateStore::new();
    let socket = listener::bind(&config.listen)?;
    tracing::info!(addr = %socket.local_addr()?, "listening");

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let echo = cli
        .verbose
        .then(|| EchoFormat::from_flags(cli.json, cli.pretty));

    let listener_task = tokio::spawn(
        Listener::new(
            socket,
            PacketDecoder::new(store.clone()),
            Forwarder::new(producer, echo),
            config.listen.max_datagram,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let failure_task = tokio::spawn(log_failures(failures));

    let expiry_task = config.templates.ttl().map(|ttl| {
        tracing::info!(ttl_secs = ttl.as_secs(), "template expiry enabled");
        tokio::spawn(listener::expiry_loop(
            store.clone(),
            ttl,
            config.templates.sweep_interval(),
        ))
    });

    let stats_printer = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                let s = stats.snapshot();
                tracing::info!(
                    templates = store.len(),
                    enqueued = s.enqueued,
                    delivered = s.delivered,
                    dropped = s.dropped,
                    failed = s.failed,
                    "pipeline stats"
                );
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    // Returns on the shutdown signal or a fatal receive error.
    let result = match listener_task.await {
        Ok(r) => r,
        Err(e) => Err(anyhow::anyhow!("listener task failed: {e}")),
    };
    if let Err(e) = &result {
        tracing::error!(error = %e, "listener exited");
    }

    // The listener dropped the last producer handle; wait for the drain.
    let grace = config.shutdown.grace();
    if handle.shutdown(grace).await {
        let _ = failure_task.await;
        tracing::info!("delivery queue drained");
    } else {
        failure_task.abort();
    }

    if let Some(task) = expiry_task {
        task.abort();
    }
    stats_printer.abort();

    result
}

/// Brokers from the configuration, or from ZooKeeper when none are set
/// and discovery is configured. Empty when neither applies.
async fn resolve_brokers(config: &Nf9Config) -> Result<Vec<String>> {
    if !config.kafka.brokers.is_empty() || !config.discovery.enabled() {
        return Ok(config.kafka.brokers.clone());
    }

    let hosts = config.discovery.zookeeper.clone();
    let root = config.discovery.root.clone();
    let timeout = config.discovery.timeout();
    tracing::info!(zookeeper = %hosts, root = %root, "discovering brokers");

    let list = tokio::task::spawn_blocking(move || discover_from_zookeeper(&hosts, &root, timeout))
        .await
        .context("broker discovery task failed")?
        .context("broker discovery failed")?;
    tracing::info!(brokers = %list, "brokers discovered from zookeeper");
    Ok(split_brokers(&list))
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
