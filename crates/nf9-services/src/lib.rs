//! nf9-services: template store, packet decoder, delivery pipeline and
//! broker discovery. Runtime-agnostic except for the delivery worker,
//! which runs on tokio.

pub mod decoder;
pub mod delivery;
pub mod discovery;
pub mod kafka_bus;
pub mod template_store;

pub use decoder::{DatagramSummary, DecodeOutcome, PacketDecoder, RecordSink};
pub use delivery::{
    log_failures, BusError, DeliveryFailure, DeliveryHandle, DeliveryPipeline, DeliverySettings,
    EnqueueError, FlowProducer, MessageBus, OutboundMessage, PipelineStats, StatsSnapshot, TOPIC,
};
pub use discovery::{
    broker_path, discover_brokers, discover_from_zookeeper, BrokerEntry, BrokerRegistry,
    DiscoveryError, ZkRegistry,
};
pub use kafka_bus::KafkaBus;
pub use template_store::TemplateStore;
