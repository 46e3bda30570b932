//! Kafka implementation of [`MessageBus`].
//!
//! Leader acknowledgement only (`RequiredAcks::One`), Snappy compression,
//! no message key. The producer is synchronous and is only ever driven
//! from the delivery pipeline's blocking pool.

use kafka::client::Compression;
use kafka::producer::{Producer, Record, RequiredAcks};
use nf9_core::config::KafkaConfig;

use crate::delivery::{BusError, MessageBus, OutboundMessage};

pub struct KafkaBus {
    producer: Producer,
}

impl KafkaBus {
    /// Connect to `brokers` and fetch cluster metadata. Blocking.
    pub fn connect(brokers: Vec<String>, config: &KafkaConfig) -> Result<Self, BusError> {
        tracing::info!(brokers = %brokers.join(","), "connecting to kafka");
        let producer = Producer::from_hosts(brokers)
            .with_client_id(config.client_id.clone())
            .with_ack_timeout(config.ack_timeout())
            .with_required_acks(RequiredAcks::One)
            .with_compression(Compression::SNAPPY)
            .create()
            .map_err(|e| BusError::Connect(e.to_string()))?;
        Ok(Self { producer })
    }
}

impl MessageBus for KafkaBus {
    fn publish(&mut self, batch: &[OutboundMessage]) -> Result<(), BusError> {
        let records: Vec<_> = batch
            .iter()
            .map(|m| Record::from_value(m.topic, &m.payload[..]))
            .collect();

        let confirms = self
            .producer
            .send_all(&records)
            .map_err(|e| BusError::Produce(e.to_string()))?;

        for confirm in confirms {
            for partition in confirm.partition_confirms {
                if let Err(code) = partition.offset {
                    return Err(BusError::Rejected {
                        topic: confirm.topic,
                        partition: partition.partition,
                        code: format!("{code:?}"),
                    });
                }
            }
        }
        Ok(())
    }
}
