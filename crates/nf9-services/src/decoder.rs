//! Packet decoder: turns one exporter datagram into decoded flow records.
//!
//! Decoding takes two passes over the sets of a datagram. The first stores
//! every template it carries, the second decodes the data sets. A data set
//! therefore decodes against a template from the same datagram wherever
//! the two sit on the wire.
//!
//! Nothing here fails the caller. Malformed datagrams and data sets with no
//! known template are expected on a live network (startup, template
//! rotation, lossy links) and are reported in [`DecodeOutcome`] instead.

use std::net::SocketAddr;

use nf9_core::template::{parse_options_template_set, parse_template_set, ParsedTemplates};
use nf9_core::wire::{self, FlowSet, FlowSets};
use nf9_core::{decode_records, DecodedRecord, PacketHeader, TemplateKey, WireError};

use crate::template_store::TemplateStore;

/// Destination for decoded records. Records are handed over one at a time,
/// as soon as each is decoded.
pub trait RecordSink {
    fn accept(&mut self, record: DecodedRecord);
}

impl RecordSink for Vec<DecodedRecord> {
    fn accept(&mut self, record: DecodedRecord) {
        self.push(record);
    }
}

/// What happened to one datagram.
#[derive(Debug)]
pub enum DecodeOutcome {
    /// The header was valid; sets were walked as far as possible.
    Processed(DatagramSummary),
    /// The datagram was dropped before any set was read.
    Malformed(WireError),
}

impl DecodeOutcome {
    pub fn records(&self) -> usize {
        match self {
            DecodeOutcome::Processed(s) => s.records,
            DecodeOutcome::Malformed(_) => 0,
        }
    }
}

/// Counters for a datagram whose header parsed.
#[derive(Debug)]
pub struct DatagramSummary {
    pub header: PacketHeader,
    /// Templates (regular and options) stored.
    pub templates: usize,
    /// Data sets decoded against a known template.
    pub data_sets: usize,
    /// Records handed to the sink.
    pub records: usize,
    /// Data sets skipped because their template is not known yet.
    pub missing_templates: usize,
    /// Why the set walk or a template set stopped early, if it did.
    pub aborted: Option<WireError>,
}

impl DatagramSummary {
    fn new(header: PacketHeader) -> Self {
        Self {
            header,
            templates: 0,
            data_sets: 0,
            records: 0,
            missing_templates: 0,
            aborted: None,
        }
    }
}

/// Decodes datagrams against a template store it feeds.
#[derive(Clone)]
pub struct PacketDecoder {
    store: TemplateStore,
}

impl PacketDecoder {
    pub fn new(store: TemplateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Decode one datagram received from `exporter`.
    pub fn decode(
        &self,
        exporter: SocketAddr,
        datagram: &[u8],
        sink: &mut dyn RecordSink,
    ) -> DecodeOutcome {
        let (header, body) = match wire::parse_header(datagram) {
            Ok(parsed) => parsed,
            Err(e) => return DecodeOutcome::Malformed(e),
        };

        let source_id = header.source_id.get();
        let mut summary = DatagramSummary::new(header);
        let mut data_sets = Vec::new();

        for set in FlowSets::new(body) {
            let set = match set {
                Ok(set) => set,
                Err(e) => {
                    summary.aborted = Some(e);
                    break;
                }
            };

            match set {
                FlowSet::Template(body) => {
                    let parsed = parse_template_set(body);
                    self.store_templates(exporter, source_id, parsed, &mut summary);
                }
                FlowSet::OptionsTemplate(body) => {
                    let parsed = parse_options_template_set(body);
                    self.store_templates(exporter, source_id, parsed, &mut summary);
                }
                FlowSet::Data { template_id, body } => data_sets.push((template_id, body)),
                FlowSet::Reserved { set_id } => {
                    tracing::trace!(set_id, %exporter, "skipping reserved flowset");
                }
            }
        }

        for (template_id, body) in data_sets {
            let key = TemplateKey::new(exporter, source_id, template_id);
            let Some(template) = self.store.get(&key) else {
                summary.missing_templates += 1;
                continue;
            };

            summary.data_sets += 1;
            for record in decode_records(&template, body) {
                sink.accept(record);
                summary.records += 1;
            }
        }

        DecodeOutcome::Processed(summary)
    }

    fn store_templates(
        &self,
        exporter: SocketAddr,
        source_id: u32,
        parsed: ParsedTemplates,
        summary: &mut DatagramSummary,
    ) {
        for template in parsed.templates {
            let key = TemplateKey::new(exporter, source_id, template.id);
            self.store.put(key, template);
            summary.templates += 1;
        }
        if parsed.error.is_some() && summary.aborted.is_none() {
            summary.aborted = parsed.error;
        }
    }
}
