//! Record forwarding: the sink the listener decodes into.
//!
//! Every record goes to the delivery pipeline. With `--verbose` it is also
//! echoed to stdout.

use std::io::Write;

use nf9_core::DecodedRecord;
use nf9_services::{EnqueueError, FlowProducer, RecordSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoFormat {
    /// `NAME=value NAME=value`
    Text,
    Json,
    PrettyJson,
}

impl EchoFormat {
    pub fn from_flags(json: bool, pretty: bool) -> Self {
        match (json, pretty) {
            (true, true) => EchoFormat::PrettyJson,
            (true, false) => EchoFormat::Json,
            (false, _) => EchoFormat::Text,
        }
    }

    fn render(self, record: &DecodedRecord) -> serde_json::Result<String> {
        match self {
            EchoFormat::Text => Ok(record.to_string()),
            EchoFormat::Json => serde_json::to_string(record),
            EchoFormat::PrettyJson => serde_json::to_string_pretty(record),
        }
    }
}

/// Stdout echo of forwarded records. Switches itself off after the first
/// failed write.
struct Echo {
    format: Option<EchoFormat>,
}

impl Echo {
    fn write(&mut self, out: &mut impl Write, record: &DecodedRecord) {
        let Some(format) = self.format else {
            return;
        };

        let line = match format.render(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to render record");
                return;
            }
        };

        if let Err(e) = writeln!(out, "{line}") {
            tracing::debug!(error = %e, "stdout echo failed, disabling echo");
            self.format = None;
        }
    }
}

pub struct Forwarder {
    producer: FlowProducer,
    echo: Echo,
}

impl Forwarder {
    pub fn new(producer: FlowProducer, echo: Option<EchoFormat>) -> Self {
        Self {
            producer,
            echo: Echo { format: echo },
        }
    }
}

impl RecordSink for Forwarder {
    fn accept(&mut self, record: DecodedRecord) {
        if self.echo.format.is_some() {
            self.echo.write(&mut std::io::stdout().lock(), &record);
        }

        match self.producer.enqueue(&record) {
            Ok(()) => {}
            // Counted in the pipeline stats; the stats logger reports it.
            Err(EnqueueError::QueueFull) => tracing::trace!("delivery queue full, record dropped"),
            Err(EnqueueError::Closed) => {
                tracing::debug!("delivery pipeline closed, record dropped")
            }
            Err(e @ EnqueueError::Encode(_)) => tracing::warn!(error = %e, "record dropped"),
        }
    }
}
