//! nf9-core: NetFlow v9 wire format, field registry, templates and
//! record decoding. All other nf9 crates depend on this one.

pub mod config;
pub mod fields;
pub mod record;
pub mod template;
pub mod wire;

pub use record::{decode_records, DecodedRecord};
pub use template::{FieldSpec, Template, TemplateKey};
pub use wire::{PacketHeader, WireError};
