//! NetFlow v9 wire format: on-wire types for exporter datagrams.
//!
//! Layout follows RFC 3954. Every multi-byte field is big-endian, so the
//! structs below use zerocopy's network-endian integers and are `Unaligned`:
//! they can be read straight out of a receive buffer at any offset. There is
//! no unsafe code in this module.
//!
//! A datagram is a fixed 20-byte [`PacketHeader`] followed by FlowSets.
//! Each FlowSet starts with a [`FlowSetHeader`] whose length covers the
//! header itself, the body and any trailing padding.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Packet Header ────────────────────────────────────────────────────────────

/// Fixed header at the start of every NetFlow v9 export packet.
///
/// Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Export format version. Must be 9.
    pub version: U16,

    /// Total number of records (template and data) in this packet.
    /// Exporters disagree on what this counts, so it is informational only.
    pub count: U16,

    /// Milliseconds since the exporting device booted.
    pub sys_uptime: U32,

    /// Seconds since the unix epoch at export time.
    pub unix_secs: U32,

    /// Incremental sequence counter of all export packets from this source.
    pub sequence: U32,

    /// Exporter-chosen identifier scoping template ids within one device.
    pub source_id: U32,
}

assert_eq_size!(PacketHeader, [u8; 20]);

// ── FlowSet Header ───────────────────────────────────────────────────────────

/// Header of a FlowSet.
///
/// Wire size: 4 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FlowSetHeader {
    /// 0 = template set, 1 = options template set, >= 256 = data set.
    pub id: U16,

    /// Length of the set in bytes, including this header and padding.
    pub length: U16,
}

assert_eq_size!(FlowSetHeader, [u8; 4]);

// ── Template records ─────────────────────────────────────────────────────────

/// Header of one template record inside a template set.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct TemplateHeader {
    pub template_id: U16,
    /// Number of field specifiers that follow.
    pub field_count: U16,
}

assert_eq_size!(TemplateHeader, [u8; 4]);

/// Header of one options template record inside an options template set.
///
/// Unlike [`TemplateHeader`], both lengths are in bytes, not field counts.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct OptionsTemplateHeader {
    pub template_id: U16,
    pub scope_length: U16,
    pub option_length: U16,
}

assert_eq_size!(OptionsTemplateHeader, [u8; 6]);

/// A (type, length) pair describing one value slot of a data record.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FieldSpecifier {
    pub field_type: U16,
    pub length: U16,
}

assert_eq_size!(FieldSpecifier, [u8; 4]);

// ── Constants ────────────────────────────────────────────────────────────────

/// The only export version this collector understands.
pub const NETFLOW_V9: u16 = 9;

/// Size of [`PacketHeader`] on the wire.
pub const HEADER_LEN: usize = 20;

/// Size of [`FlowSetHeader`] on the wire.
pub const SET_HEADER_LEN: usize = 4;

/// FlowSet id carrying template records.
pub const TEMPLATE_SET_ID: u16 = 0;

/// FlowSet id carrying options template records.
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 1;

/// Lowest FlowSet id that refers to a template (data sets).
/// Ids 2..=255 are reserved.
pub const MIN_DATA_SET_ID: u16 = 256;

/// Default receive buffer. Practical v9 packets fit well under a jumbo frame.
pub const MAX_DATAGRAM: usize = 8960;

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse and validate the packet header.
///
/// Returns the header and the bytes following it.
pub fn parse_header(datagram: &[u8]) -> Result<(PacketHeader, &[u8]), WireError> {
    let header = PacketHeader::read_from_prefix(datagram).ok_or(WireError::TooShort {
        len: datagram.len(),
        need: HEADER_LEN,
    })?;

    let version = header.version.get();
    if version != NETFLOW_V9 {
        return Err(WireError::UnsupportedVersion(version));
    }

    Ok((header, &datagram[HEADER_LEN..]))
}

/// One FlowSet, classified by id. Bodies exclude the 4-byte set header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSet<'a> {
    Template(&'a [u8]),
    OptionsTemplate(&'a [u8]),
    Data { template_id: u16, body: &'a [u8] },
    Reserved { set_id: u16 },
}

/// Iterator over the FlowSets that follow a packet header.
///
/// Yields at most one error, after which it is exhausted: a set whose length
/// field is bogus leaves no reliable way to find the next one.
pub struct FlowSets<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> FlowSets<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            rest: body,
            failed: false,
        }
    }
}

impl<'a> Iterator for FlowSets<'a> {
    type Item = Result<FlowSet<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        // Fewer than a set header's worth of bytes is trailing padding.
        let header = FlowSetHeader::read_from_prefix(self.rest)?;
        let set_id = header.id.get();
        let length = header.length.get() as usize;

        if length < SET_HEADER_LEN {
            self.failed = true;
            return Some(Err(WireError::SetTooShort { set_id, length }));
        }
        if length > self.rest.len() {
            self.failed = true;
            return Some(Err(WireError::SetOverrun {
                set_id,
                length,
                remaining: self.rest.len(),
            }));
        }

        let body = &self.rest[SET_HEADER_LEN..length];
        self.rest = &self.rest[length..];

        Some(Ok(match set_id {
            TEMPLATE_SET_ID => FlowSet::Template(body),
            OPTIONS_TEMPLATE_SET_ID => FlowSet::OptionsTemplate(body),
            id if id >= MIN_DATA_SET_ID => FlowSet::Data {
                template_id: id,
                body,
            },
            id => FlowSet::Reserved { set_id: id },
        }))
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {len} bytes is shorter than the {need}-byte header")]
    TooShort { len: usize, need: usize },

    #[error("unsupported export version {0}")]
    UnsupportedVersion(u16),

    #[error("flowset {set_id} declares length {length}, below the set header size")]
    SetTooShort { set_id: u16, length: usize },

    #[error("flowset {set_id} declares length {length} but only {remaining} bytes remain")]
    SetOverrun {
        set_id: u16,
        length: usize,
        remaining: usize,
    },

    #[error("template {template_id} needs {need} bytes but only {remaining} remain in its set")]
    TemplateOverrun {
        template_id: u16,
        need: usize,
        remaining: usize,
    },
}

// ── Tests ────────────────────────────────────────────────────────────────────
