//! Field registry: names and render rules for NetFlow v9 field types.
//!
//! Type codes and names follow RFC 3954 §8. A field's length is chosen by
//! the exporter per template, so every render rule is total over any byte
//! span: when a span does not have the shape a rule expects (an "address"
//! of 3 bytes, a 12-byte counter) it falls back to hex rather than failing.

use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr};

/// How a field's bytes become a display string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Big-endian unsigned integer, decimal.
    Unsigned,
    /// IPv4 address, dotted quad.
    Ipv4,
    /// IPv6 address, RFC 5952 hextets.
    Ipv6,
    /// 48-bit MAC address, colon separated.
    Mac,
    /// Unsigned code with symbolic names for known values.
    Enum(&'static [(u64, &'static str)]),
    /// NUL-padded text.
    Text,
    /// Opaque bytes, lowercase hex.
    Bytes,
}

impl FieldKind {
    /// Render a value. Never fails.
    pub fn render(self, bytes: &[u8]) -> String {
        match self {
            FieldKind::Unsigned => render_unsigned(bytes),
            FieldKind::Ipv4 => match <[u8; 4]>::try_from(bytes) {
                Ok(octets) => Ipv4Addr::from(octets).to_string(),
                Err(_) => hex::encode(bytes),
            },
            FieldKind::Ipv6 => match <[u8; 16]>::try_from(bytes) {
                Ok(octets) => Ipv6Addr::from(octets).to_string(),
                Err(_) => hex::encode(bytes),
            },
            FieldKind::Mac => {
                if bytes.len() == 6 {
                    bytes
                        .iter()
                        .map(|b| format!("{b:02x}"))
                        .collect::<Vec<_>>()
                        .join(":")
                } else {
                    hex::encode(bytes)
                }
            }
            FieldKind::Enum(names) => match as_u64(bytes) {
                Some(code) => names
                    .iter()
                    .find(|(value, _)| *value == code)
                    .map(|(_, name)| (*name).to_string())
                    .unwrap_or_else(|| code.to_string()),
                None => hex::encode(bytes),
            },
            FieldKind::Text => {
                let end = bytes
                    .iter()
                    .rposition(|b| *b != 0)
                    .map(|i| i + 1)
                    .unwrap_or(0);
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }
            FieldKind::Bytes => hex::encode(bytes),
        }
    }
}

/// Name and render rule for one field type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: Cow<'static, str>,
    pub kind: FieldKind,
}

/// Look up a field type code. Unknown codes (vendor or newer types) get a
/// generic `field-<code>` name and hex rendering.
pub fn describe(field_type: u16) -> FieldDescriptor {
    match lookup(field_type) {
        Some((name, kind)) => FieldDescriptor {
            name: Cow::Borrowed(name),
            kind,
        },
        None => FieldDescriptor {
            name: Cow::Owned(format!("field-{field_type}")),
            kind: FieldKind::Bytes,
        },
    }
}

/// Look up an options-template scope type. Scope values are identifiers
/// (interface index, line card number, ...), rendered as integers.
pub fn describe_scope(scope_type: u16) -> FieldDescriptor {
    let name = match scope_type {
        1 => Cow::Borrowed("SCOPE_SYSTEM"),
        2 => Cow::Borrowed("SCOPE_INTERFACE"),
        3 => Cow::Borrowed("SCOPE_LINE_CARD"),
        4 => Cow::Borrowed("SCOPE_CACHE"),
        5 => Cow::Borrowed("SCOPE_TEMPLATE"),
        other => Cow::Owned(format!("scope-{other}")),
    };
    FieldDescriptor {
        name,
        kind: FieldKind::Unsigned,
    }
}

// ── Symbolic values ──────────────────────────────────────────────────────────

const SAMPLING_ALGORITHMS: &[(u64, &str)] = &[(1, "deterministic"), (2, "random")];

const ENGINE_TYPES: &[(u64, &str)] = &[(0, "RP"), (1, "VIP/linecard"), (2, "PFC/DFC")];

const MPLS_LABEL_TYPES: &[(u64, &str)] = &[
    (0, "unknown"),
    (1, "TE-MIDPT"),
    (2, "ATOM"),
    (3, "VPN"),
    (4, "BGP"),
    (5, "LDP"),
];

const DIRECTIONS: &[(u64, &str)] = &[(0, "ingress"), (1, "egress")];

// ── Registry ─────────────────────────────────────────────────────────────────

fn lookup(field_type: u16) -> Option<(&'static str, FieldKind)> {
    use FieldKind::*;

    let entry = match field_type {
        1 => ("IN_BYTES", Unsigned),
        2 => ("IN_PKTS", Unsigned),
        3 => ("FLOWS", Unsigned),
        4 => ("PROTOCOL", Unsigned),
        5 => ("SRC_TOS", Unsigned),
        6 => ("TCP_FLAGS", Unsigned),
        7 => ("L4_SRC_PORT", Unsigned),
        8 => ("IPV4_SRC_ADDR", Ipv4),
        9 => ("SRC_MASK", Unsigned),
        10 => ("INPUT_SNMP", Unsigned),
        11 => ("L4_DST_PORT", Unsigned),
        12 => ("IPV4_DST_ADDR", Ipv4),
        13 => ("DST_MASK", Unsigned),
        14 => ("OUTPUT_SNMP", Unsigned),
        15 => ("IPV4_NEXT_HOP", Ipv4),
        16 => ("SRC_AS", Unsigned),
        17 => ("DST_AS", Unsigned),
        18 => ("BGP_IPV4_NEXT_HOP", Ipv4),
        19 => ("MUL_DST_PKTS", Unsigned),
        20 => ("MUL_DST_BYTES", Unsigned),
        21 => ("LAST_SWITCHED", Unsigned),
        22 => ("FIRST_SWITCHED", Unsigned),
        23 => ("OUT_BYTES", Unsigned),
        24 => ("OUT_PKTS", Unsigned),
        25 => ("MIN_PKT_LNGTH", Unsigned),
        26 => ("MAX_PKT_LNGTH", Unsigned),
        27 => ("IPV6_SRC_ADDR", Ipv6),
        28 => ("IPV6_DST_ADDR", Ipv6),
        29 => ("IPV6_SRC_MASK", Unsigned),
        30 => ("IPV6_DST_MASK", Unsigned),
        31 => ("IPV6_FLOW_LABEL", Unsigned),
        32 => ("ICMP_TYPE", Unsigned),
        33 => ("MUL_IGMP_TYPE", Unsigned),
        34 => ("SAMPLING_INTERVAL", Unsigned),
        35 => ("SAMPLING_ALGORITHM", Enum(SAMPLING_ALGORITHMS)),
        36 => ("FLOW_ACTIVE_TIMEOUT", Unsigned),
        37 => ("FLOW_INACTIVE_TIMEOUT", Unsigned),
        38 => ("ENGINE_TYPE", Enum(ENGINE_TYPES)),
        39 => ("ENGINE_ID", Unsigned),
        40 => ("TOTAL_BYTES_EXP", Unsigned),
        41 => ("TOTAL_PKTS_EXP", Unsigned),
        42 => ("TOTAL_FLOWS_EXP", Unsigned),
        44 => ("IPV4_SRC_PREFIX", Ipv4),
        45 => ("IPV4_DST_PREFIX", Ipv4),
        46 => ("MPLS_TOP_LABEL_TYPE", Enum(MPLS_LABEL_TYPES)),
        47 => ("MPLS_TOP_LABEL_IP_ADDR", Ipv4),
        48 => ("FLOW_SAMPLER_ID", Unsigned),
        49 => ("FLOW_SAMPLER_MODE", Enum(SAMPLING_ALGORITHMS)),
        50 => ("FLOW_SAMPLER_RANDOM_INTERVAL", Unsigned),
        52 => ("MIN_TTL", Unsigned),
        53 => ("MAX_TTL", Unsigned),
        54 => ("IPV4_IDENT", Unsigned),
        55 => ("DST_TOS", Unsigned),
        56 => ("IN_SRC_MAC", Mac),
        57 => ("OUT_DST_MAC", Mac),
        58 => ("SRC_VLAN", Unsigned),
        59 => ("DST_VLAN", Unsigned),
        60 => ("IP_PROTOCOL_VERSION", Unsigned),
        61 => ("DIRECTION", Enum(DIRECTIONS)),
        62 => ("IPV6_NEXT_HOP", Ipv6),
        63 => ("BGP_IPV6_NEXT_HOP", Ipv6),
        64 => ("IPV6_OPTION_HEADERS", Unsigned),
        70 => ("MPLS_LABEL_1", Unsigned),
        71 => ("MPLS_LABEL_2", Unsigned),
        72 => ("MPLS_LABEL_3", Unsigned),
        73 => ("MPLS_LABEL_4", Unsigned),
        74 => ("MPLS_LABEL_5", Unsigned),
        75 => ("MPLS_LABEL_6", Unsigned),
        76 => ("MPLS_LABEL_7", Unsigned),
        77 => ("MPLS_LABEL_8", Unsigned),
        78 => ("MPLS_LABEL_9", Unsigned),
        79 => ("MPLS_LABEL_10", Unsigned),
        80 => ("IN_DST_MAC", Mac),
        81 => ("OUT_SRC_MAC", Mac),
        82 => ("IF_NAME", Text),
        83 => ("IF_DESC", Text),
        84 => ("SAMPLER_NAME", Text),
        85 => ("IN_PERMANENT_BYTES", Unsigned),
        86 => ("IN_PERMANENT_PKTS", Unsigned),
        88 => ("FRAGMENT_OFFSET", Unsigned),
        89 => ("FORWARDING_STATUS", Unsigned),
        90 => ("MPLS_PAL_RD", Bytes),
        91 => ("MPLS_PREFIX_LEN", Unsigned),
        92 => ("SRC_TRAFFIC_INDEX", Unsigned),
        93 => ("DST_TRAFFIC_INDEX", Unsigned),
        94 => ("APPLICATION_DESCRIPTION", Text),
        95 => ("APPLICATION_TAG", Bytes),
        96 => ("APPLICATION_NAME", Text),
        98 => ("POSTIP_DIFF_SERV_CODE_POINT", Unsigned),
        99 => ("REPLICATION_FACTOR", Unsigned),
        102 => ("LAYER2_PACKET_SECTION_OFFSET", Unsigned),
        103 => ("LAYER2_PACKET_SECTION_SIZE", Unsigned),
        104 => ("LAYER2_PACKET_SECTION_DATA", Bytes),
        _ => return None,
    };
    Some(entry)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn as_u64(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn render_unsigned(bytes: &[u8]) -> String {
    match as_u64(bytes) {
        Some(value) => value.to_string(),
        None => hex::encode(bytes),
    }
}
