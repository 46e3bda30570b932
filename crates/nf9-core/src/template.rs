//! Templates: the field layouts exporters announce ahead of their data.
//!
//! A template is resolved against the field registry once, when it is
//! parsed, so decoding a data record never looks a type code up again.

use std::borrow::Cow;
use std::net::SocketAddr;

use zerocopy::FromBytes;

use crate::fields::{self, FieldKind};
use crate::wire::{
    FieldSpecifier, OptionsTemplateHeader, TemplateHeader, WireError, MIN_DATA_SET_ID,
};

/// Identifies a template: the exporter's transport address, the source id
/// from the packet header and the template id.
///
/// Two routers may both announce template 256; one router may run several
/// exporting processes distinguished only by source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub exporter: SocketAddr,
    pub source_id: u32,
    pub template_id: u16,
}

impl TemplateKey {
    pub fn new(exporter: SocketAddr, source_id: u32, template_id: u16) -> Self {
        Self {
            exporter,
            source_id,
            template_id,
        }
    }
}

/// A (type code, byte length) pair as announced by the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: u16,
    pub length: u16,
}

/// One value slot of a template, with its registry entry resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub spec: FieldSpec,
    pub name: Cow<'static, str>,
    pub kind: FieldKind,
}

/// An ordered field layout. The nth column describes the nth value of every
/// record in a matching data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub id: u16,
    columns: Vec<Column>,
    record_len: usize,
    options: bool,
}

impl Template {
    /// A regular template: every field is named by the field registry.
    pub fn new(id: u16, fields: Vec<FieldSpec>) -> Self {
        let columns = fields
            .into_iter()
            .map(|spec| {
                let d = fields::describe(spec.field_type);
                Column {
                    spec,
                    name: d.name,
                    kind: d.kind,
                }
            })
            .collect();
        Self::from_columns(id, columns, false)
    }

    /// An options template: scope fields first, named by scope type, then
    /// option fields named by the field registry.
    pub fn options(id: u16, scopes: Vec<FieldSpec>, fields: Vec<FieldSpec>) -> Self {
        let scope_columns = scopes.into_iter().map(|spec| {
            let d = fields::describe_scope(spec.field_type);
            Column {
                spec,
                name: d.name,
                kind: d.kind,
            }
        });
        let option_columns = fields.into_iter().map(|spec| {
            let d = fields::describe(spec.field_type);
            Column {
                spec,
                name: d.name,
                kind: d.kind,
            }
        });
        Self::from_columns(id, scope_columns.chain(option_columns).collect(), true)
    }

    fn from_columns(id: u16, columns: Vec<Column>, options: bool) -> Self {
        let record_len = columns.iter().map(|c| c.spec.length as usize).sum();
        Self {
            id,
            columns,
            record_len,
            options,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Size in bytes of one data record described by this template.
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// True if announced in an options template set.
    pub fn is_options(&self) -> bool {
        self.options
    }
}

/// Result of parsing a template set body.
///
/// Templates parsed before a malformed record are kept; `error` records why
/// parsing of the set stopped early, if it did.
#[derive(Debug, Default)]
pub struct ParsedTemplates {
    pub templates: Vec<Template>,
    pub error: Option<WireError>,
}

/// Parse the body of a template set (set id 0).
pub fn parse_template_set(mut body: &[u8]) -> ParsedTemplates {
    const HEADER: usize = std::mem::size_of::<TemplateHeader>();
    let mut parsed = ParsedTemplates::default();

    while let Some(header) = TemplateHeader::read_from_prefix(body) {
        let template_id = header.template_id.get();
        // Zero padding at the end of the set reads as template id 0.
        if template_id < MIN_DATA_SET_ID {
            break;
        }

        let field_count = header.field_count.get() as usize;
        let need = HEADER + field_count * std::mem::size_of::<FieldSpecifier>();
        if need > body.len() {
            parsed.error = Some(WireError::TemplateOverrun {
                template_id,
                need,
                remaining: body.len(),
            });
            break;
        }

        let fields = read_specs(&body[HEADER..need]);
        parsed.templates.push(Template::new(template_id, fields));
        body = &body[need..];
    }

    parsed
}

/// Parse the body of an options template set (set id 1).
pub fn parse_options_template_set(mut body: &[u8]) -> ParsedTemplates {
    const HEADER: usize = std::mem::size_of::<OptionsTemplateHeader>();
    let mut parsed = ParsedTemplates::default();

    // Padding only follows the last record; a short tail or an id below 256
    // ends the set.
    while let Some(header) = OptionsTemplateHeader::read_from_prefix(body) {
        let template_id = header.template_id.get();
        if template_id < MIN_DATA_SET_ID {
            break;
        }

        let scope_len = header.scope_length.get() as usize;
        let option_len = header.option_length.get() as usize;
        let need = HEADER + scope_len + option_len;
        if need > body.len() {
            parsed.error = Some(WireError::TemplateOverrun {
                template_id,
                need,
                remaining: body.len(),
            });
            break;
        }

        let scopes = read_specs(&body[HEADER..HEADER + scope_len]);
        let fields = read_specs(&body[HEADER + scope_len..need]);
        parsed
            .templates
            .push(Template::options(template_id, scopes, fields));
        body = &body[need..];
    }

    parsed
}

fn read_specs(bytes: &[u8]) -> Vec<FieldSpec> {
    bytes
        .chunks_exact(std::mem::size_of::<FieldSpecifier>())
        .filter_map(FieldSpecifier::read_from)
        .map(|s| FieldSpec {
            field_type: s.field_type.get(),
            length: s.length.get(),
        })
        .collect()
}
