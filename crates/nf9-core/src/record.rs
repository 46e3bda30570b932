//! Decoded flow records and the data-set decoder that produces them.

use std::borrow::Cow;
use std::fmt;
use std::slice::ChunksExact;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::template::Template;

/// One flow observation: field name → rendered value, in template order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedRecord {
    fields: Vec<(Cow<'static, str>, String)>,
}

impl DecodedRecord {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Insert a value. A repeated name replaces the earlier value in place,
    /// so the record always serializes to a JSON object with unique keys.
    pub fn insert(&mut self, name: Cow<'static, str>, value: String) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_ref(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compact JSON object encoding, as published to the bus.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for DecodedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name.as_ref(), value)?;
        }
        map.end()
    }
}

/// `NAME=value` pairs separated by spaces.
impl fmt::Display for DecodedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Decode the body of a data set against its template.
///
/// The body is a run of fixed-size records. Bytes left over after the last
/// whole record (padding, or a truncated record) are dropped.
pub fn decode_records<'a>(template: &'a Template, body: &'a [u8]) -> Records<'a> {
    let chunks = match template.record_len() {
        0 => None,
        n => Some(body.chunks_exact(n)),
    };
    Records { template, chunks }
}

/// Iterator returned by [`decode_records`].
pub struct Records<'a> {
    template: &'a Template,
    chunks: Option<ChunksExact<'a, u8>>,
}

impl Records<'_> {
    /// Bytes that did not form a whole record.
    pub fn remainder(&self) -> usize {
        self.chunks.as_ref().map(|c| c.remainder().len()).unwrap_or(0)
    }
}

impl Iterator for Records<'_> {
    type Item = DecodedRecord;

    fn next(&mut self) -> Option<DecodedRecord> {
        let mut raw = self.chunks.as_mut()?.next()?;
        let columns = self.template.columns();
        let mut record = DecodedRecord::with_capacity(columns.len());

        for column in columns {
            let (value, rest) = raw.split_at(column.spec.length as usize);
            record.insert(column.name.clone(), column.kind.render(value));
            raw = rest;
        }

        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.chunks {
            Some(c) => c.size_hint(),
            None => (0, Some(0)),
        }
    }
}
