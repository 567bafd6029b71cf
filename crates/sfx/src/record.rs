// ai
//! 📦 Canonical records: what a sensor line becomes once it has been told what it is.
//!
//! A [`CanonicalRecord`] is built fresh by the decoder for one raw record, keyed by
//! storage key, in descriptor field order. It never changes after decoding, with one
//! exception: the store-assigned [`DocumentId`], which can be set exactly once, on
//! first persistence. After the insert call returns, the record is dropped. No caching.
//! No sentimentality. 🦆

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::RecordKind;
use crate::value::FieldValue;

/// 📄 A document as the store sees it: a JSON object.
pub type Document = Map<String, Value>;

/// 🎫 The identifier the store hands back after the first insert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// ✅ A decoded, type-coerced record conforming to one record type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    kind: RecordKind,
    id: Option<DocumentId>,
    fields: Vec<(&'static str, FieldValue)>,
}

impl CanonicalRecord {
    pub(crate) fn with_capacity(kind: RecordKind, capacity: usize) -> Self {
        Self {
            kind,
            id: None,
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// 🎫 The store-assigned id, if this record has been persisted.
    pub fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }

    /// 🎫 Stamp the store-assigned id. Only the first assignment sticks.
    ///
    /// Returns `false` (and leaves the original id alone) when an id was already set.
    pub fn assign_id(&mut self, id: DocumentId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| *key == storage_key)
            .map(|(_, value)| value)
    }

    /// 🔤 A string-ish field, or `""` when it is missing or not string-shaped.
    pub fn text(&self, storage_key: &str) -> &str {
        self.get(storage_key).and_then(FieldValue::as_str).unwrap_or("")
    }

    /// 🔢 A count field, or `0`.
    pub fn count(&self, storage_key: &str) -> i64 {
        self.get(storage_key).and_then(FieldValue::as_count).unwrap_or(0)
    }

    /// 📋 Storage keys and values, in descriptor order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (*key, value))
    }

    /// 🔧 Set a field. Decoder and post-load hooks only: after decoding the record is frozen.
    pub(crate) fn put(&mut self, storage_key: &'static str, value: FieldValue) {
        match self.fields.iter_mut().find(|(key, _)| *key == storage_key) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((storage_key, value)),
        }
    }

    /// 📄 Render as a store document. The id is the store's business and stays out of the body.
    pub fn to_document(&self) -> Document {
        self.fields
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.to_json()))
            .collect()
    }
}
