// ai
//! 🗺️ Record Type Descriptors: the Rosetta Stone, but for sensor logs.
//!
//! 🎬 COLD OPEN: INT. UNITED NATIONS, SIMULTANEOUS TRANSLATION BOOTH, 2:47 AM
//!
//! The columnar log says `id.orig_h`. The JSON log also says `id.orig_h`, but as a
//! flat key with a dot in it, which is a choice. The document store says `id_orig_h`
//! because dots in keys upset it. Same field. Three passports. This module is the
//! border agent with the lookup table.
//!
//! Each record kind gets one [`RecordTypeDescriptor`]: a static, inspectable table of
//! [`FieldDescriptor`]s. No reflection, no tags, no magic. Just data you can print.
//!
//! ```text
//!   wire key (per encoding)        logical type      storage key
//!  ┌───────────────────────┐      ┌────────────┐    ┌───────────┐
//!  │ sensor_log: id.orig_h │      │            │    │           │
//!  │ json:       id.orig_h │ ───▶ │    addr    │ ──▶│ id_orig_h │
//!  │ document:   id_orig_h │      │            │    │           │
//!  └───────────────────────┘      └────────────┘    └───────────┘
//! ```
//!
//! 🧠 Knowledge graph:
//! - Descriptors live in `schema/conn.rs` and `schema/dns.rs` as `static` tables.
//! - The `registry` module collects them once at startup.
//! - The `decoder` walks `fields` in order; `post_load` runs once afterwards.
//! - The `router` turns `indexes` into `IndexSpec`s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coerce::{LogicalType, TypeCoercionError};
use crate::envelope::Envelope;
use crate::record::CanonicalRecord;
use crate::registry::RegistryError;

pub mod conn;
pub mod dns;

/// 📡 The three ways a record can arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// 📜 Tab-separated columnar sensor log with `#fields` header.
    SensorLog,
    /// 📡 Line-delimited JSON, one object per line, dotted keys.
    Json,
    /// 📄 A document as kept by the store, keyed by storage key.
    Document,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::SensorLog => "sensor_log",
            Encoding::Json => "json",
            Encoding::Document => "document",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = RegistryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "sensor_log" | "tsv" => Ok(Encoding::SensorLog),
            "json" | "ndjson" => Ok(Encoding::Json),
            "document" => Ok(Encoding::Document),
            unknown => Err(RegistryError::UnknownEncoding(unknown.to_string())),
        }
    }
}

/// 🏷️ The record kinds this crate knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Conn,
    Dns,
}

impl RecordKind {
    pub const ALL: [RecordKind; 2] = [RecordKind::Conn, RecordKind::Dns];

    /// 📛 The `#path` the sensor writes for this kind, also the log file stem.
    pub fn sensor_path(self) -> &'static str {
        match self {
            RecordKind::Conn => "conn",
            RecordKind::Dns => "dns",
        }
    }

    /// 🔍 Recognize a `#path` value or a file stem like `dns.04:00:00-05:00:00`.
    pub fn from_sensor_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let stem = kind.sensor_path();
            path == stem || path.strip_prefix(stem).is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sensor_path())
    }
}

/// 🛂 Where a field lives in each encoding. `None` means "this encoding does not carry it".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceKeys {
    pub sensor_log: Option<&'static str>,
    pub json: Option<&'static str>,
    pub document: Option<&'static str>,
}

impl SourceKeys {
    pub fn get(&self, encoding: Encoding) -> Option<&'static str> {
        match encoding {
            Encoding::SensorLog => self.sensor_log,
            Encoding::Json => self.json,
            Encoding::Document => self.document,
        }
    }
}

/// 📋 One field of one record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub storage_key: &'static str,
    pub logical_type: LogicalType,
    pub source_keys: SourceKeys,
    /// 🪝 Whether the record type's post-load hook finishes this field.
    pub has_custom_hook: bool,
}

impl FieldDescriptor {
    /// 🏗️ The common case: sensor and JSON share one wire key, the document uses the storage key.
    pub const fn mirrored(
        storage_key: &'static str,
        wire_key: &'static str,
        logical_type: LogicalType,
    ) -> Self {
        Self {
            storage_key,
            logical_type,
            source_keys: SourceKeys {
                sensor_log: Some(wire_key),
                json: Some(wire_key),
                document: Some(storage_key),
            },
            has_custom_hook: false,
        }
    }

    /// 🏗️ Same name everywhere. Rare, delightful.
    pub const fn plain(storage_key: &'static str, logical_type: LogicalType) -> Self {
        Self::mirrored(storage_key, storage_key, logical_type)
    }

    /// 🙈 This encoding does not carry the field generically (a hook may still fill it in).
    pub const fn without_json(mut self) -> Self {
        self.source_keys.json = None;
        self
    }

    pub const fn with_custom_hook(mut self) -> Self {
        self.has_custom_hook = true;
        self
    }

    pub fn wire_key(&self, encoding: Encoding) -> Option<&'static str> {
        self.source_keys.get(encoding)
    }
}

/// 🪝 A per-record-type post-load hook: runs once, after every field was coerced.
///
/// Gets the half-built record and the opened envelope, so it can read raw,
/// encoding-specific values and overwrite canonical fields.
pub type PostLoadHook = fn(&mut CanonicalRecord, &Envelope<'_>) -> Result<(), TypeCoercionError>;

/// 🗺️ The declarative schema for one record kind across all its encodings.
#[derive(Clone, Copy)]
pub struct RecordTypeDescriptor {
    pub kind: RecordKind,
    /// 📋 Insertion-ordered; order matters only for positional encodings.
    pub fields: &'static [FieldDescriptor],
    pub encodings: &'static [Encoding],
    /// 🗂️ Index declarations: `$hashed:field`, `-field` (descending), or `field` (ascending).
    pub indexes: &'static [&'static str],
    pub post_load: Option<PostLoadHook>,
}

impl fmt::Debug for RecordTypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordTypeDescriptor")
            .field("kind", &self.kind)
            .field("fields", &self.fields.len())
            .field("encodings", &self.encodings)
            .field("indexes", &self.indexes)
            .field("post_load", &self.post_load.is_some())
            .finish()
    }
}

impl RecordTypeDescriptor {
    pub fn supports(&self, encoding: Encoding) -> bool {
        self.encodings.contains(&encoding)
    }

    pub fn field(&self, storage_key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.storage_key == storage_key)
    }

    /// 🪝 True when any field asks for the post-load hook.
    pub fn has_custom_hook(&self) -> bool {
        self.fields.iter().any(|field| field.has_custom_hook)
    }

    /// 🔒 Check the invariants a registry refuses to live without.
    pub(crate) fn validate(&self) -> Result<(), RegistryError> {
        for (position, field) in self.fields.iter().enumerate() {
            if self.fields[..position]
                .iter()
                .any(|earlier| earlier.storage_key == field.storage_key)
            {
                return Err(RegistryError::DuplicateStorageKey {
                    kind: self.kind,
                    storage_key: field.storage_key,
                });
            }
            if let Some(encoding) = [Encoding::SensorLog, Encoding::Json, Encoding::Document]
                .into_iter()
                .find(|encoding| field.wire_key(*encoding).is_some() && !self.supports(*encoding))
            {
                return Err(RegistryError::UnregisteredEncoding {
                    kind: self.kind,
                    storage_key: field.storage_key,
                    encoding,
                });
            }
        }
        if self.has_custom_hook() && self.post_load.is_none() {
            return Err(RegistryError::MissingHook { kind: self.kind });
        }
        Ok(())
    }
}

/// 🕰️ The JSON writer emits `ts` as a bare number with no int/float distinction.
///
/// Descriptors leave `ts` out of their JSON source keys so the generic pass writes the
/// zero instant; this hook then reads the raw value as a [`crate::value::NumberLike`]
/// and resolves it. For the other encodings it is a no-op.
pub(crate) fn resolve_generic_timestamp(
    record: &mut CanonicalRecord,
    envelope: &Envelope<'_>,
) -> Result<(), TypeCoercionError> {
    if envelope.encoding() != Encoding::Json {
        return Ok(());
    }
    let Some(raw) = envelope.get("ts") else {
        return Ok(());
    };
    let generic = crate::value::NumberLike::from_raw(&raw).ok_or_else(|| TypeCoercionError {
        logical_type: LogicalType::Time,
        found: format!("{raw:?}"),
    })?;
    let instant = crate::coerce::coerce_time(&generic)?;
    record.put("ts", crate::value::FieldValue::Time(instant));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_encoding_names_round_trip_through_from_str() -> anyhow::Result<()> {
        for encoding in [Encoding::SensorLog, Encoding::Json, Encoding::Document] {
            assert_eq!(encoding.name().parse::<Encoding>()?, encoding);
        }
        assert!("protobuf".parse::<Encoding>().is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_file_stems_reveal_the_record_kind() {
        assert_eq!(RecordKind::from_sensor_path("conn"), Some(RecordKind::Conn));
        assert_eq!(
            RecordKind::from_sensor_path("dns.04:00:00-05:00:00"),
            Some(RecordKind::Dns)
        );
        assert_eq!(RecordKind::from_sensor_path("connection"), None);
        assert_eq!(RecordKind::from_sensor_path("http"), None);
    }

    #[test]
    fn the_one_where_mirrored_fields_know_their_three_names() {
        let field = FieldDescriptor::mirrored("id_orig_h", "id.orig_h", LogicalType::Addr);
        assert_eq!(field.wire_key(Encoding::SensorLog), Some("id.orig_h"));
        assert_eq!(field.wire_key(Encoding::Json), Some("id.orig_h"));
        assert_eq!(field.wire_key(Encoding::Document), Some("id_orig_h"));
        assert_eq!(field.without_json().wire_key(Encoding::Json), None);
    }

    #[test]
    fn the_one_where_a_descriptor_with_twins_is_rejected() {
        static TWINS: &[FieldDescriptor] = &[
            FieldDescriptor::plain("uid", LogicalType::String),
            FieldDescriptor::plain("uid", LogicalType::Count),
        ];
        let descriptor = RecordTypeDescriptor {
            kind: RecordKind::Conn,
            fields: TWINS,
            encodings: &[Encoding::SensorLog, Encoding::Json, Encoding::Document],
            indexes: &[],
            post_load: None,
        };
        assert!(matches!(
            descriptor.validate(),
            Err(RegistryError::DuplicateStorageKey { storage_key: "uid", .. })
        ));
    }

    #[test]
    fn the_one_where_a_hooked_field_without_a_hook_is_rejected() {
        static HOOKED: &[FieldDescriptor] =
            &[FieldDescriptor::plain("ts", LogicalType::Time).with_custom_hook()];
        let descriptor = RecordTypeDescriptor {
            kind: RecordKind::Dns,
            fields: HOOKED,
            encodings: &[Encoding::SensorLog, Encoding::Json, Encoding::Document],
            indexes: &[],
            post_load: None,
        };
        assert!(matches!(descriptor.validate(), Err(RegistryError::MissingHook { .. })));
    }

    #[test]
    fn the_one_where_a_field_cannot_name_an_unregistered_encoding() {
        static LONELY: &[FieldDescriptor] = &[FieldDescriptor::plain("uid", LogicalType::String)];
        let descriptor = RecordTypeDescriptor {
            kind: RecordKind::Conn,
            fields: LONELY,
            encodings: &[Encoding::SensorLog],
            indexes: &[],
            post_load: None,
        };
        assert!(matches!(
            descriptor.validate(),
            Err(RegistryError::UnregisteredEncoding { encoding: Encoding::Json, .. })
        ));
    }
}
