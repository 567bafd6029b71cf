// ai
//! 🔄 Logical Type Coercers: permissive by temperament, typed by necessity.
//!
//! 🎬 *[a count field arrives holding the string "seventeen"]*
//! *[the coercer sighs, writes a warning, and hands back a zero]*
//! *[the record lives to be ingested another day]*
//!
//! Every field in a record type has exactly one [`LogicalType`]. The coercers turn a
//! [`RawScalar`] into the matching [`FieldValue`], or into a [`TypeCoercionError`]
//! that the decoder downgrades to a warning and replaces with the type's zero value.
//! Sensor data is trusted, not re-validated: a negative count is still a count.
//!
//! 🧠 Knowledge graph:
//! - Used by: `decoder` (per field), schema post-load hooks (generic timestamps)
//! - Zero values: empty string, zero count, empty set, `false`, the Unix epoch

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::value::{FieldValue, NumberLike, RawScalar};

/// 🏷️ The fixed menu of logical types. No substitutions. No secret menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    #[serde(rename = "time")]
    Time,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "addr")]
    Addr,
    #[serde(rename = "port")]
    Port,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "interval")]
    Interval,
    #[serde(rename = "count")]
    Count,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "set[string]")]
    StringSet,
}

impl LogicalType {
    /// 📛 The name the sensor writes in its `#types` header line.
    pub fn sensor_name(self) -> &'static str {
        match self {
            LogicalType::Time => "time",
            LogicalType::String => "string",
            LogicalType::Addr => "addr",
            LogicalType::Port => "port",
            LogicalType::Enum => "enum",
            LogicalType::Interval => "interval",
            LogicalType::Count => "count",
            LogicalType::Bool => "bool",
            LogicalType::StringSet => "set[string]",
        }
    }

    /// 🕳️ What a field holds when the source said nothing at all.
    pub fn zero_value(self) -> FieldValue {
        match self {
            LogicalType::Time => FieldValue::Time(DateTime::<Utc>::UNIX_EPOCH),
            LogicalType::String => FieldValue::String(String::new()),
            LogicalType::Addr => FieldValue::Addr(String::new()),
            LogicalType::Port => FieldValue::Port(0),
            LogicalType::Enum => FieldValue::Enum(String::new()),
            LogicalType::Interval => FieldValue::Interval(0.0),
            LogicalType::Count => FieldValue::Count(0),
            LogicalType::Bool => FieldValue::Bool(false),
            LogicalType::StringSet => FieldValue::StringSet(BTreeSet::new()),
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sensor_name())
    }
}

/// ⚠️ A raw value that would not become its logical type.
///
/// Soft by policy: the decoder logs it, substitutes the zero value, and keeps going.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot coerce {found} into {logical_type}")]
pub struct TypeCoercionError {
    pub logical_type: LogicalType,
    /// 🔍 A short rendering of the offending raw value, for the warning log.
    pub found: String,
}

impl TypeCoercionError {
    fn new(logical_type: LogicalType, raw: &RawScalar<'_>) -> Self {
        let found = match raw {
            RawScalar::Column { text, .. } => format!("{text:?}"),
            RawScalar::EmptyColumn => "(empty)".to_string(),
            RawScalar::Json(value) => value.to_string(),
        };
        Self {
            logical_type,
            found,
        }
    }
}

/// 🎯 Coerce one raw scalar into its logical type.
pub fn coerce(raw: RawScalar<'_>, logical_type: LogicalType) -> Result<FieldValue, TypeCoercionError> {
    // -- 🕳️ "(empty)" is a deliberate nothing; every type has a zero for that
    if let RawScalar::EmptyColumn = raw {
        return Ok(logical_type.zero_value());
    }

    match logical_type {
        LogicalType::Time => {
            let number = NumberLike::from_raw(&raw)
                .ok_or_else(|| TypeCoercionError::new(logical_type, &raw))?;
            coerce_time(&number).map(FieldValue::Time)
        }
        LogicalType::String => text_of(&raw, logical_type).map(FieldValue::String),
        LogicalType::Addr => text_of(&raw, logical_type).map(FieldValue::Addr),
        LogicalType::Enum => text_of(&raw, logical_type).map(FieldValue::Enum),
        LogicalType::Port => {
            let wide = NumberLike::from_raw(&raw)
                .and_then(|n| n.to_i64())
                .ok_or_else(|| TypeCoercionError::new(logical_type, &raw))?;
            u16::try_from(wide)
                .map(FieldValue::Port)
                .map_err(|_| TypeCoercionError::new(logical_type, &raw))
        }
        LogicalType::Count => NumberLike::from_raw(&raw)
            .and_then(|n| n.to_i64())
            .map(FieldValue::Count)
            .ok_or_else(|| TypeCoercionError::new(logical_type, &raw)),
        LogicalType::Interval => NumberLike::from_raw(&raw)
            .and_then(|n| n.to_f64())
            .map(FieldValue::Interval)
            .ok_or_else(|| TypeCoercionError::new(logical_type, &raw)),
        LogicalType::Bool => coerce_bool(&raw).map(FieldValue::Bool),
        LogicalType::StringSet => coerce_set(&raw).map(FieldValue::StringSet),
    }
}

/// 🕰️ Resolve a number-in-a-costume to an absolute instant at microsecond precision.
///
/// Plain seconds, fractional seconds, and numeric text all land on the same instant
/// when they describe the same moment.
pub fn coerce_time(number: &NumberLike) -> Result<DateTime<Utc>, TypeCoercionError> {
    let resolved = match number {
        NumberLike::Int(seconds) => DateTime::from_timestamp(*seconds, 0),
        NumberLike::Float(_) | NumberLike::Text(_) => number
            .to_f64()
            .map(|seconds| (seconds * 1_000_000.0).round())
            .filter(|micros| *micros >= i64::MIN as f64 && *micros <= i64::MAX as f64)
            .and_then(|micros| DateTime::from_timestamp_micros(micros as i64)),
    };

    resolved.ok_or_else(|| TypeCoercionError {
        logical_type: LogicalType::Time,
        found: match number {
            NumberLike::Int(i) => i.to_string(),
            NumberLike::Float(f) => f.to_string(),
            NumberLike::Text(s) => format!("{s:?}"),
        },
    })
}

fn text_of(raw: &RawScalar<'_>, logical_type: LogicalType) -> Result<String, TypeCoercionError> {
    match raw {
        RawScalar::Column { text, .. } => Ok((*text).to_string()),
        RawScalar::EmptyColumn => Ok(String::new()),
        RawScalar::Json(Value::String(s)) => Ok(s.clone()),
        // -- 🤷 a number where a string was expected: stringify it, sensors get creative
        RawScalar::Json(scalar @ (Value::Number(_) | Value::Bool(_))) => Ok(scalar.to_string()),
        RawScalar::Json(_) => Err(TypeCoercionError::new(logical_type, raw)),
    }
}

fn coerce_bool(raw: &RawScalar<'_>) -> Result<bool, TypeCoercionError> {
    let parsed = match raw {
        RawScalar::Json(Value::Bool(b)) => Some(*b),
        RawScalar::Column { text, .. } => parse_bool_text(text),
        RawScalar::Json(Value::String(s)) => parse_bool_text(s),
        RawScalar::Json(Value::Number(n)) => n.as_i64().map(|i| i != 0),
        _ => None,
    };
    parsed.ok_or_else(|| TypeCoercionError::new(LogicalType::Bool, raw))
}

fn parse_bool_text(text: &str) -> Option<bool> {
    // 🔤 the sensor writes T/F; humans write true/false; both are welcome
    match text.trim() {
        "T" | "t" | "true" | "True" | "TRUE" | "1" => Some(true),
        "F" | "f" | "false" | "False" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

fn coerce_set(raw: &RawScalar<'_>) -> Result<BTreeSet<String>, TypeCoercionError> {
    match raw {
        RawScalar::Column {
            text,
            set_separator,
        } => Ok(text
            .split(*set_separator)
            .filter(|element| !element.is_empty())
            .map(str::to_string)
            .collect()),
        RawScalar::EmptyColumn => Ok(BTreeSet::new()),
        RawScalar::Json(Value::Array(elements)) => Ok(elements
            .iter()
            .filter_map(|element| match element {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect()),
        // -- 🎁 a lone string is a set of one; that is the permissive reading
        RawScalar::Json(Value::String(s)) if s.is_empty() => Ok(BTreeSet::new()),
        RawScalar::Json(Value::String(s)) => Ok(BTreeSet::from([s.clone()])),
        RawScalar::Json(_) => Err(TypeCoercionError::new(LogicalType::StringSet, raw)),
    }
}
