// ai
//! 🧱 Values: the raw stuff that comes in, and the typed stuff that goes out.
//!
//! 🎬 COLD OPEN: INT. PACKET CAPTURE BOX, RACK 7, 4:12 AM
//!
//! The sensor wrote `1517336042.279652` in a tab-separated log. The JSON writer
//! wrote the same instant as a bare number. The document store kept it as a float.
//! Three spellings. One moment in time. Nobody agreed on anything, and yet the
//! moment happened exactly once. This module is where we make them shake hands.
//!
//! 🧠 Knowledge graph:
//! - [`RawScalar`]: one field, exactly as the envelope handed it over, not yet judged.
//! - [`NumberLike`]: the tagged union for "it is a number, probably, in some costume".
//! - [`FieldValue`]: the canonical, typed value a coercer produces.
//!
//! 🦆 The duck is typed. The duck has always been typed.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{Number, Value};

/// 📥 One raw field, borrowed straight out of an envelope.
///
/// Columnar sensor logs only ever speak text. JSON and stored documents speak
/// `serde_json::Value`. The coercers match on this instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawScalar<'a> {
    /// 📜 A sensor-log column. `set_separator` rides along so `set[string]` can split it.
    Column {
        text: &'a str,
        set_separator: &'a str,
    },
    /// 🕳️ The sensor's "(empty)" sentinel: present, but holding nothing.
    EmptyColumn,
    /// 📦 A JSON or document value. Never `Value::Null`; nulls are filtered upstream as absent.
    Json(&'a Value),
}

/// 🔢 A number wearing a costume.
///
/// JSON does not tell integers from floats, sensor logs hand over strings, and stored
/// documents might hold either. This union names all three so the time coercer can
/// match them explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum NumberLike {
    Int(i64),
    Float(f64),
    Text(String),
}

impl NumberLike {
    /// 🔍 Pull a `NumberLike` out of a raw scalar, if it is even remotely number-shaped.
    ///
    /// Returns `None` for things that cannot pretend to be numbers (arrays, objects, bools).
    pub fn from_raw(raw: &RawScalar<'_>) -> Option<Self> {
        match raw {
            RawScalar::Column { text, .. } => Some(NumberLike::Text((*text).to_string())),
            RawScalar::EmptyColumn => None,
            RawScalar::Json(value) => Self::from_json(value),
        }
    }

    /// 🔍 Same as [`NumberLike::from_raw`], for a bare JSON value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::from_number(n)),
            Value::String(s) => Some(NumberLike::Text(s.clone())),
            _ => None,
        }
    }

    fn from_number(n: &Number) -> Self {
        // -- integers stay integers; u64 past i64::MAX degrades to float rather than lying
        match n.as_i64() {
            Some(i) => NumberLike::Int(i),
            None => NumberLike::Float(n.as_f64().unwrap_or(f64::NAN)),
        }
    }

    /// 🎯 Best-effort float extraction.
    ///
    /// Text is trimmed and parsed; if that fails, the longest leading numeric run is
    /// tried ("1517336042.27 UTC" still yields a number). `None` means total failure.
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            NumberLike::Int(i) => Some(*i as f64),
            NumberLike::Float(f) if f.is_finite() => Some(*f),
            NumberLike::Float(_) => None,
            NumberLike::Text(s) => parse_leading_float(s),
        }
    }

    /// 🎯 Best-effort integer extraction. Floats truncate toward zero.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            NumberLike::Int(i) => Some(*i),
            NumberLike::Float(_) | NumberLike::Text(_) => {
                if let NumberLike::Text(s) = self {
                    if let Ok(i) = s.trim().parse::<i64>() {
                        return Some(i);
                    }
                }
                let f = self.to_f64()?;
                if f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f.trunc() as i64)
                } else {
                    None
                }
            }
        }
    }
}

fn parse_leading_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if let Ok(f) = trimmed.parse::<f64>() {
        return f.is_finite().then_some(f);
    }
    // 🐢 slow path: chop to the numeric prefix and try again
    let prefix_len = trimmed
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .count();
    trimmed[..prefix_len]
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
}

/// ✅ A canonical, coerced field value. One variant per logical type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Time(DateTime<Utc>),
    String(String),
    Addr(String),
    Port(u16),
    Enum(String),
    Interval(f64),
    Count(i64),
    Bool(bool),
    StringSet(BTreeSet<String>),
}

impl FieldValue {
    /// 📦 Render this value the way the document store keeps it.
    ///
    /// Time goes out as fractional epoch seconds at microsecond precision, sets as sorted
    /// arrays. A non-finite interval has no JSON spelling and becomes `null`.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Time(t) => Number::from_f64(micros_to_seconds(t.timestamp_micros()))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::String(s) | FieldValue::Addr(s) | FieldValue::Enum(s) => {
                Value::String(s.clone())
            }
            FieldValue::Port(p) => Value::from(*p),
            FieldValue::Interval(f) => Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Count(c) => Value::from(*c),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::StringSet(set) => {
                Value::Array(set.iter().cloned().map(Value::String).collect())
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Addr(s) | FieldValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<i64> {
        match self {
            FieldValue::Count(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            FieldValue::StringSet(s) => Some(s),
            _ => None,
        }
    }
}

// 🕰️ microseconds are the house precision; everything finer is rounded away on purpose
pub(crate) fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn the_one_where_json_numbers_keep_their_integer_identity() {
        assert_eq!(NumberLike::from_json(&json!(42)), Some(NumberLike::Int(42)));
        assert_eq!(NumberLike::from_json(&json!(1.5)), Some(NumberLike::Float(1.5)));
        assert_eq!(
            NumberLike::from_json(&json!("7")),
            Some(NumberLike::Text("7".into()))
        );
        assert_eq!(NumberLike::from_json(&json!([1])), None);
    }

    #[test]
    fn the_one_where_text_gets_the_benefit_of_the_doubt() {
        let sloppy = NumberLike::Text(" 1517336042.25 UTC".into());
        assert_eq!(sloppy.to_f64(), Some(1517336042.25));
        assert_eq!(sloppy.to_i64(), Some(1517336042));
        assert_eq!(NumberLike::Text("potato".into()).to_f64(), None);
        assert_eq!(NumberLike::Text("-3".into()).to_i64(), Some(-3));
    }

    #[test]
    fn the_one_where_non_finite_floats_are_not_numbers_after_all() {
        assert_eq!(NumberLike::Float(f64::NAN).to_f64(), None);
        assert_eq!(NumberLike::Float(f64::INFINITY).to_i64(), None);
    }

    #[test]
    fn the_one_where_sets_render_sorted_and_deduplicated() {
        let set: BTreeSet<String> = ["b", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(FieldValue::StringSet(set).to_json(), json!(["a", "b"]));
    }

    #[test]
    fn the_one_where_time_leaves_as_fractional_seconds() {
        let instant = DateTime::from_timestamp_micros(1_517_336_042_279_652).unwrap();
        assert_eq!(FieldValue::Time(instant).to_json(), json!(1517336042.279652));
    }
}
