// ai
//! ✉️ Envelopes: the raw record, opened, but not yet read.
//!
//! 🎬 COLD OPEN: INT. MAILROOM, THREE CONVEYOR BELTS
//!
//! Belt one carries tab-separated lines that only make sense next to a `#fields`
//! header written hours ago. Belt two carries JSON objects with dotted keys. Belt three
//! carries documents that already went to the store once and came back. The mailroom
//! clerk does not read the letters. The clerk only checks that each one IS a letter,
//! and hands out a uniform way to ask "what is under this key?"
//!
//! 🧠 Knowledge graph:
//! - [`SensorLogHeader`]: the `#separator`, `#set_separator`, `#empty_field`,
//!   `#unset_field`, `#path`, `#fields`, `#types` directives of a columnar log.
//! - [`RawRecord`]: one raw record in one of the three [`Encoding`]s.
//! - [`Envelope`]: a parsed record that answers `get(wire_key)` with a [`RawScalar`].
//! - Not a record at all? That is a [`DecodeError::MalformedEnvelope`]. Reported. Never swallowed.

use std::borrow::Cow;
use std::collections::HashMap;

use memchr::memmem;
use serde_json::{Map, Value};

use crate::decoder::DecodeError;
use crate::schema::Encoding;
use crate::value::RawScalar;

const DEFAULT_SEPARATOR: &str = "\t";
const DEFAULT_SET_SEPARATOR: &str = ",";
const DEFAULT_EMPTY_FIELD: &str = "(empty)";
const DEFAULT_UNSET_FIELD: &str = "-";

/// 📜 The directive block at the top of a columnar sensor log.
///
/// Starts with the sensor's defaults; each `#directive` line overrides one knob.
/// Column positions come from `#fields`; until that line shows up, nothing decodes.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLogHeader {
    separator: String,
    set_separator: String,
    empty_field: String,
    unset_field: String,
    path: Option<String>,
    fields: Vec<String>,
    types: Vec<String>,
    positions: HashMap<String, usize>,
}

impl Default for SensorLogHeader {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            set_separator: DEFAULT_SET_SEPARATOR.to_string(),
            empty_field: DEFAULT_EMPTY_FIELD.to_string(),
            unset_field: DEFAULT_UNSET_FIELD.to_string(),
            path: None,
            fields: Vec::new(),
            types: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl SensorLogHeader {
    /// 🏗️ Build a header from a block of lines; non-directive lines are ignored.
    pub fn parse<'l>(lines: impl IntoIterator<Item = &'l str>) -> Self {
        let mut header = Self::default();
        for line in lines {
            header.apply_directive(line);
        }
        header
    }

    /// 🔧 Apply one `#directive` line. Returns `false` for anything that is not a directive.
    ///
    /// `#separator` is special: it is always space-delimited and spells its value with
    /// `\xNN` escapes. Every other directive is split on the current separator.
    pub fn apply_directive(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(directive) = line.strip_prefix('#') else {
            return false;
        };

        if let Some(value) = directive.strip_prefix("separator ") {
            self.separator = unescape_hex(value.trim());
            return true;
        }

        let (name, rest) = match directive.split_once(self.separator.as_str()) {
            Some((name, rest)) => (name, rest),
            None => (directive, ""),
        };
        match name {
            "set_separator" => self.set_separator = rest.to_string(),
            "empty_field" => self.empty_field = rest.to_string(),
            "unset_field" => self.unset_field = rest.to_string(),
            "path" => self.path = Some(rest.to_string()),
            "fields" => {
                self.fields = rest.split(self.separator.as_str()).map(str::to_string).collect();
                self.positions = self
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(position, field)| (field.clone(), position))
                    .collect();
            }
            "types" => {
                self.types = rest.split(self.separator.as_str()).map(str::to_string).collect();
            }
            // -- 🕰️ #open, #close, and whatever the sensor invents next: noted, ignored
            _ => {}
        }
        true
    }

    /// ✅ Whether a `#fields` line has been seen, i.e. whether data lines can be decoded.
    pub fn is_ready(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    fn split_line<'l>(&self, line: &'l str) -> Vec<&'l str> {
        let mut columns = Vec::with_capacity(self.fields.len());
        let separator = self.separator.as_bytes();
        let mut start = 0;
        // 🔍 memchr does the scanning; single-byte separators (the tab) take the fastest path
        if let [single] = separator {
            for hit in memchr::memchr_iter(*single, line.as_bytes()) {
                columns.push(&line[start..hit]);
                start = hit + 1;
            }
        } else if !separator.is_empty() {
            for hit in memmem::find_iter(line.as_bytes(), separator) {
                columns.push(&line[start..hit]);
                start = hit + separator.len();
            }
        }
        columns.push(&line[start..]);
        columns
    }
}

// 🔤 `\x09` -> tab. Anything that is not a well-formed escape is kept literally.
fn unescape_hex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(position) = rest.find("\\x") {
        out.push_str(&rest[..position]);
        let after = &rest[position + 2..];
        match after.get(..2).and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = &after[2..];
            }
            None => {
                out.push_str("\\x");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// 📥 One raw record, in exactly one encoding.
#[derive(Debug, Clone, Copy)]
pub enum RawRecord<'a> {
    /// 📜 A columnar data line plus the header that gives its columns names.
    SensorLog {
        header: &'a SensorLogHeader,
        line: &'a str,
    },
    /// 📡 One line of line-delimited JSON.
    Json(&'a str),
    /// 📄 A document as the store returned it.
    Document(&'a Value),
}

impl RawRecord<'_> {
    pub fn encoding(&self) -> Encoding {
        match self {
            RawRecord::SensorLog { .. } => Encoding::SensorLog,
            RawRecord::Json(_) => Encoding::Json,
            RawRecord::Document(_) => Encoding::Document,
        }
    }
}

/// ✉️ An opened record: a uniform `wire key -> raw scalar` view over any encoding.
#[derive(Debug, Clone)]
pub struct Envelope<'a> {
    encoding: Encoding,
    body: Body<'a>,
}

#[derive(Debug, Clone)]
enum Body<'a> {
    Columns {
        header: &'a SensorLogHeader,
        values: Vec<&'a str>,
    },
    Object(Cow<'a, Map<String, Value>>),
}

impl<'a> Envelope<'a> {
    /// ✂️ Open a raw record. Fails only when the input is not shaped like a record at all.
    pub fn open(raw: RawRecord<'a>) -> Result<Self, DecodeError> {
        let encoding = raw.encoding();
        let malformed = |reason: String| DecodeError::MalformedEnvelope { encoding, reason };

        let body = match raw {
            RawRecord::SensorLog { header, line } => {
                if !header.is_ready() {
                    return Err(malformed("no #fields header precedes this line".into()));
                }
                let line = line.trim_end_matches(['\r', '\n']);
                if line.starts_with('#') {
                    return Err(malformed("a header directive is not a data record".into()));
                }
                let values = header.split_line(line);
                if values.len() != header.fields.len() {
                    return Err(malformed(format!(
                        "expected {} columns, found {} (truncated line?)",
                        header.fields.len(),
                        values.len()
                    )));
                }
                Body::Columns { header, values }
            }
            RawRecord::Json(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Body::Object(Cow::Owned(map)),
                Ok(other) => {
                    return Err(malformed(format!("expected a JSON object, found {}", kind_of(&other))));
                }
                Err(parse_error) => return Err(malformed(parse_error.to_string())),
            },
            RawRecord::Document(value) => match value {
                Value::Object(map) => Body::Object(Cow::Borrowed(map)),
                other => {
                    return Err(malformed(format!("expected a document object, found {}", kind_of(other))));
                }
            },
        };

        Ok(Self { encoding, body })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// 🔍 Look up one wire key. `None` means absent: missing, unset sentinel, or JSON null.
    pub fn get(&self, wire_key: &str) -> Option<RawScalar<'_>> {
        match &self.body {
            Body::Columns { header, values } => {
                let text = *values.get(*header.positions.get(wire_key)?)?;
                if text == header.unset_field {
                    None
                } else if text == header.empty_field {
                    Some(RawScalar::EmptyColumn)
                } else {
                    Some(RawScalar::Column {
                        text,
                        set_separator: &header.set_separator,
                    })
                }
            }
            Body::Object(map) => match map.get(wire_key)? {
                Value::Null => None,
                value => Some(RawScalar::Json(value)),
            },
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
