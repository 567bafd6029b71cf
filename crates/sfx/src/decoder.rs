// ai
//! 🔬 The Record Decoder: raw record in, canonical record out.
//!
//! 🎬 COLD OPEN: INT. CUSTOMS HALL, ARRIVALS
//!
//! Every record gets the same treatment. Open the envelope. Walk the descriptor,
//! field by field, in order. Ask the envelope for the field's wire key in this
//! encoding. Nothing there? Zero value, no drama. Something there? Coerce it. The
//! coercion fails? Zero value, a warning in the log, keep walking. After the last
//! field, the record kind's post-load hook gets exactly one shot at the result.
//!
//! The only way to fail the whole record is to not be a record in the first place.
//!
//! 🧠 Knowledge graph:
//! - Input: [`RawRecord`] (which knows its own [`Encoding`]) + a [`RecordTypeDescriptor`].
//! - Output: [`Decoded`] = the [`CanonicalRecord`] plus any soft [`FieldWarning`]s.
//! - Pure. No I/O, no shared state, safe to call from any number of workers at once.

use thiserror::Error;
use tracing::{trace, warn};

use crate::coerce::{TypeCoercionError, coerce};
use crate::envelope::{Envelope, RawRecord};
use crate::record::CanonicalRecord;
use crate::schema::{Encoding, RecordKind, RecordTypeDescriptor};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// 💀 Not shaped like a record at all. The record is dropped; the batch goes on.
    #[error("💀 malformed {encoding} envelope: {reason}")]
    MalformedEnvelope { encoding: Encoding, reason: String },
    #[error("💀 record kind '{kind}' does not register encoding '{encoding}'")]
    UnsupportedEncoding { encoding: Encoding, kind: RecordKind },
}

/// ⚠️ One field that could not be coerced and fell back to its zero value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWarning {
    pub storage_key: &'static str,
    pub error: TypeCoercionError,
}

/// ✅ A decoded record and the soft warnings collected along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub record: CanonicalRecord,
    pub warnings: Vec<FieldWarning>,
}

/// 🔬 Decode one raw record against one descriptor.
pub fn decode(raw: RawRecord<'_>, descriptor: &RecordTypeDescriptor) -> Result<Decoded, DecodeError> {
    let encoding = raw.encoding();
    if !descriptor.supports(encoding) {
        return Err(DecodeError::UnsupportedEncoding {
            encoding,
            kind: descriptor.kind,
        });
    }

    let envelope = Envelope::open(raw)?;
    let mut record = CanonicalRecord::with_capacity(descriptor.kind, descriptor.fields.len());
    let mut warnings = Vec::new();

    for field in descriptor.fields {
        let raw_value = field
            .wire_key(encoding)
            .and_then(|wire_key| envelope.get(wire_key));
        let value = match raw_value {
            None => field.logical_type.zero_value(),
            Some(raw_value) => match coerce(raw_value, field.logical_type) {
                Ok(value) => value,
                Err(error) => {
                    warn!(
                        "⚠️ {}.{}: {error}; falling back to the zero value",
                        descriptor.kind, field.storage_key
                    );
                    warnings.push(FieldWarning {
                        storage_key: field.storage_key,
                        error,
                    });
                    field.logical_type.zero_value()
                }
            },
        };
        record.put(field.storage_key, value);
    }

    // 🪝 exactly once, after every generic field landed
    if let Some(hook) = descriptor.post_load {
        if let Err(error) = hook(&mut record, &envelope) {
            warn!("⚠️ {} post-load hook: {error}", descriptor.kind);
            let storage_key = descriptor
                .fields
                .iter()
                .find(|field| field.has_custom_hook)
                .map(|field| field.storage_key)
                .unwrap_or("");
            warnings.push(FieldWarning { storage_key, error });
        }
    }

    trace!(
        "🔬 decoded {} record from {encoding} with {} warnings",
        descriptor.kind,
        warnings.len()
    );
    Ok(Decoded { record, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tests::conn_header;
    use crate::schema::{conn::CONN, dns::DNS};
    use crate::value::FieldValue;
    use chrono::DateTime;
    use serde_json::{Value, json};

    const CONN_LINE: &str = "1517336042.279652\tCHhAvVGS1DHFjwGM9\t10.0.0.5\t51234\t10.0.0.9\t443\ttcp\t-\t1.5\t10\t20\tSF\tT\tF\t0\tShADadFf\t5\t310\t4\t220\t(empty)";

    fn conn_json() -> Value {
        json!({
            "ts": 1517336042.279652,
            "uid": "CHhAvVGS1DHFjwGM9",
            "id.orig_h": "10.0.0.5",
            "id.orig_p": 51234,
            "id.resp_h": "10.0.0.9",
            "id.resp_p": 443,
            "proto": "tcp",
            "duration": "1.5",
            "orig_bytes": 10,
            "resp_bytes": 20,
            "conn_state": "SF",
            "local_orig": true,
            "local_resp": false,
            "missed_bytes": 0,
            "history": "ShADadFf",
            "orig_pkts": 5,
            "orig_ip_bytes": 310,
            "resp_pkts": 4,
            "resp_ip_bytes": 220
        })
    }

    fn assert_hand_computed(record: &CanonicalRecord) {
        let ts = DateTime::from_timestamp_micros(1_517_336_042_279_652);
        assert_eq!(record.get("ts").and_then(FieldValue::as_time), ts);
        assert_eq!(record.text("uid"), "CHhAvVGS1DHFjwGM9");
        assert_eq!(record.get("id_orig_h"), Some(&FieldValue::Addr("10.0.0.5".into())));
        assert_eq!(record.get("id_orig_p"), Some(&FieldValue::Port(51234)));
        assert_eq!(record.get("id_resp_h"), Some(&FieldValue::Addr("10.0.0.9".into())));
        assert_eq!(record.get("id_resp_p"), Some(&FieldValue::Port(443)));
        assert_eq!(record.get("proto"), Some(&FieldValue::Enum("tcp".into())));
        assert_eq!(record.get("service"), Some(&FieldValue::String(String::new())));
        assert_eq!(record.get("duration"), Some(&FieldValue::Interval(1.5)));
        assert_eq!(record.count("orig_bytes"), 10);
        assert_eq!(record.count("resp_bytes"), 20);
        assert_eq!(record.get("local_orig"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.get("local_resp"), Some(&FieldValue::Bool(false)));
        assert_eq!(record.count("orig_ip_bytes"), 310);
        assert_eq!(record.count("resp_ip_bytes"), 220);
        assert_eq!(
            record.get("tunnel_parents").and_then(FieldValue::as_set).map(|s| s.len()),
            Some(0)
        );
    }

    #[test]
    fn the_one_where_a_sensor_line_decodes_to_hand_computed_values() -> anyhow::Result<()> {
        let header = conn_header();
        let decoded = decode(
            RawRecord::SensorLog {
                header: &header,
                line: CONN_LINE,
            },
            &CONN,
        )?;
        assert!(decoded.warnings.is_empty());
        assert_eq!(decoded.record.fields().count(), CONN.fields.len());
        assert_hand_computed(&decoded.record);
        Ok(())
    }

    #[test]
    fn the_one_where_the_json_line_agrees_with_the_sensor_line() -> anyhow::Result<()> {
        let line = conn_json().to_string();
        let decoded = decode(RawRecord::Json(&line), &CONN)?;
        assert!(decoded.warnings.is_empty());
        assert_hand_computed(&decoded.record);

        let header = conn_header();
        let from_sensor = decode(
            RawRecord::SensorLog {
                header: &header,
                line: CONN_LINE,
            },
            &CONN,
        )?;
        assert_eq!(decoded.record, from_sensor.record);
        Ok(())
    }

    #[test]
    fn the_one_where_a_stored_document_comes_back_as_the_same_record() -> anyhow::Result<()> {
        let line = conn_json().to_string();
        let original = decode(RawRecord::Json(&line), &CONN)?.record;
        let document = Value::Object(original.to_document());
        let reloaded = decode(RawRecord::Document(&document), &CONN)?;
        assert!(reloaded.warnings.is_empty());
        assert_eq!(reloaded.record, original);
        Ok(())
    }

    #[test]
    fn the_one_where_missing_fields_become_zero_values_quietly() -> anyhow::Result<()> {
        let line = json!({ "id.orig_h": "10.0.0.5", "id.resp_h": "10.0.0.9", "duration": "1.5" }).to_string();
        let decoded = decode(RawRecord::Json(&line), &CONN)?;
        assert!(decoded.warnings.is_empty());
        let record = decoded.record;
        assert_eq!(record.text("service"), "");
        assert_eq!(record.get("duration"), Some(&FieldValue::Interval(1.5)));
        assert_eq!(record.text("id_orig_h"), "10.0.0.5");
        assert_eq!(record.text("id_resp_h"), "10.0.0.9");
        assert_eq!(record.count("orig_bytes"), 0);
        assert_eq!(record.get("id_orig_p"), Some(&FieldValue::Port(0)));
        assert_eq!(
            record.get("ts").and_then(FieldValue::as_time),
            Some(DateTime::UNIX_EPOCH)
        );
        Ok(())
    }

    #[test]
    fn the_one_where_every_spelling_of_a_second_is_the_same_second() -> anyhow::Result<()> {
        let header = conn_header();
        let tail = "\tC1\t10.0.0.5\t1\t10.0.0.9\t2\ttcp\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-\t-";
        let sensor_line = format!("1517336042{tail}");
        let from_sensor = decode(
            RawRecord::SensorLog {
                header: &header,
                line: &sensor_line,
            },
            &CONN,
        )?;
        let int_line = json!({ "ts": 1517336042 }).to_string();
        let float_line = json!({ "ts": 1517336042.0 }).to_string();
        let text_line = json!({ "ts": "1517336042" }).to_string();

        let expected = DateTime::from_timestamp(1_517_336_042, 0);
        for line in [&int_line, &float_line, &text_line] {
            let decoded = decode(RawRecord::Json(line), &CONN)?;
            assert_eq!(decoded.record.get("ts").and_then(FieldValue::as_time), expected, "{line}");
        }
        assert_eq!(from_sensor.record.get("ts").and_then(FieldValue::as_time), expected);
        Ok(())
    }

    #[test]
    fn the_one_where_a_bad_port_is_a_warning_not_a_tragedy() -> anyhow::Result<()> {
        let line = json!({ "uid": "C9", "id.orig_p": 70000, "ts": "yesterday-ish" }).to_string();
        let decoded = decode(RawRecord::Json(&line), &CONN)?;
        let keys: Vec<&str> = decoded.warnings.iter().map(|w| w.storage_key).collect();
        assert_eq!(keys, vec!["id_orig_p", "ts"]);
        assert_eq!(decoded.record.get("id_orig_p"), Some(&FieldValue::Port(0)));
        assert_eq!(decoded.record.text("uid"), "C9");
        Ok(())
    }

    #[test]
    fn the_one_where_garbage_is_not_a_record() {
        let err = decode(RawRecord::Json("[1, 2, 3]"), &CONN).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedEnvelope { encoding: Encoding::Json, .. }));
        let err = decode(RawRecord::Json("{\"uid\": "), &DNS).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn the_one_where_an_unregistered_encoding_is_refused() {
        static SENSOR_ONLY: RecordTypeDescriptor = RecordTypeDescriptor {
            kind: RecordKind::Dns,
            fields: &[],
            encodings: &[Encoding::SensorLog],
            indexes: &[],
            post_load: None,
        };
        let err = decode(RawRecord::Json("{}"), &SENSOR_ONLY).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedEncoding {
                encoding: Encoding::Json,
                kind: RecordKind::Dns
            }
        );
    }

    #[test]
    fn the_one_where_dns_answers_become_a_set() -> anyhow::Result<()> {
        let line = json!({
            "ts": 1517336040.5,
            "uid": "CdnsQ1",
            "id.orig_h": "10.0.0.5",
            "query": "example.org",
            "answers": ["1.2.3.5", "1.2.3.4", "1.2.3.4"],
            "AA": false,
            "RD": true
        })
        .to_string();
        let record = decode(RawRecord::Json(&line), &DNS)?.record;
        let answers: Vec<&str> = record
            .get("answers")
            .and_then(FieldValue::as_set)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default();
        assert_eq!(answers, vec!["1.2.3.4", "1.2.3.5"]);
        assert_eq!(record.get("RD"), Some(&FieldValue::Bool(true)));
        assert_eq!(record.text("query"), "example.org");
        Ok(())
    }
}
