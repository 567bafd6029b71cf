// ai
//! 🔌 The connection log: one line per flow the sensor watched start and finish.

use crate::coerce::LogicalType::{self, Addr, Bool, Count, Enum, Interval, Port, StringSet, Time};
use crate::schema::{Encoding, FieldDescriptor, RecordKind, RecordTypeDescriptor};

static FIELDS: &[FieldDescriptor] = &[
    // -- JSON spells ts as a bare number of unknown flavor, the hook sorts it out
    FieldDescriptor::plain("ts", Time).without_json().with_custom_hook(),
    FieldDescriptor::plain("uid", LogicalType::String),
    FieldDescriptor::mirrored("id_orig_h", "id.orig_h", Addr),
    FieldDescriptor::mirrored("id_orig_p", "id.orig_p", Port),
    FieldDescriptor::mirrored("id_resp_h", "id.resp_h", Addr),
    FieldDescriptor::mirrored("id_resp_p", "id.resp_p", Port),
    FieldDescriptor::plain("proto", Enum),
    FieldDescriptor::plain("service", LogicalType::String),
    FieldDescriptor::plain("duration", Interval),
    FieldDescriptor::plain("orig_bytes", Count),
    FieldDescriptor::plain("resp_bytes", Count),
    FieldDescriptor::plain("conn_state", LogicalType::String),
    FieldDescriptor::plain("local_orig", Bool),
    FieldDescriptor::plain("local_resp", Bool),
    FieldDescriptor::plain("missed_bytes", Count),
    FieldDescriptor::plain("history", LogicalType::String),
    FieldDescriptor::plain("orig_pkts", Count),
    FieldDescriptor::plain("orig_ip_bytes", Count),
    FieldDescriptor::plain("resp_pkts", Count),
    FieldDescriptor::plain("resp_ip_bytes", Count),
    FieldDescriptor::plain("tunnel_parents", StringSet),
];

/// 🔌 Descriptor for `conn` records.
pub static CONN: RecordTypeDescriptor = RecordTypeDescriptor {
    kind: RecordKind::Conn,
    fields: FIELDS,
    encodings: &[Encoding::SensorLog, Encoding::Json, Encoding::Document],
    indexes: &["$hashed:id_orig_h", "$hashed:id_resp_h", "-duration", "ts", "uid"],
    post_load: Some(crate::schema::resolve_generic_timestamp),
};
