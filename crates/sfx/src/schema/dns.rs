// ai
//! 📖 The DNS log: who asked what, and what the resolver said back.
//!
//! This is where hostnames meet addresses. The `query` and `answers` columns are
//! what the aggregation layer folds into per-hostname summaries.

use crate::coerce::LogicalType::{self, Addr, Bool, Count, Enum, Interval, Port, StringSet, Time};
use crate::schema::{Encoding, FieldDescriptor, RecordKind, RecordTypeDescriptor};

static FIELDS: &[FieldDescriptor] = &[
    FieldDescriptor::plain("ts", Time).without_json().with_custom_hook(),
    FieldDescriptor::plain("uid", LogicalType::String),
    FieldDescriptor::mirrored("id_orig_h", "id.orig_h", Addr),
    FieldDescriptor::mirrored("id_orig_p", "id.orig_p", Port),
    FieldDescriptor::mirrored("id_resp_h", "id.resp_h", Addr),
    FieldDescriptor::mirrored("id_resp_p", "id.resp_p", Port),
    FieldDescriptor::plain("proto", Enum),
    FieldDescriptor::plain("trans_id", Count),
    FieldDescriptor::plain("rtt", Interval),
    FieldDescriptor::plain("query", LogicalType::String),
    FieldDescriptor::plain("qclass", Count),
    FieldDescriptor::plain("qclass_name", LogicalType::String),
    FieldDescriptor::plain("qtype", Count),
    FieldDescriptor::plain("qtype_name", LogicalType::String),
    FieldDescriptor::plain("rcode", Count),
    FieldDescriptor::plain("rcode_name", LogicalType::String),
    FieldDescriptor::plain("AA", Bool),
    FieldDescriptor::plain("TC", Bool),
    FieldDescriptor::plain("RD", Bool),
    FieldDescriptor::plain("RA", Bool),
    FieldDescriptor::plain("Z", Count),
    // -- the sensor calls it vector[string]; order is irrelevant to everyone downstream
    FieldDescriptor::plain("answers", StringSet),
    FieldDescriptor::plain("rejected", Bool),
];

/// 📖 Descriptor for `dns` records.
pub static DNS: RecordTypeDescriptor = RecordTypeDescriptor {
    kind: RecordKind::Dns,
    fields: FIELDS,
    encodings: &[Encoding::SensorLog, Encoding::Json, Encoding::Document],
    indexes: &["$hashed:id_orig_h", "$hashed:id_resp_h", "$hashed:query", "ts"],
    post_load: Some(crate::schema::resolve_generic_timestamp),
};
