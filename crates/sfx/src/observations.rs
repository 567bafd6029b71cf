// ai
//! 🔭 Observations: turning decoded records into hostname sightings.
//!
//! DNS records say "this client asked for this name, and got these addresses".
//! Conn records say "this host talked to that address". Put the two together and
//! a connection to 1.2.3.4 becomes a connection to `example.org`.
//!
//! The [`ResolutionTable`] remembers which names resolved to which addresses for the
//! whole run, so conn logs can be read after the DNS logs they depend on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::trace;

use crate::aggregate::ObservationInput;
use crate::record::CanonicalRecord;
use crate::schema::RecordKind;
use crate::value::FieldValue;

/// 📒 Address → every hostname seen resolving to it during this run.
#[derive(Debug, Default, Clone)]
pub struct ResolutionTable {
    resolved: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl ResolutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn learn<'a>(&self, host: &str, ips: impl IntoIterator<Item = &'a String>) {
        let mut resolved = self.resolved.write().await;
        for ip in ips {
            resolved.entry(ip.clone()).or_default().insert(host.to_string());
        }
    }

    pub async fn hosts_for(&self, ip: &str) -> BTreeSet<String> {
        self.resolved.read().await.get(ip).cloned().unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.resolved.read().await.len()
    }
}

/// 📖 What a single DNS record says about its query name, if it names anything.
pub fn observe_dns(record: &CanonicalRecord) -> Option<(String, ObservationInput)> {
    let host = record.text("query").trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return None;
    }
    // -- answers mix addresses with CNAMEs and TXT blobs; only addresses resolve
    let resolved: Vec<String> = record
        .get("answers")
        .and_then(FieldValue::as_set)
        .map(|answers| {
            answers
                .iter()
                .filter(|answer| answer.parse::<IpAddr>().is_ok())
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let client = record.text("id_orig_h");

    let mut input = ObservationInput::default().with_resolved_ips(resolved);
    if !client.is_empty() {
        input = input.with_client_ips([client]);
    }
    Some((host, input))
}

/// 🎫 A stable id for one connection's contribution, so a replayed record is recognized.
pub fn conn_observation_id(record: &CanonicalRecord) -> String {
    let uid = record.text("uid");
    if !uid.is_empty() {
        return format!("conn:{uid}");
    }
    let micros = record
        .get("ts")
        .and_then(FieldValue::as_time)
        .map(|ts| ts.timestamp_micros())
        .unwrap_or_default();
    let port = |key: &str| match record.get(key) {
        Some(FieldValue::Port(port)) => *port,
        _ => 0,
    };
    format!(
        "conn:{micros}:{}:{}:{}:{}",
        record.text("id_orig_h"),
        port("id_orig_p"),
        record.text("id_resp_h"),
        port("id_resp_p")
    )
}

/// 🔭 Derive per-hostname observations from a batch of records.
///
/// DNS records teach the table before conn records in the same batch consult it.
pub async fn derive(records: &[CanonicalRecord], table: &ResolutionTable) -> BTreeMap<String, ObservationInput> {
    let mut observations: BTreeMap<String, ObservationInput> = BTreeMap::new();

    for record in records.iter().filter(|r| r.kind() == RecordKind::Dns) {
        if let Some((host, input)) = observe_dns(record) {
            table.learn(&host, &input.resolved_ips).await;
            observations.entry(host).or_default().absorb(input);
        }
    }

    for record in records.iter().filter(|r| r.kind() == RecordKind::Conn) {
        let responder = record.text("id_resp_h");
        if responder.is_empty() {
            continue;
        }
        let hosts = table.hosts_for(responder).await;
        if hosts.is_empty() {
            continue;
        }
        let id = conn_observation_id(record);
        let bytes = record
            .count("orig_ip_bytes")
            .saturating_add(record.count("resp_ip_bytes"));
        let originator = record.text("id_orig_h");
        for host in hosts {
            let input = ObservationInput::default().with_connection(id.clone(), originator, bytes);
            observations.entry(host).or_default().absorb(input);
        }
    }

    trace!("🔭 derived observations for {} hostnames", observations.len());
    observations
}
