//! 🎬 *[a channel fills with pages. somewhere, a decoder waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🔬 The DecodeWorker: takes a page off the channel, decodes every line against its
//! descriptor, drops the ones that are not records, stores the ones that are, and
//! folds what they say about hostnames into the summaries.
//!
//! It does not judge. It counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_channel::Receiver;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{RunReport, Worker};
use crate::aggregate::{HostnameRepository, ObservationInput, UpsertReport};
use crate::decoder::{DecodeError, Decoded, decode};
use crate::envelope::RawRecord;
use crate::observations::{ResolutionTable, derive};
use crate::record::CanonicalRecord;
use crate::registry::Registry;
use crate::router::{StorageConfig, target_partition};
use crate::schema::{Encoding, RecordTypeDescriptor};
use crate::source::RawPage;
use crate::store::DocumentStore;

/// 🧰 Everything the decode crew shares for a whole run.
#[derive(Debug)]
pub(super) struct DecodeContext {
    pub(super) registry: &'static Registry,
    pub(super) store: Arc<dyn DocumentStore>,
    pub(super) storage: StorageConfig,
    pub(super) table: ResolutionTable,
    pub(super) repository: HostnameRepository,
}

#[derive(Debug)]
pub(super) struct DecodeWorker {
    rx: Receiver<RawPage>,
    context: Arc<DecodeContext>,
}

impl DecodeWorker {
    pub(super) fn new(rx: Receiver<RawPage>, context: Arc<DecodeContext>) -> Self {
        Self { rx, context }
    }
}

impl Worker for DecodeWorker {
    type Output = RunReport;

    fn start(self) -> JoinHandle<Result<RunReport>> {
        tokio::spawn(async move {
            debug!("📥 DecodeWorker started draining channel...");
            let mut tally = RunReport::default();
            while let Ok(page) = self.rx.recv().await {
                trace!("🪣 DecodeWorker received a page of {} lines", page.lines.len());
                tally.absorb(self.context.process(page).await?);
            }
            debug!("🏁 DecodeWorker: Channel closed. Shutting down.");
            Ok(tally)
        })
    }
}

impl DecodeContext {
    async fn process(&self, page: RawPage) -> Result<RunReport> {
        let descriptor = self.registry.descriptor(page.kind)?;
        let partition = target_partition(page.kind, &self.storage);
        let mut report = RunReport {
            dropped: page.unreadable,
            ..RunReport::default()
        };

        let mut records: Vec<CanonicalRecord> = Vec::with_capacity(page.lines.len());
        for line in &page.lines {
            match decode_line(&page, line, descriptor) {
                Ok(decoded) => {
                    report.decoded += 1;
                    report.coercion_warnings += decoded.warnings.len() as u64;
                    records.push(decoded.record);
                }
                Err(err) => {
                    warn!("{err} (in '{}')", page.origin);
                    report.dropped += 1;
                }
            }
        }

        let mut unreachable = 0usize;
        for record in records.iter_mut() {
            match self.store.insert(partition, record.to_document()).await {
                Ok(id) => {
                    record.assign_id(id);
                    report.inserted += 1;
                }
                Err(err) if err.is_connectivity() => {
                    unreachable += 1;
                    trace!("📡 insert into '{partition}' failed: {err}");
                }
                Err(err) => {
                    warn!("🚫 '{partition}' refused a {} record: {err}", page.kind);
                    report.insert_failures += 1;
                }
            }
        }
        if unreachable > 0 {
            bail!(
                "💀 The store was unreachable for {unreachable} of {} records bound for '{partition}'",
                records.len()
            );
        }

        let observations = derive(&records, &self.table).await;
        if !observations.is_empty() {
            let upsert = self.upsert(observations).await?;
            report.absorb_upsert(&upsert);
        }
        Ok(report)
    }

    async fn upsert(&self, observations: BTreeMap<String, ObservationInput>) -> Result<UpsertReport> {
        self.repository
            .upsert(observations)
            .await
            .with_context(|| format!("💀 Folding observations into '{}' stopped short", self.repository.partition()))
    }
}

// 📄 one line, in whatever encoding its page carries
fn decode_line(page: &RawPage, line: &str, descriptor: &RecordTypeDescriptor) -> Result<Decoded, DecodeError> {
    match page.encoding {
        Encoding::SensorLog => match page.header.as_deref() {
            Some(header) => decode(RawRecord::SensorLog { header, line }, descriptor),
            None => Err(DecodeError::MalformedEnvelope {
                encoding: Encoding::SensorLog,
                reason: "the page arrived without a header".into(),
            }),
        },
        Encoding::Json => decode(RawRecord::Json(line), descriptor),
        Encoding::Document => match serde_json::from_str::<Value>(line) {
            Ok(document) => decode(RawRecord::Document(&document), descriptor),
            Err(parse_error) => Err(DecodeError::MalformedEnvelope {
                encoding: Encoding::Document,
                reason: parse_error.to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tests::conn_header;
    use crate::registry;
    use crate::schema::RecordKind;
    use crate::store::InMemoryStore;

    fn page(encoding: Encoding, kind: RecordKind, lines: &[&str]) -> RawPage {
        RawPage {
            origin: Arc::from("test"),
            kind,
            encoding,
            header: (encoding == Encoding::SensorLog).then(|| Arc::new(conn_header())),
            lines: lines.iter().map(|line| line.to_string()).collect(),
            unreadable: 0,
            bytes_read: 0,
        }
    }

    fn context(store: &InMemoryStore) -> anyhow::Result<DecodeContext> {
        let store: Arc<dyn DocumentStore> = Arc::new(store.clone());
        Ok(DecodeContext {
            registry: registry::init()?,
            repository: HostnameRepository::new(Arc::clone(&store), "hostnames"),
            store,
            storage: StorageConfig::default(),
            table: ResolutionTable::new(),
        })
    }

    #[tokio::test]
    async fn the_one_where_every_encoding_lands_in_the_same_partition() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let context = context(&store)?;
        let document = r#"{"uid": "C3", "id_orig_h": "10.0.0.5", "duration": 2.0}"#;

        let mut report = context.process(page(Encoding::Json, RecordKind::Conn, &[r#"{"uid": "C1"}"#])).await?;
        report.absorb(context.process(page(Encoding::Document, RecordKind::Conn, &[document, "not json"])).await?);

        assert_eq!(report.decoded, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.inserted, 2);
        let stored = store.documents("conn").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].1["id_orig_h"], "10.0.0.5");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_soft_warnings_are_counted_not_fatal() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let context = context(&store)?;
        let report = context
            .process(page(Encoding::Json, RecordKind::Conn, &[r#"{"uid": "C1", "id.orig_p": "eighty"}"#]))
            .await?;
        assert_eq!((report.decoded, report.coercion_warnings, report.inserted), (1, 1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_garbled_lines_count_as_dropped() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let context = context(&store)?;
        let mut garbled = page(Encoding::Json, RecordKind::Conn, &[r#"{"uid": "C3"}"#]);
        garbled.unreadable = 1;
        let report = context.process(garbled).await?;
        assert_eq!((report.decoded, report.dropped, report.inserted), (1, 1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_sensor_page_without_a_header_drops_its_lines() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let context = context(&store)?;
        let mut headless = page(Encoding::SensorLog, RecordKind::Conn, &["1.0\tC1"]);
        headless.header = None;
        let report = context.process(headless).await?;
        assert_eq!((report.decoded, report.dropped), (0, 1));
        Ok(())
    }
}
