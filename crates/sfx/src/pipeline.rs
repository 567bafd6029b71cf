//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[a sensor has been writing logs since 2018. nobody has read them.]*
//! 🎬 "In a world where conn logs pile up unread..."
//! 🎬 "One pipeline dared to fold them into hostnames."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The pipeline: one source worker per input, a bounded channel, and a crew of
//! decode workers on the far side of it.
//!
//! 🧠 Knowledge graph:
//! - Startup: the registry is initialized, every partition gets its indexes ensured,
//!   and the hostname repository gets its unique key index. Index failures are
//!   counted, never fatal.
//! - Inputs run one after another, in config order. All of them share one
//!   [`ResolutionTable`], so a DNS log read first lets a later conn log find its hostnames.
//! - Per input: [`SourceWorker`] → `async_channel::bounded(queue_capacity)` →
//!   `decode_parallelism` × [`DecodeWorker`].
//! - Per record failures (malformed envelopes, soft coercion warnings, rejected inserts,
//!   failed keys) are counted in the [`RunReport`]. An unreachable store is structural and
//!   stops the run.

mod decode_worker;
mod source_worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregate::{HostnameRepository, UpsertReport};
use crate::app_config::{AppConfig, SourceConfig};
use crate::observations::ResolutionTable;
use crate::registry;
use crate::router::{ensure_indexes, required_indexes, target_partition};
use crate::source::PageReader;
use crate::store::DocumentStore;

use decode_worker::{DecodeContext, DecodeWorker};
use source_worker::SourceWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a JoinHandle because we trust but verify. Mostly verify.
pub(crate) trait Worker {
    type Output: Send + 'static;

    fn start(self) -> JoinHandle<Result<Self::Output>>;
}

/// 📋 What happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// 📄 Data lines handed to the decoders (header directives excluded).
    pub records_read: u64,
    pub decoded: u64,
    /// 💀 Malformed envelopes, dropped.
    pub dropped: u64,
    /// ⚠️ Fields that fell back to their zero value.
    pub coercion_warnings: u64,
    pub inserted: u64,
    /// 🚫 Documents the store refused (the store was reachable, it just said no).
    pub insert_failures: u64,
    pub keys_merged: u64,
    pub keys_failed: u64,
    pub conflicts_retried: u64,
    pub index_failures: u64,
}

impl RunReport {
    pub fn absorb(&mut self, other: RunReport) {
        self.records_read += other.records_read;
        self.decoded += other.decoded;
        self.dropped += other.dropped;
        self.coercion_warnings += other.coercion_warnings;
        self.inserted += other.inserted;
        self.insert_failures += other.insert_failures;
        self.keys_merged += other.keys_merged;
        self.keys_failed += other.keys_failed;
        self.conflicts_retried += other.conflicts_retried;
        self.index_failures += other.index_failures;
    }

    pub(crate) fn absorb_upsert(&mut self, upsert: &UpsertReport) {
        self.keys_merged += (upsert.created + upsert.merged + upsert.unchanged) as u64;
        self.keys_failed += upsert.failed.len() as u64;
        self.conflicts_retried += upsert.conflicts_retried as u64;
    }
}

/// 🚀 Run every configured input against `store`.
pub async fn run_with_store(app_config: AppConfig, store: Arc<dyn DocumentStore>) -> Result<RunReport> {
    let registry = registry::init().context("💀 The record registry refused to come up")?;
    let mut report = RunReport::default();

    for descriptor in registry.descriptors() {
        let partition = target_partition(descriptor.kind, &app_config.storage);
        let indexes = ensure_indexes(store.as_ref(), partition, &required_indexes(descriptor)).await;
        report.index_failures += indexes.failures.len() as u64;
    }

    let repository = HostnameRepository::new(Arc::clone(&store), app_config.storage.hostname_table.clone())
        .with_parallelism(app_config.runtime.upsert_parallelism)
        .with_max_merge_attempts(app_config.runtime.max_merge_attempts);
    if let Err(failure) = repository.create_indexes().await {
        warn!("{failure}");
        report.index_failures += 1;
    }

    let readers = open_readers(&app_config.source_config)?;
    let context = Arc::new(DecodeContext {
        registry,
        store,
        storage: app_config.storage.clone(),
        table: ResolutionTable::new(),
        repository,
    });

    for reader in readers {
        let origin = reader.origin().to_string();
        let stage = run_stage(reader, Arc::clone(&context), &app_config)
            .await
            .with_context(|| format!("💀 Processing '{origin}' did not finish"))?;
        info!(
            "✅ '{origin}': {} records read, {} decoded, {} dropped, {} hostnames merged",
            stage.records_read, stage.decoded, stage.dropped, stage.keys_merged
        );
        report.absorb(stage);
    }

    Ok(report)
}

// 📂 open everything up front so a typo in the last file name fails before the first insert
fn open_readers(source_config: &SourceConfig) -> Result<Vec<PageReader>> {
    match source_config {
        SourceConfig::File(file_config) => file_config
            .file_names
            .iter()
            .map(|file_name| PageReader::open(std::path::Path::new(file_name), file_config))
            .collect(),
        SourceConfig::InMemory(memory_config) => Ok(vec![PageReader::in_memory(memory_config)]),
    }
}

async fn run_stage(reader: PageReader, context: Arc<DecodeContext>, app_config: &AppConfig) -> Result<RunReport> {
    let (tx, rx) = async_channel::bounded(app_config.runtime.queue_capacity.max(1));
    let source = SourceWorker::new(tx, reader).start();
    let decoders: Vec<_> = (0..app_config.runtime.decode_parallelism.max(1))
        .map(|_| DecodeWorker::new(rx.clone(), Arc::clone(&context)).start())
        .collect();
    // -- 🔒 the stage's own receiver goes away so a dead crew closes the channel
    drop(rx);

    let mut report = RunReport::default();
    let mut first_failure = None;
    for decoder in decoders {
        match decoder.await.context("💀 A decode worker panicked")? {
            Ok(tally) => report.absorb(tally),
            Err(err) => {
                first_failure.get_or_insert(err);
            }
        }
    }
    // -- a decoder failure explains a source that lost its receivers, so it wins
    if let Some(err) = first_failure {
        return Err(err);
    }
    report.records_read += source.await.context("💀 The source worker panicked")??;
    Ok(report)
}
