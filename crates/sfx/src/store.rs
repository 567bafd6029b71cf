// ai
//! 🗄️ The document store seam: the three things we ask of a database, and nothing more.
//!
//! 🎬 COLD OPEN: INT. BANK VAULT, AFTER HOURS
//!
//! The vault does not care what is inside the boxes. It accepts a box (insert). It
//! lets exactly one person at a time open a numbered box, add to it, and close it
//! again (merge). It installs new drawer labels when asked (create_index), and it
//! does not mind being asked twice. Durability, query planning, and the alarm
//! system belong to the vault. We just bring boxes.
//!
//! 🧠 Knowledge graph:
//! - [`DocumentStore`]: async trait, `&self` everywhere, shared across workers via `Arc`.
//! - [`MergeUpdate`]: one key's delta. [`MergeUpdate::apply_to`] is the pure fold every
//!   backend must agree with; the in-memory store runs it directly, Elasticsearch runs
//!   the same rules as a painless script.
//! - [`StoreBackend`]: enum dispatch over the concrete stores, same trick as the
//!   pipeline's other backends.
//! - [`StoreError`]: the closed taxonomy. `Conflict` gets retried upstream,
//!   `Connectivity` gets surfaced, nobody here loops.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::record::{Document, DocumentId};
use crate::router::IndexSpec;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::InMemoryStore;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// 📡 Could not talk to the store at all. Surfaced, never retried locally.
    #[error("💀 the store is unreachable: {0}")]
    Connectivity(String),
    /// ⚔️ A conditional update lost the race for this key.
    #[error("⚔️ conditional update on '{key}' lost a race with another writer")]
    Conflict { key: String },
    /// 🙅 The store heard us and said no.
    #[error("💀 the store rejected the request ({status}): {reason}")]
    Rejected { status: u16, reason: String },
    #[error("💀 could not (de)serialize a store payload: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// 🧾 What one merge did to its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Merged,
    /// 😴 Every contribution was already applied and every set element already present.
    Unchanged,
}

/// 🧮 The delta for one natural key.
///
/// The fold rules, applied in this order:
/// 1. `initial` fields are written only where the document lacks them.
/// 2. Every `set_unions` entry is unioned into its array field (kept sorted).
/// 3. Each `contributions` entry whose id is not yet listed under `applied_field` adds
///    its increments to counter fields, and its id is recorded.
/// 4. Every `cardinalities` entry sets `count_field = len(set_field)`.
///
/// Set union and "apply each id once" are both commutative and idempotent, so the
/// result depends only on the multiset of deltas, never on their order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeUpdate {
    pub initial: BTreeMap<String, Value>,
    pub set_unions: BTreeMap<String, BTreeSet<String>>,
    pub contributions: BTreeMap<String, BTreeMap<String, i64>>,
    pub cardinalities: BTreeMap<String, String>,
    pub applied_field: String,
}

impl MergeUpdate {
    /// 🧮 Fold this delta into an existing document (or a fresh one keyed by `key`).
    pub fn apply_to(&self, key_field: &str, key: &str, existing: Option<&Document>) -> (Document, MergeOutcome) {
        let mut document = existing.cloned().unwrap_or_default();
        document
            .entry(key_field.to_string())
            .or_insert_with(|| Value::String(key.to_string()));

        for (field, value) in &self.initial {
            document.entry(field.clone()).or_insert_with(|| value.clone());
        }

        for (field, additions) in &self.set_unions {
            let mut merged = string_set(document.get(field));
            merged.extend(additions.iter().cloned());
            document.insert(field.clone(), Value::Array(merged.into_iter().map(Value::String).collect()));
        }

        let mut applied = string_set(document.get(&self.applied_field));
        for (observation_id, increments) in &self.contributions {
            if !applied.insert(observation_id.clone()) {
                continue;
            }
            for (counter, increment) in increments {
                let before = document.get(counter).and_then(Value::as_i64).unwrap_or(0);
                document.insert(counter.clone(), Value::from(before.saturating_add(*increment)));
            }
        }
        if !self.applied_field.is_empty() {
            document.insert(
                self.applied_field.clone(),
                Value::Array(applied.into_iter().map(Value::String).collect()),
            );
        }

        for (count_field, set_field) in &self.cardinalities {
            let cardinality = string_set(document.get(set_field)).len();
            document.insert(count_field.clone(), Value::from(cardinality));
        }

        let outcome = match existing {
            None => MergeOutcome::Created,
            Some(before) if *before == document => MergeOutcome::Unchanged,
            Some(_) => MergeOutcome::Merged,
        };
        (document, outcome)
    }
}

pub(crate) fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::Array(elements)) => elements
            .iter()
            .filter_map(|element| element.as_str().map(str::to_string))
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// 🗄️ The store collaborator.
///
/// # Contract
/// - `insert` persists a document and returns the id the store picked.
/// - `merge` is atomic per key: concurrent merges on one key either serialize or
///   one of them fails with [`StoreError::Conflict`]. A conflict commits nothing.
/// - `create_index` is idempotent: asking for an index that already exists succeeds.
///   Redefining a field's index with a different shape is [`StoreError::Rejected`].
/// - `fetch` reads one keyed document back.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync {
    async fn insert(&self, partition: &str, document: Document) -> Result<DocumentId, StoreError>;

    async fn merge(
        &self,
        partition: &str,
        key_field: &str,
        key: &str,
        update: &MergeUpdate,
    ) -> Result<MergeOutcome, StoreError>;

    async fn create_index(&self, partition: &str, spec: &IndexSpec) -> Result<(), StoreError>;

    async fn fetch(&self, partition: &str, key_field: &str, key: &str) -> Result<Option<Document>, StoreError>;
}

/// 🎭 The concrete stores, behind one type.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    Elasticsearch(ElasticsearchStore),
}

impl StoreBackend {
    /// 🚀 Build the configured store. Elasticsearch gets pinged on the way up.
    pub async fn from_config(config: &crate::app_config::StoreConfig) -> Result<Self> {
        use crate::app_config::StoreConfig;
        Ok(match config {
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryStore::new()),
            StoreConfig::Elasticsearch(es_config) => {
                StoreBackend::Elasticsearch(ElasticsearchStore::new(es_config.clone()).await?)
            }
        })
    }
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn insert(&self, partition: &str, document: Document) -> Result<DocumentId, StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.insert(partition, document).await,
            StoreBackend::Elasticsearch(store) => store.insert(partition, document).await,
        }
    }

    async fn merge(
        &self,
        partition: &str,
        key_field: &str,
        key: &str,
        update: &MergeUpdate,
    ) -> Result<MergeOutcome, StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.merge(partition, key_field, key, update).await,
            StoreBackend::Elasticsearch(store) => store.merge(partition, key_field, key, update).await,
        }
    }

    async fn create_index(&self, partition: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.create_index(partition, spec).await,
            StoreBackend::Elasticsearch(store) => store.create_index(partition, spec).await,
        }
    }

    async fn fetch(&self, partition: &str, key_field: &str, key: &str) -> Result<Option<Document>, StoreError> {
        match self {
            StoreBackend::InMemory(store) => store.fetch(partition, key_field, key).await,
            StoreBackend::Elasticsearch(store) => store.fetch(partition, key_field, key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(id: &str, ips: &[&str], bytes: i64) -> MergeUpdate {
        MergeUpdate {
            initial: BTreeMap::from([("conn_count".to_string(), json!(0))]),
            set_unions: BTreeMap::from([(
                "ips".to_string(),
                ips.iter().map(|ip| ip.to_string()).collect(),
            )]),
            contributions: BTreeMap::from([(
                id.to_string(),
                BTreeMap::from([("conn_count".to_string(), 1), ("total_bytes".to_string(), bytes)]),
            )]),
            cardinalities: BTreeMap::from([("uconn_count".to_string(), "ips".to_string())]),
            applied_field: "applied".to_string(),
        }
    }

    #[test]
    fn the_one_where_a_fresh_key_is_created_with_everything() {
        let (document, outcome) = delta("conn:C1", &["10.0.0.5"], 530).apply_to("host", "example.org", None);
        assert_eq!(outcome, MergeOutcome::Created);
        assert_eq!(document["host"], json!("example.org"));
        assert_eq!(document["conn_count"], json!(1));
        assert_eq!(document["total_bytes"], json!(530));
        assert_eq!(document["uconn_count"], json!(1));
        assert_eq!(document["applied"], json!(["conn:C1"]));
    }

    #[test]
    fn the_one_where_a_replayed_delta_changes_nothing() {
        let update = delta("conn:C1", &["10.0.0.5"], 530);
        let (once, _) = update.apply_to("host", "example.org", None);
        let (twice, outcome) = update.apply_to("host", "example.org", Some(&once));
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert_eq!(once, twice);
    }

    #[test]
    fn the_one_where_order_does_not_matter() {
        let a = delta("conn:C1", &["10.0.0.5"], 100);
        let b = delta("conn:C2", &["10.0.0.6", "10.0.0.5"], 50);
        let (ab, _) = a.apply_to("host", "k", None);
        let (ab, _) = b.apply_to("host", "k", Some(&ab));
        let (ba, _) = b.apply_to("host", "k", None);
        let (ba, _) = a.apply_to("host", "k", Some(&ba));
        assert_eq!(ab, ba);
        assert_eq!(ab["total_bytes"], json!(150));
        assert_eq!(ab["uconn_count"], json!(2));
    }

    #[test]
    fn the_one_where_connectivity_is_told_apart_from_conflict() {
        assert!(StoreError::Connectivity("refused".into()).is_connectivity());
        assert!(StoreError::Conflict { key: "k".into() }.is_conflict());
        assert!(!StoreError::Rejected { status: 400, reason: "nope".into() }.is_conflict());
    }
}
