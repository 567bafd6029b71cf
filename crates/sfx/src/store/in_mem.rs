// ai
//! 🧠 The in-memory store: a database that lives exactly as long as the process does.
//!
//! Documents, keyed summaries, and index definitions sit in maps behind one
//! `Arc<tokio::sync::Mutex<..>>`. Clone the store and every clone sees the same maps,
//! which is how tests peek at what the pipeline wrote after handing the store off.
//!
//! A merge is a read-modify-write under the lock, which makes it trivially atomic per
//! key. Tests can still make it lose races on purpose (see `inject_conflicts`), or
//! pretend the network is down (`set_reachable(false)`), so the retry and failure
//! paths upstream get exercised without a real cluster. 🦆

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::record::{Document, DocumentId};
use crate::router::IndexSpec;
use crate::store::{DocumentStore, MergeOutcome, MergeUpdate, StoreError};

#[derive(Debug, Default)]
struct Partition {
    inserted: Vec<(DocumentId, Document)>,
    keyed: BTreeMap<String, Document>,
    indexes: BTreeMap<String, IndexSpec>,
}

#[derive(Debug)]
struct State {
    partitions: HashMap<String, Partition>,
    next_id: u64,
    reachable: bool,
    pending_conflicts: HashMap<String, usize>,
    rejected_keys: HashSet<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            partitions: HashMap::new(),
            next_id: 0,
            reachable: true,
            pending_conflicts: HashMap::new(),
            rejected_keys: HashSet::new(),
        }
    }
}

impl State {
    fn check_reachable(&self) -> Result<(), StoreError> {
        if self.reachable {
            Ok(())
        } else {
            Err(StoreError::Connectivity("in-memory store marked unreachable".to_string()))
        }
    }
}

/// 🧠 A store that never forgets, until the process exits.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📄 Every document inserted into `partition`, in insertion order.
    pub async fn documents(&self, partition: &str) -> Vec<(DocumentId, Document)> {
        let state = self.state.lock().await;
        state
            .partitions
            .get(partition)
            .map(|p| p.inserted.clone())
            .unwrap_or_default()
    }

    /// 🔑 Every keyed summary in `partition`, by key.
    pub async fn keyed(&self, partition: &str) -> BTreeMap<String, Document> {
        let state = self.state.lock().await;
        state
            .partitions
            .get(partition)
            .map(|p| p.keyed.clone())
            .unwrap_or_default()
    }

    /// 🗂️ The indexes defined on `partition`, sorted by field.
    pub async fn indexes(&self, partition: &str) -> Vec<IndexSpec> {
        let state = self.state.lock().await;
        state
            .partitions
            .get(partition)
            .map(|p| p.indexes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// ⚔️ Make the next `count` merges on `key` fail with a conflict, committing nothing.
    #[cfg(test)]
    pub(crate) async fn inject_conflicts(&self, key: &str, count: usize) {
        self.state
            .lock()
            .await
            .pending_conflicts
            .insert(key.to_string(), count);
    }

    /// 🙅 Make every merge on `key` get rejected.
    #[cfg(test)]
    pub(crate) async fn reject_key(&self, key: &str) {
        self.state.lock().await.rejected_keys.insert(key.to_string());
    }

    /// 📡 Flip the pretend network cable.
    #[cfg(test)]
    pub(crate) async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, partition: &str, document: Document) -> Result<DocumentId, StoreError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        state.next_id += 1;
        let id = DocumentId(format!("mem-{}", state.next_id));
        state
            .partitions
            .entry(partition.to_string())
            .or_default()
            .inserted
            .push((id.clone(), document));
        trace!("📥 inserted {id} into '{partition}'");
        Ok(id)
    }

    async fn merge(
        &self,
        partition: &str,
        key_field: &str,
        key: &str,
        update: &MergeUpdate,
    ) -> Result<MergeOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        if state.rejected_keys.contains(key) {
            return Err(StoreError::Rejected {
                status: 400,
                reason: format!("key '{key}' is not welcome here"),
            });
        }
        if let Some(remaining) = state.pending_conflicts.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Conflict { key: key.to_string() });
            }
        }

        let keyed = &mut state.partitions.entry(partition.to_string()).or_default().keyed;
        let (document, outcome) = update.apply_to(key_field, key, keyed.get(key));
        if outcome != MergeOutcome::Unchanged {
            keyed.insert(key.to_string(), document);
        }
        Ok(outcome)
    }

    async fn create_index(&self, partition: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_reachable()?;
        let indexes = &mut state.partitions.entry(partition.to_string()).or_default().indexes;
        match indexes.get(&spec.field) {
            Some(existing) if existing.conflicts_with(spec) => Err(StoreError::Rejected {
                status: 409,
                reason: format!("index {existing} already exists where {spec} was requested"),
            }),
            Some(_) => Ok(()),
            None => {
                indexes.insert(spec.field.clone(), spec.clone());
                Ok(())
            }
        }
    }

    async fn fetch(&self, partition: &str, _key_field: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let state = self.state.lock().await;
        state.check_reachable()?;
        Ok(state
            .partitions
            .get(partition)
            .and_then(|p| p.keyed.get(key))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn the_one_where_inserts_get_fresh_ids_and_stay_put() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let mut document = Document::new();
        document.insert("uid".into(), json!("C1"));
        let first = store.insert("conn", document.clone()).await?;
        let second = store.insert("conn", document).await?;
        assert_ne!(first, second);
        assert_eq!(store.documents("conn").await.len(), 2);
        assert!(store.documents("dns").await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_injected_conflicts_commit_nothing() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        store.inject_conflicts("example.org", 1).await;
        let update = MergeUpdate {
            set_unions: BTreeMap::from([("ips".to_string(), ["1.2.3.4".to_string()].into())]),
            ..MergeUpdate::default()
        };
        let lost = store.merge("hostnames", "host", "example.org", &update).await;
        assert!(matches!(lost, Err(StoreError::Conflict { .. })));
        assert!(store.fetch("hostnames", "host", "example.org").await?.is_none());

        let won = store.merge("hostnames", "host", "example.org", &update).await?;
        assert_eq!(won, MergeOutcome::Created);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unplugged_store_says_so() {
        let store = InMemoryStore::new();
        store.set_reachable(false).await;
        let err = store.insert("conn", Document::new()).await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
