// ai
//! 🧺 The Aggregation Repository: many partial sightings of a hostname, one summary.
//!
//! 🎬 COLD OPEN: INT. DETECTIVE'S OFFICE, CORKBOARD WALL
//!
//! Witness one saw `example.org` resolve to 1.2.3.4. Witness two saw it resolve to
//! 1.2.3.4 and 1.2.3.5. Witness three saw 10.0.0.5 open a connection to it and push
//! 530 bytes. Witness three then told the same story again, word for word, because
//! the message queue delivered it twice. The corkboard must end up with two
//! addresses, one connection, 530 bytes. Not 1060. Never 1060.
//!
//! 🧠 Knowledge graph:
//! - [`ObservationInput`]: one key's partial contribution. Sets union. Counters ride inside
//!   `contributions`, keyed by an observation id, so a replay is recognized and skipped.
//! - [`HostnameRepository::upsert`]: per-key merges through the store's atomic conditional
//!   update, different keys in parallel (`buffer_unordered`), conflicts retried here
//!   (bounded), every other per-key failure collected into the [`UpsertReport`].
//! - A store that is unreachable is structural: the call returns
//!   [`AggregationError::StoreUnreachable`] with how many keys it hit. Merges that already
//!   landed stay landed.
//! - [`HostnameSummary`]: the read-back view downstream reporting sees.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::router::{IndexCreationError, IndexSpec};
use crate::store::{DocumentStore, MergeOutcome, MergeUpdate, StoreError};

/// 🔑 The natural key's field in a summary document.
pub const KEY_FIELD: &str = "host";
pub const RESOLVED_IPS: &str = "resolved_ips";
pub const CLIENT_IPS: &str = "client_ips";
pub const CONNECTED_HOSTS: &str = "ips";
pub const CONN_COUNT: &str = "conn_count";
pub const UNIQUE_CONN_COUNT: &str = "uconn_count";
pub const TOTAL_BYTES: &str = "total_bytes";
/// 🧾 Ids of every additive contribution already folded into a summary.
///
/// ⚠️ Never compacted. It gains one entry per connection ever attributed to the
/// hostname, so a busy host's summary document keeps growing, and each merge scans
/// the list before applying a contribution. Leave it out of reporting queries.
pub const APPLIED_OBSERVATIONS: &str = "applied_observations";

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_MAX_MERGE_ATTEMPTS: usize = 16;

/// 🔢 Additive counters carried by one observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub conn_count: i64,
    pub total_bytes: i64,
}

/// 👁️ One key's partial contribution to its summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationInput {
    pub resolved_ips: BTreeSet<String>,
    pub client_ips: BTreeSet<String>,
    pub connected_hosts: BTreeSet<String>,
    /// 🧾 Counter increments by observation id. An id is applied at most once, ever.
    pub contributions: BTreeMap<String, Counters>,
}

impl ObservationInput {
    pub fn with_resolved_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resolved_ips.extend(ips.into_iter().map(Into::into));
        self
    }

    pub fn with_client_ips<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_ips.extend(ips.into_iter().map(Into::into));
        self
    }

    /// 🔌 Record one connection: who connected, and the counters it adds.
    pub fn with_connection(mut self, observation_id: impl Into<String>, from: impl Into<String>, bytes: i64) -> Self {
        self.connected_hosts.insert(from.into());
        self.contributions.insert(
            observation_id.into(),
            Counters {
                conn_count: 1,
                total_bytes: bytes,
            },
        );
        self
    }

    /// 🧲 Fold another input for the same key into this one, before it ever reaches the store.
    pub fn absorb(&mut self, other: ObservationInput) {
        self.resolved_ips.extend(other.resolved_ips);
        self.client_ips.extend(other.client_ips);
        self.connected_hosts.extend(other.connected_hosts);
        for (id, counters) in other.contributions {
            self.contributions.entry(id).or_insert(counters);
        }
    }

    /// 🧮 The store-level delta for this input.
    pub fn to_merge_update(&self) -> MergeUpdate {
        let mut set_unions = BTreeMap::new();
        set_unions.insert(RESOLVED_IPS.to_string(), self.resolved_ips.clone());
        set_unions.insert(CLIENT_IPS.to_string(), self.client_ips.clone());
        set_unions.insert(CONNECTED_HOSTS.to_string(), self.connected_hosts.clone());

        let contributions = self
            .contributions
            .iter()
            .map(|(id, counters)| {
                (
                    id.clone(),
                    BTreeMap::from([
                        (CONN_COUNT.to_string(), counters.conn_count),
                        (TOTAL_BYTES.to_string(), counters.total_bytes),
                    ]),
                )
            })
            .collect();

        MergeUpdate {
            initial: BTreeMap::from([
                (CONN_COUNT.to_string(), json!(0)),
                (TOTAL_BYTES.to_string(), json!(0)),
            ]),
            set_unions,
            contributions,
            cardinalities: BTreeMap::from([(UNIQUE_CONN_COUNT.to_string(), CONNECTED_HOSTS.to_string())]),
            applied_field: APPLIED_OBSERVATIONS.to_string(),
        }
    }
}

/// 📊 The converged summary for one hostname, as reporting reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostnameSummary {
    pub host: String,
    #[serde(default)]
    pub conn_count: i64,
    #[serde(default)]
    pub uconn_count: i64,
    #[serde(default)]
    pub total_bytes: i64,
    #[serde(default, rename = "ips")]
    pub connected_hosts: BTreeSet<String>,
    #[serde(default)]
    pub resolved_ips: BTreeSet<String>,
    #[serde(default)]
    pub client_ips: BTreeSet<String>,
}

/// 📋 Per-key results of one upsert call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    pub created: usize,
    pub merged: usize,
    pub unchanged: usize,
    /// ⚔️ Conflicts that were retried (whether or not the key made it in the end).
    pub conflicts_retried: usize,
    /// 💀 Keys that did not make it, with the reason.
    pub failed: BTreeMap<String, String>,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.created + self.merged + self.unchanged + self.failed.len()
    }

    pub fn absorb(&mut self, other: UpsertReport) {
        self.created += other.created;
        self.merged += other.merged;
        self.unchanged += other.unchanged;
        self.conflicts_retried += other.conflicts_retried;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Error)]
pub enum AggregationError {
    /// 📡 The store could not be reached for some keys. Whatever merged before stays merged.
    #[error("💀 the store was unreachable for {affected} of {total} keys")]
    StoreUnreachable {
        affected: usize,
        total: usize,
        report: Box<UpsertReport>,
    },
}

/// 🧺 Folds observations into per-hostname summaries in one partition.
#[derive(Debug, Clone)]
pub struct HostnameRepository {
    store: Arc<dyn DocumentStore>,
    partition: String,
    parallelism: usize,
    max_merge_attempts: usize,
}

impl HostnameRepository {
    pub fn new(store: Arc<dyn DocumentStore>, partition: impl Into<String>) -> Self {
        Self {
            store,
            partition: partition.into(),
            parallelism: DEFAULT_PARALLELISM,
            max_merge_attempts: DEFAULT_MAX_MERGE_ATTEMPTS,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_max_merge_attempts(mut self, attempts: usize) -> Self {
        self.max_merge_attempts = attempts.max(1);
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// 🔑 Ensure the uniqueness-supporting index on the natural key. Repeatable.
    pub async fn create_indexes(&self) -> Result<(), IndexCreationError> {
        let spec = IndexSpec::unique(KEY_FIELD);
        self.store
            .create_index(&self.partition, &spec)
            .await
            .map_err(|source| IndexCreationError {
                partition: self.partition.clone(),
                spec,
                source,
            })
    }

    /// 🧺 Merge every key's observation into its summary, creating summaries as needed.
    pub async fn upsert(
        &self,
        observations: BTreeMap<String, ObservationInput>,
    ) -> Result<UpsertReport, AggregationError> {
        let total = observations.len();
        let results: Vec<(String, Result<(MergeOutcome, usize), (StoreError, usize)>)> =
            futures::stream::iter(observations)
                .map(|(key, input)| async move {
                    let update = input.to_merge_update();
                    let result = self.merge_with_retry(&key, &update).await;
                    (key, result)
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;

        let mut report = UpsertReport::default();
        let mut unreachable = 0;
        for (key, result) in results {
            match result {
                Ok((outcome, retries)) => {
                    report.conflicts_retried += retries;
                    match outcome {
                        MergeOutcome::Created => report.created += 1,
                        MergeOutcome::Merged => report.merged += 1,
                        MergeOutcome::Unchanged => report.unchanged += 1,
                    }
                }
                Err((error, retries)) => {
                    report.conflicts_retried += retries;
                    if error.is_connectivity() {
                        unreachable += 1;
                    }
                    warn!("💀 hostname '{key}' was not merged: {error}");
                    report.failed.insert(key, error.to_string());
                }
            }
        }

        if unreachable > 0 {
            return Err(AggregationError::StoreUnreachable {
                affected: unreachable,
                total,
                report: Box::new(report),
            });
        }
        info!(
            "🧺 upserted {total} hostnames into '{}': {} created, {} merged, {} unchanged, {} failed",
            self.partition,
            report.created,
            report.merged,
            report.unchanged,
            report.failed.len()
        );
        Ok(report)
    }

    // ⚔️ conflicts retry up to max_merge_attempts; every other error is final
    async fn merge_with_retry(
        &self,
        key: &str,
        update: &MergeUpdate,
    ) -> Result<(MergeOutcome, usize), (StoreError, usize)> {
        let mut retries = 0;
        loop {
            match self.store.merge(&self.partition, KEY_FIELD, key, update).await {
                Ok(outcome) => return Ok((outcome, retries)),
                Err(error) if error.is_conflict() && retries + 1 < self.max_merge_attempts => {
                    retries += 1;
                    debug!("⚔️ merge on '{key}' lost a race, attempt {retries} of {}", self.max_merge_attempts);
                    tokio::task::yield_now().await;
                }
                Err(error) => return Err((error, retries)),
            }
        }
    }

    /// 📊 Read one converged summary back.
    pub async fn summary(&self, host: &str) -> Result<Option<HostnameSummary>, StoreError> {
        let Some(document) = self.store.fetch(&self.partition, KEY_FIELD, host).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(Value::Object(document))?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::in_mem::InMemoryStore;

    fn repository(store: &InMemoryStore) -> HostnameRepository {
        HostnameRepository::new(Arc::new(store.clone()), "hostnames")
    }

    fn one(key: &str, input: ObservationInput) -> BTreeMap<String, ObservationInput> {
        BTreeMap::from([(key.to_string(), input)])
    }

    #[tokio::test]
    async fn the_one_where_example_org_learns_its_second_address() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let repo = repository(&store);
        repo.upsert(one("example.org", ObservationInput::default().with_resolved_ips(["1.2.3.4"])))
            .await?;
        repo.upsert(one(
            "example.org",
            ObservationInput::default().with_resolved_ips(["1.2.3.4", "1.2.3.5"]),
        ))
        .await?;

        let summary = repo.summary("example.org").await?.ok_or_else(|| anyhow::anyhow!("no summary"))?;
        let expected: BTreeSet<String> = ["1.2.3.4", "1.2.3.5"].into_iter().map(String::from).collect();
        assert_eq!(summary.resolved_ips, expected);
        assert_eq!(summary.conn_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_order_lands_on_the_same_summary() -> anyhow::Result<()> {
        let inputs = [
            ObservationInput::default()
                .with_resolved_ips(["1.2.3.4"])
                .with_client_ips(["10.0.0.2"]),
            ObservationInput::default().with_connection("conn:C1", "10.0.0.5", 530),
            ObservationInput::default()
                .with_resolved_ips(["1.2.3.5"])
                .with_connection("conn:C2", "10.0.0.6", 70),
        ];
        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let mut summaries = Vec::new();
        for order in permutations {
            let store = InMemoryStore::new();
            let repo = repository(&store);
            for index in order {
                repo.upsert(one("k.example", inputs[index].clone())).await?;
            }
            summaries.push(repo.summary("k.example").await?);
        }
        assert!(summaries.windows(2).all(|pair| pair[0] == pair[1]));
        let summary = summaries[0].clone().ok_or_else(|| anyhow::anyhow!("no summary"))?;
        assert_eq!(summary.conn_count, 2);
        assert_eq!(summary.uconn_count, 2);
        assert_eq!(summary.total_bytes, 600);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_replay_is_not_double_counted() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let repo = repository(&store);
        let batch = one(
            "example.org",
            ObservationInput::default()
                .with_resolved_ips(["1.2.3.4"])
                .with_connection("conn:C1", "10.0.0.5", 530),
        );
        let first = repo.upsert(batch.clone()).await?;
        let second = repo.upsert(batch).await?;
        assert_eq!(first.created, 1);
        assert_eq!(second.unchanged, 1);

        let summary = repo.summary("example.org").await?.ok_or_else(|| anyhow::anyhow!("no summary"))?;
        assert_eq!(summary.conn_count, 1);
        assert_eq!(summary.total_bytes, 530);
        assert_eq!(summary.connected_hosts.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_concurrent_upserts_on_one_key_both_land() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let repo = repository(&store);
        let left = one("example.org", ObservationInput::default().with_connection("conn:L", "10.0.0.1", 10));
        let right = one("example.org", ObservationInput::default().with_connection("conn:R", "10.0.0.2", 20));
        let (a, b) = tokio::join!(repo.upsert(left), repo.upsert(right));
        a?;
        b?;
        let summary = repo.summary("example.org").await?.ok_or_else(|| anyhow::anyhow!("no summary"))?;
        assert_eq!((summary.conn_count, summary.uconn_count, summary.total_bytes), (2, 2, 30));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_lost_races_are_retried_until_they_win() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        store.inject_conflicts("busy.example", 3).await;
        let repo = repository(&store);
        let report = repo
            .upsert(one("busy.example", ObservationInput::default().with_resolved_ips(["9.9.9.9"])))
            .await?;
        assert_eq!(report.created, 1);
        assert_eq!(report.conflicts_retried, 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_one_bad_key_does_not_spoil_the_batch() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        store.reject_key("bad.example").await;
        store.inject_conflicts("cursed.example", 100).await;
        let repo = repository(&store).with_max_merge_attempts(3);

        let mut batch = BTreeMap::new();
        batch.insert("bad.example".to_string(), ObservationInput::default().with_resolved_ips(["6.6.6.6"]));
        batch.insert("cursed.example".to_string(), ObservationInput::default().with_resolved_ips(["6.6.6.7"]));
        batch.insert("good.example".to_string(), ObservationInput::default().with_resolved_ips(["8.8.8.8"]));
        let report = repo.upsert(batch).await?;

        assert_eq!(report.created, 1);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.contains_key("bad.example"));
        assert!(report.failed.contains_key("cursed.example"));
        assert_eq!(report.conflicts_retried, 2);
        assert!(repo.summary("good.example").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unreachable_store_is_surfaced_with_a_count() {
        let store = InMemoryStore::new();
        store.set_reachable(false).await;
        let repo = repository(&store);
        let mut batch = BTreeMap::new();
        batch.insert("a.example".to_string(), ObservationInput::default());
        batch.insert("b.example".to_string(), ObservationInput::default());
        match repo.upsert(batch).await {
            Err(AggregationError::StoreUnreachable { affected, total, .. }) => {
                assert_eq!((affected, total), (2, 2));
            }
            other => panic!("💀 expected an unreachable store, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_key_index_can_be_asked_for_forever() -> anyhow::Result<()> {
        let store = InMemoryStore::new();
        let repo = repository(&store);
        for _ in 0..3 {
            repo.create_indexes().await?;
        }
        let indexes = store.indexes("hostnames").await;
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].unique);
        assert_eq!(indexes[0].field, KEY_FIELD);
        Ok(())
    }

    #[test]
    fn the_one_where_absorbing_keeps_the_first_claim_on_an_id() {
        let mut input = ObservationInput::default().with_connection("conn:C1", "10.0.0.5", 10);
        input.absorb(ObservationInput::default().with_connection("conn:C1", "10.0.0.5", 10));
        input.absorb(ObservationInput::default().with_resolved_ips(["1.1.1.1"]));
        assert_eq!(input.contributions.len(), 1);
        assert_eq!(input.resolved_ips.len(), 1);
    }
}
