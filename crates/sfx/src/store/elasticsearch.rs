// ai
//! 📡 The Elasticsearch store: same three promises, spoken over HTTP.
//!
//! 🎬 COLD OPEN: INT. CALL CENTER, NIGHT SHIFT
//!
//! Every request is a phone call. Some calls go through and someone says "created".
//! Some calls go through and someone says "409, somebody else is editing that".
//! Some calls never connect at all. We write down which was which and hang up. We
//! never call back on our own; calling back is the repository's decision.
//!
//! 🧠 Knowledge graph:
//! - `insert`       → `POST /{partition}/_doc`
//! - `merge`        → `POST /{partition}/_update/{key}` with a scripted upsert. The natural
//!   key IS the document id, which is what makes it unique. The painless script
//!   implements the exact fold of [`MergeUpdate::apply_to`].
//! - `create_index` → `PUT /{partition}` (already exists is fine), then
//!   `PUT /{partition}/_mapping` with the field's type and its index shape under `meta`.
//! - `fetch`        → `GET /{partition}/_doc/{key}`, 404 means "no such key".
//! - 🔒 Auth: API key beats basic auth, every request, no exceptions.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::coerce::LogicalType;
use crate::record::{Document, DocumentId};
use crate::router::IndexSpec;
use crate::store::{DocumentStore, MergeOutcome, MergeUpdate, StoreError};

/// 📡 Where the cluster lives and how to get past the door.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchStoreConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

// 🧮 mirror of MergeUpdate::apply_to; keep the two in lockstep
const MERGE_SCRIPT: &str = r#"
boolean changed = false;
if (ctx._source[params.key_field] == null) { ctx._source[params.key_field] = params.key; changed = true; }
for (entry in params.initial.entrySet()) {
  if (!ctx._source.containsKey(entry.getKey())) { ctx._source[entry.getKey()] = entry.getValue(); changed = true; }
}
for (entry in params.set_unions.entrySet()) {
  def current = ctx._source[entry.getKey()];
  if (current == null) { current = new ArrayList(); ctx._source[entry.getKey()] = current; changed = true; }
  for (value in entry.getValue()) {
    if (!current.contains(value)) { current.add(value); changed = true; }
  }
  Collections.sort(current);
}
def applied = ctx._source[params.applied_field];
if (applied == null) { applied = new ArrayList(); ctx._source[params.applied_field] = applied; }
for (contribution in params.contributions.entrySet()) {
  if (applied.contains(contribution.getKey())) { continue; }
  applied.add(contribution.getKey());
  changed = true;
  for (increment in contribution.getValue().entrySet()) {
    def before = ctx._source[increment.getKey()];
    ctx._source[increment.getKey()] = (before == null ? 0 : before) + increment.getValue();
  }
}
Collections.sort(applied);
for (cardinality in params.cardinalities.entrySet()) {
  def set = ctx._source[cardinality.getValue()];
  ctx._source[cardinality.getKey()] = set == null ? 0 : set.size();
}
if (!changed) { ctx.op = 'none'; }
"#;

/// 📡 A [`DocumentStore`] backed by an Elasticsearch cluster.
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    config: ElasticsearchStoreConfig,
}

impl ElasticsearchStore {
    /// 🚀 Build the client (10s connect, 30s overall) and ping the cluster root.
    ///
    /// A cluster that does not answer the ping fails the run here, before a single
    /// record is decoded.
    pub async fn new(config: ElasticsearchStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It is usually TLS.")?;
        let store = Self { client, config };

        let root = store
            .endpoint(&[])
            .context("💀 The configured Elasticsearch url does not parse as a url")?;
        let response = store
            .authorize(store.client.get(root))
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 Knocked on '{}' and nobody answered. Is the cluster up? Is the url right?",
                    store.config.url
                )
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The cluster at '{}' answered the ping with {status}: {body}",
                store.config.url
            );
        }
        debug!("✅ Elasticsearch at '{}' is home and answering", store.config.url);
        Ok(store)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| StoreError::Connectivity(format!("bad url '{}': {e}", self.config.url)))?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                StoreError::Connectivity(format!("url '{}' cannot carry a path", self.config.url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        // -- 🔒 api_key is the premium tier; basic auth only when there is no key
        if let Some(api_key) = &self.config.api_key {
            request.header("Authorization", format!("ApiKey {api_key}"))
        } else if let Some(username) = &self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        self.authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))
    }

    async fn body_of(response: Response, key: Option<&str>) -> Result<Value, StoreError> {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            if let Some(key) = key {
                return Err(StoreError::Conflict { key: key.to_string() });
            }
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// 🏷️ The mapping type for a field, from its logical type.
fn mapping_type(logical_type: Option<LogicalType>) -> &'static str {
    match logical_type {
        Some(LogicalType::Addr) => "ip",
        Some(LogicalType::Port | LogicalType::Count) => "long",
        Some(LogicalType::Time | LogicalType::Interval) => "double",
        Some(LogicalType::Bool) => "boolean",
        Some(LogicalType::String | LogicalType::Enum | LogicalType::StringSet) | None => "keyword",
    }
}

/// 🗺️ One field's mapping. Its index shape rides along under `meta`.
///
/// An unset address decodes to `""`, which an `ip` field refuses. `ignore_malformed`
/// keeps such a record: the value stays in `_source` and is left out of the index.
fn field_mapping(spec: &IndexSpec) -> Value {
    let field_type = mapping_type(spec.logical_type);
    let mut mapping = json!({
        "type": field_type,
        "meta": {
            "sfx_order": spec.order.name(),
            "sfx_unique": spec.unique.to_string(),
        }
    });
    if field_type == "ip" {
        mapping["ignore_malformed"] = Value::Bool(true);
    }
    mapping
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn insert(&self, partition: &str, document: Document) -> Result<DocumentId, StoreError> {
        let url = self.endpoint(&[partition, "_doc"])?;
        let response = self.send(self.client.post(url).json(&document)).await?;
        let body = Self::body_of(response, None).await?;
        let id = body
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Serialization(format!("insert response has no _id: {body}")))?;
        trace!("📥 inserted {id} into '{partition}'");
        Ok(DocumentId(id.to_string()))
    }

    async fn merge(
        &self,
        partition: &str,
        key_field: &str,
        key: &str,
        update: &MergeUpdate,
    ) -> Result<MergeOutcome, StoreError> {
        let mut url = self.endpoint(&[partition, "_update", key])?;
        // -- conflicts come back to the caller; the repository owns the retry policy
        url.query_pairs_mut().append_pair("retry_on_conflict", "0");
        let payload = json!({
            "scripted_upsert": true,
            "upsert": {},
            "script": {
                "lang": "painless",
                "source": MERGE_SCRIPT,
                "params": {
                    "key_field": key_field,
                    "key": key,
                    "initial": update.initial,
                    "set_unions": update.set_unions,
                    "contributions": update.contributions,
                    "cardinalities": update.cardinalities,
                    "applied_field": update.applied_field,
                }
            }
        });
        let response = self.send(self.client.post(url).json(&payload)).await?;
        let body = Self::body_of(response, Some(key)).await?;
        match body.get("result").and_then(Value::as_str) {
            Some("created") => Ok(MergeOutcome::Created),
            Some("updated") => Ok(MergeOutcome::Merged),
            Some("noop") => Ok(MergeOutcome::Unchanged),
            other => Err(StoreError::Serialization(format!(
                "update response for '{key}' has an unexpected result: {other:?}"
            ))),
        }
    }

    async fn create_index(&self, partition: &str, spec: &IndexSpec) -> Result<(), StoreError> {
        let index_url = self.endpoint(&[partition])?;
        let response = self.send(self.client.put(index_url)).await?;
        match Self::body_of(response, None).await {
            Ok(_) => debug!("🏗️ created index '{partition}'"),
            Err(StoreError::Rejected { status: 400, reason })
                if reason.contains("resource_already_exists_exception") =>
            {
                trace!("🏗️ index '{partition}' already exists");
            }
            Err(other) => return Err(other),
        }

        let mapping_url = self.endpoint(&[partition, "_mapping"])?;
        let mut properties = serde_json::Map::new();
        properties.insert(spec.field.clone(), field_mapping(spec));
        let mapping = json!({ "properties": properties });
        let response = self.send(self.client.put(mapping_url).json(&mapping)).await?;
        Self::body_of(response, None).await?;
        Ok(())
    }

    async fn fetch(&self, partition: &str, _key_field: &str, key: &str) -> Result<Option<Document>, StoreError> {
        let url = self.endpoint(&[partition, "_doc", key])?;
        let response = self.send(self.client.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::body_of(response, None).await?;
        match body.get("_source") {
            Some(Value::Object(source)) => Ok(Some(source.clone())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::IndexOrder;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn cluster() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tagline": "You Know, for Search" })))
            .mount(&server)
            .await;
        server
    }

    fn config(url: String) -> ElasticsearchStoreConfig {
        ElasticsearchStoreConfig {
            url,
            username: None,
            password: None,
            api_key: None,
        }
    }

    #[tokio::test]
    async fn the_one_where_a_silent_cluster_fails_the_handshake() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(ElasticsearchStore::new(config(server.uri())).await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_outranks_basic_auth() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("Authorization", "ApiKey sekrit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let mut with_both = config(server.uri());
        with_both.api_key = Some("sekrit".into());
        with_both.username = Some("elastic".into());
        with_both.password = Some("changeme".into());
        ElasticsearchStore::new(with_both).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_insert_hands_back_the_cluster_id() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("POST"))
            .and(path("/conn/_doc"))
            .and(body_partial_json(json!({ "uid": "C1" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "_id": "abc123", "result": "created" })))
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;
        let mut document = Document::new();
        document.insert("uid".into(), json!("C1"));
        assert_eq!(store.insert("conn", document).await?, DocumentId("abc123".into()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_merge_results_map_to_outcomes() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("POST"))
            .and(path("/hostnames/_update/example.org"))
            .and(query_param("retry_on_conflict", "0"))
            .and(body_partial_json(json!({ "scripted_upsert": true, "script": { "params": { "key": "example.org" } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": "noop" })))
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;
        let update = MergeUpdate {
            set_unions: BTreeMap::from([("ips".to_string(), ["1.2.3.4".to_string()].into())]),
            applied_field: "applied_observations".into(),
            ..MergeUpdate::default()
        };
        let outcome = store.merge("hostnames", "host", "example.org", &update).await?;
        assert_eq!(outcome, MergeOutcome::Unchanged);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_409_is_a_conflict_and_a_dead_port_is_connectivity() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("POST"))
            .and(path("/hostnames/_update/busy.example"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": { "type": "version_conflict_engine_exception" } })))
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;
        let err = store
            .merge("hostnames", "host", "busy.example", &MergeUpdate::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let unplugged = ElasticsearchStore {
            config: config("http://127.0.0.1:9".into()),
            ..store
        };
        let err = unplugged.fetch("hostnames", "host", "anything").await.unwrap_err();
        assert!(err.is_connectivity());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_existing_index_still_gets_its_mapping() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("PUT"))
            .and(path("/conn"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": { "type": "resource_already_exists_exception" } })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/conn/_mapping"))
            .and(body_partial_json(json!({ "properties": { "duration": { "type": "double", "meta": { "sfx_order": "descending" } } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(2)
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;
        let spec = IndexSpec::parse("-duration").with_logical_type(LogicalType::Interval);
        assert_eq!(spec.order, IndexOrder::Descending);
        store.create_index("conn", &spec).await?;
        store.create_index("conn", &spec).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_unset_address_still_finds_a_home() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("PUT"))
            .and(path("/dns"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/dns/_mapping"))
            .and(body_partial_json(json!({ "properties": { "id_resp_h": { "type": "ip", "ignore_malformed": true } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/dns/_doc"))
            .and(body_partial_json(json!({ "uid": "D1", "id_resp_h": "" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "_id": "d-1", "result": "created" })))
            .expect(1)
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;

        let registry = crate::registry::init()?;
        let descriptor = registry.descriptor(crate::schema::RecordKind::Dns)?;
        let specs = crate::router::required_indexes(descriptor);
        let resp_h = specs
            .iter()
            .find(|spec| spec.field == "id_resp_h")
            .ok_or_else(|| anyhow::anyhow!("dns has no id_resp_h index"))?;
        assert_eq!(field_mapping(resp_h)["ignore_malformed"], json!(true));
        store.create_index("dns", resp_h).await?;

        let decoded = crate::decoder::decode(
            crate::envelope::RawRecord::Json(r#"{"uid": "D1", "query": "example.org"}"#),
            descriptor,
        )?;
        let id = store.insert("dns", decoded.record.to_document()).await?;
        assert_eq!(id, DocumentId("d-1".into()));
        Ok(())
    }

    #[test]
    fn the_one_where_only_addresses_forgive_bad_values() {
        let duration = IndexSpec::parse("-duration").with_logical_type(LogicalType::Interval);
        assert!(field_mapping(&duration).get("ignore_malformed").is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_missing_key_is_none_not_an_error() -> anyhow::Result<()> {
        let server = cluster().await;
        Mock::given(method("GET"))
            .and(path("/hostnames/_doc/nobody.example"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "found": false })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hostnames/_doc/example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "found": true, "_source": { "host": "example.org", "ips": ["10.0.0.5"] } })))
            .mount(&server)
            .await;
        let store = ElasticsearchStore::new(config(server.uri())).await?;
        assert!(store.fetch("hostnames", "host", "nobody.example").await?.is_none());
        let found = store.fetch("hostnames", "host", "example.org").await?;
        assert_eq!(found.map(|doc| doc["ips"].clone()), Some(json!(["10.0.0.5"])));
        Ok(())
    }
}
