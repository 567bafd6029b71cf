//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - [`AppConfig`] = where records come from ([`SourceConfig`]), where they go
//!   ([`StoreConfig`]), what the partitions are called ([`StorageConfig`]), and how many
//!   workers get to touch them ([`RuntimeConfig`]).
//! - Env vars are `SFX_*`, nested keys use `__` (`SFX_RUNTIME__QUEUE_CAPACITY=32`).
//! - A TOML file, if given, is merged on top. TOML wins.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::router::StorageConfig;
use crate::schema::{Encoding, RecordKind};
use crate::store::ElasticsearchStoreConfig;

/// 📦 One struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source_config: SourceConfig,
    #[serde(default)]
    pub store_config: StoreConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, alias = "supervisor_config")]
    pub runtime: RuntimeConfig,
}

/// 🚰 Where raw records come from.
#[derive(Debug, Deserialize, Clone)]
pub enum SourceConfig {
    File(FileSourceConfig),
    InMemory(InMemorySourceConfig),
}

/// 📂 Sensor log files, read in the order listed.
///
/// List DNS logs before conn logs: connections can only be attributed to hostnames
/// that were resolved earlier in the run.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    #[serde(alias = "file_name", deserialize_with = "one_or_many")]
    pub file_names: Vec<String>,
    /// 📡 Leave unset to sniff it from the first line (`{` means JSON).
    #[serde(default)]
    pub encoding: Option<Encoding>,
    /// 🏷️ Leave unset to take it from `#path` or the file name.
    #[serde(default)]
    pub record_kind: Option<RecordKind>,
    #[serde(default)]
    pub common_config: CommonSourceConfig,
}

/// 🧪 Lines handed over directly. Tests and demos.
#[derive(Debug, Deserialize, Clone)]
pub struct InMemorySourceConfig {
    pub encoding: Encoding,
    pub record_kind: RecordKind,
    pub lines: Vec<String>,
    #[serde(default)]
    pub common_config: CommonSourceConfig,
}

/// 📦 How big a page the source hands to the decode workers.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommonSourceConfig {
    #[serde(default = "default_max_batch_size_docs")]
    pub max_batch_size_docs: usize,
    #[serde(default = "default_max_batch_size_bytes")]
    pub max_batch_size_bytes: usize,
}

fn default_max_batch_size_docs() -> usize {
    1000
}

// -- 1MB; sensor lines are small, a page of them should be too
fn default_max_batch_size_bytes() -> usize {
    1024 * 1024
}

impl Default for CommonSourceConfig {
    fn default() -> Self {
        Self {
            max_batch_size_docs: default_max_batch_size_docs(),
            max_batch_size_bytes: default_max_batch_size_bytes(),
        }
    }
}

/// 🗄️ Where canonical records and summaries land.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum StoreConfig {
    #[default]
    InMemory,
    Elasticsearch(ElasticsearchStoreConfig),
}

/// 🧵 Worker counts and queue sizes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    #[serde(default = "default_decode_parallelism", alias = "num_decode_workers")]
    pub decode_parallelism: usize,
    #[serde(default = "default_upsert_parallelism")]
    pub upsert_parallelism: usize,
    #[serde(default = "default_max_merge_attempts")]
    pub max_merge_attempts: usize,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_decode_parallelism() -> usize {
    4
}

fn default_upsert_parallelism() -> usize {
    4
}

fn default_max_merge_attempts() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            decode_parallelism: default_decode_parallelism(),
            upsert_parallelism: default_upsert_parallelism(),
            max_merge_attempts: default_max_merge_attempts(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(file_name) => vec![file_name],
        OneOrMany::Many(file_names) => file_names,
    })
}

/// 🚀 Load the config: env vars (`SFX_*`), plus an optional TOML file merged on top.
///
/// 📐 No file means env vars only. No silent fallback to some `config.toml` in the cwd.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("SFX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SFX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SFX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
