// ai
//! 🧭 The Storage Router: which shelf a record goes on, and which card catalogs that shelf needs.
//!
//! 🎬 COLD OPEN: INT. WAREHOUSE, LOADING DOCK B
//!
//! A forklift driver holds up a crate labeled `conn`. The dispatcher checks a
//! clipboard, says "aisle conn", and goes back to their sandwich. That is the whole
//! routing algorithm. The interesting part is the other clipboard: the one that
//! says every aisle needs its index cards filed before anything gets shelved, and
//! that filing the same card twice must be harmless.
//!
//! 🧠 Knowledge graph:
//! - [`target_partition`]: pure lookup from [`RecordKind`] through [`StorageConfig`].
//! - [`required_indexes`]: parses the descriptor's declarations, in order, every time the same.
//! - [`ensure_indexes`]: asks the store for each index; failures are collected, never fatal.
//!   The router does not remember what it already asked for. Idempotency is the store's job.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::coerce::LogicalType;
use crate::schema::{RecordKind, RecordTypeDescriptor};
use crate::store::{DocumentStore, StoreError};

/// 🗄️ Partition names per record kind, injected from config.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_conn_table")]
    pub conn_table: String,
    #[serde(default = "default_dns_table")]
    pub dns_table: String,
    #[serde(default = "default_hostname_table", alias = "host_table")]
    pub hostname_table: String,
}

fn default_conn_table() -> String {
    "conn".to_string()
}

fn default_dns_table() -> String {
    "dns".to_string()
}

fn default_hostname_table() -> String {
    "hostnames".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conn_table: default_conn_table(),
            dns_table: default_dns_table(),
            hostname_table: default_hostname_table(),
        }
    }
}

/// ↕️ How an index orders (or scatters) its keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexOrder {
    Ascending,
    Descending,
    Hashed,
}

impl IndexOrder {
    pub fn name(self) -> &'static str {
        match self {
            IndexOrder::Ascending => "ascending",
            IndexOrder::Descending => "descending",
            IndexOrder::Hashed => "hashed",
        }
    }
}

/// 🗂️ One index the store should maintain on one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub field: String,
    pub order: IndexOrder,
    pub unique: bool,
    /// 🏷️ The field's logical type, when known. Stores with typed mappings use it.
    pub logical_type: Option<LogicalType>,
}

impl IndexSpec {
    /// 📜 Parse a declaration: `$hashed:field`, `-field` (descending), or `field` (ascending).
    pub fn parse(declaration: &str) -> Self {
        let (field, order) = if let Some(field) = declaration.strip_prefix("$hashed:") {
            (field, IndexOrder::Hashed)
        } else if let Some(field) = declaration.strip_prefix('-') {
            (field, IndexOrder::Descending)
        } else {
            (declaration.strip_prefix('+').unwrap_or(declaration), IndexOrder::Ascending)
        };
        Self {
            field: field.to_string(),
            order,
            unique: false,
            logical_type: None,
        }
    }

    /// 🔑 An ascending unique index: the kind that makes a natural key a key.
    pub fn unique(field: &str) -> Self {
        Self {
            field: field.to_string(),
            order: IndexOrder::Ascending,
            unique: true,
            logical_type: Some(LogicalType::String),
        }
    }

    pub fn with_logical_type(mut self, logical_type: LogicalType) -> Self {
        self.logical_type = Some(logical_type);
        self
    }

    /// ⚔️ Same field, different shape. Two of these cannot coexist.
    pub fn conflicts_with(&self, other: &IndexSpec) -> bool {
        self.field == other.field && (self.order != other.order || self.unique != other.unique)
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.order {
            IndexOrder::Hashed => write!(f, "$hashed:{}", self.field)?,
            IndexOrder::Descending => write!(f, "-{}", self.field)?,
            IndexOrder::Ascending => f.write_str(&self.field)?,
        }
        if self.unique {
            f.write_str(" (unique)")?;
        }
        Ok(())
    }
}

/// 💀 One index that could not be ensured. Reported, logged, survived.
#[derive(Debug, Clone, Error)]
#[error("💀 could not ensure index {spec} on partition '{partition}': {source}")]
pub struct IndexCreationError {
    pub partition: String,
    pub spec: IndexSpec,
    #[source]
    pub source: StoreError,
}

/// 📋 What happened when we asked for a set of indexes.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub ensured: usize,
    pub failures: Vec<IndexCreationError>,
}

impl IndexReport {
    pub fn absorb(&mut self, other: IndexReport) {
        self.ensured += other.ensured;
        self.failures.extend(other.failures);
    }
}

/// 🧭 Where records of this kind live.
pub fn target_partition(kind: RecordKind, config: &StorageConfig) -> &str {
    match kind {
        RecordKind::Conn => &config.conn_table,
        RecordKind::Dns => &config.dns_table,
    }
}

/// 🗂️ The index set for a record kind, in declaration order.
pub fn required_indexes(descriptor: &RecordTypeDescriptor) -> Vec<IndexSpec> {
    descriptor
        .indexes
        .iter()
        .map(|declaration| {
            let spec = IndexSpec::parse(declaration);
            match descriptor.field(&spec.field) {
                Some(field) => spec.with_logical_type(field.logical_type),
                None => spec,
            }
        })
        .collect()
}

/// 🏗️ Ask the store for every spec. Safe to call as often as anyone likes.
pub async fn ensure_indexes(
    store: &dyn DocumentStore,
    partition: &str,
    specs: &[IndexSpec],
) -> IndexReport {
    let mut report = IndexReport::default();
    for spec in specs {
        match store.create_index(partition, spec).await {
            Ok(()) => {
                debug!("🗂️ index {spec} ensured on '{partition}'");
                report.ensured += 1;
            }
            Err(source) => {
                let failure = IndexCreationError {
                    partition: partition.to_string(),
                    spec: spec.clone(),
                    source,
                };
                warn!("{failure}");
                report.failures.push(failure);
            }
        }
    }
    report
}
