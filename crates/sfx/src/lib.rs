//! 🔭 sfx: sensor logs in, canonical records and hostname summaries out.
//!
//! 🧠 Knowledge graph:
//! - [`source`] reads sensor logs (columnar, JSON, or stored documents) into pages.
//! - [`decoder`] turns each raw record into a [`record::CanonicalRecord`] using the
//!   static descriptor tables in [`schema`], looked up through the [`registry`].
//! - [`router`] decides which partition a record lands in and which indexes that
//!   partition needs.
//! - [`observations`] + [`aggregate`] fold DNS and conn records into per-hostname summaries
//!   through the [`store`]'s atomic per-key merge.
//! - [`pipeline`] wires the above into workers; [`run`] is the front door.

pub mod aggregate;
pub mod app_config;
pub mod coerce;
pub mod decoder;
pub mod envelope;
pub mod observations;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod registry;
pub mod router;
pub mod schema;
pub mod source;
pub mod store;
pub mod value;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::app_config::AppConfig;
use crate::store::StoreBackend;

pub use crate::pipeline::{RunReport, run_with_store};

/// 🚀 Build the configured store and run every configured input through it.
pub async fn run(app_config: AppConfig) -> Result<RunReport> {
    let store = StoreBackend::from_config(&app_config.store_config)
        .await
        .context("💀 Could not bring up the configured store")?;
    run_with_store(app_config, Arc::new(store)).await
}
