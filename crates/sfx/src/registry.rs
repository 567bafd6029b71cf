// ai
//! 📚 The descriptor registry: every record kind this process can read, written down once.
//!
//! 🎬 COLD OPEN: INT. LIBRARY, OPENING TIME
//!
//! The librarian shelves every book before the doors open. After that, the shelves
//! are read-only. You may borrow. You may not donate. You definitely may not
//! reorganize the shelves while people are reading.
//!
//! Startup calls [`init`] once. Everyone else calls [`global`]. There is no
//! `register` after that point: [`Registry`] has no mutating methods.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::debug;

use crate::schema::{Encoding, RecordKind, RecordTypeDescriptor, conn, dns};

static REGISTRY: OnceLock<Registry> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("💀 record kind '{0}' was registered twice")]
    DuplicateKind(RecordKind),
    #[error("💀 record kind '{kind}' declares storage key '{storage_key}' more than once")]
    DuplicateStorageKey {
        kind: RecordKind,
        storage_key: &'static str,
    },
    #[error("💀 field '{storage_key}' of '{kind}' names encoding '{encoding}', which the record kind does not register")]
    UnregisteredEncoding {
        kind: RecordKind,
        storage_key: &'static str,
        encoding: Encoding,
    },
    #[error("💀 record kind '{kind}' flags a custom hook but provides none")]
    MissingHook { kind: RecordKind },
    #[error("💀 record kind '{0}' is not registered")]
    UnknownKind(RecordKind),
    #[error("💀 unknown encoding '{0}'. Known: sensor_log, json, document")]
    UnknownEncoding(String),
    #[error("💀 the descriptor registry was read before startup initialized it")]
    NotInitialized,
}

/// 📚 A frozen set of record type descriptors.
#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: BTreeMap<RecordKind, &'static RecordTypeDescriptor>,
}

impl Registry {
    /// 📚 Every descriptor that ships with the crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Ok(RegistryBuilder::default()
            .register(&conn::CONN)?
            .register(&dns::DNS)?
            .build())
    }

    pub fn descriptor(&self, kind: RecordKind) -> Result<&'static RecordTypeDescriptor, RegistryError> {
        self.descriptors
            .get(&kind)
            .copied()
            .ok_or(RegistryError::UnknownKind(kind))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &'static RecordTypeDescriptor> + '_ {
        self.descriptors.values().copied()
    }
}

/// 🏗️ Collects descriptors, validating each on the way in.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: BTreeMap<RecordKind, &'static RecordTypeDescriptor>,
}

impl RegistryBuilder {
    pub fn register(mut self, descriptor: &'static RecordTypeDescriptor) -> Result<Self, RegistryError> {
        descriptor.validate()?;
        if self.descriptors.contains_key(&descriptor.kind) {
            return Err(RegistryError::DuplicateKind(descriptor.kind));
        }
        self.descriptors.insert(descriptor.kind, descriptor);
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            descriptors: self.descriptors,
        }
    }
}

/// 🚀 Startup routine: build and install the built-in registry.
///
/// Calling it again returns the registry that is already installed.
pub fn init() -> Result<&'static Registry, RegistryError> {
    if let Some(registry) = REGISTRY.get() {
        return Ok(registry);
    }
    let registry = Registry::builtin()?;
    let installed = REGISTRY.get_or_init(|| registry);
    debug!(
        "📚 descriptor registry initialized with {} record kinds",
        installed.descriptors.len()
    );
    Ok(installed)
}

/// 📖 The process-wide registry. Fails if [`init`] has not run.
pub fn global() -> Result<&'static Registry, RegistryError> {
    REGISTRY.get().ok_or(RegistryError::NotInitialized)
}
