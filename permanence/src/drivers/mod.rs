//! Compile-time plug-in registry: maps a driver `type` name from
//! configuration to a constructor, in place of the dynamic module-import
//! loading the original implementation used.

mod filesystem_storage;
mod null_storage;
mod process_source;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use permanence_core::{PermanenceError, ProcessMonitor, SourceDriver, StorageDriver};

pub use filesystem_storage::FilesystemStorageDriver;
pub use null_storage::NullStorageDriver;
pub use process_source::ProcessSourceDriver;

type SourceConstructor = fn(&serde_yaml::Value, Arc<ProcessMonitor>) -> Result<Arc<dyn SourceDriver>>;
type StorageConstructor = fn(&serde_yaml::Value) -> Result<Arc<dyn StorageDriver>>;

pub struct DriverRegistry {
    sources: HashMap<&'static str, SourceConstructor>,
    storages: HashMap<&'static str, StorageConstructor>,
}

impl DriverRegistry {
    pub fn build_source_driver(
        &self,
        kind: &str,
        config: &serde_yaml::Value,
        process_monitor: Arc<ProcessMonitor>,
    ) -> Result<Arc<dyn SourceDriver>> {
        let constructor = self.sources.get(kind).ok_or_else(|| {
            PermanenceError::UnknownDriver {
                kind: "source".to_string(),
                name: kind.to_string(),
            }
        })?;
        constructor(config, process_monitor)
    }

    pub fn build_storage_driver(
        &self,
        kind: &str,
        config: &serde_yaml::Value,
    ) -> Result<Arc<dyn StorageDriver>> {
        let constructor = self.storages.get(kind).ok_or_else(|| {
            PermanenceError::UnknownDriver {
                kind: "storage".to_string(),
                name: kind.to_string(),
            }
        })?;
        constructor(config)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut sources: HashMap<&'static str, SourceConstructor> = HashMap::new();
        sources.insert("process", process_source::from_config);

        let mut storages: HashMap<&'static str, StorageConstructor> = HashMap::new();
        storages.insert("filesystem", filesystem_storage::from_config);
        storages.insert("null", null_storage::from_config);

        Self { sources, storages }
    }
}
