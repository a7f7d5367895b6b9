//! A storage driver that discards everything, used in tests and as a
//! documented extension point for custom backends that don't warrant a
//! full driver of their own.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use permanence_core::{EventSource, StorageDriver, StorageEvent};

pub fn from_config(_config: &serde_yaml::Value) -> Result<Arc<dyn StorageDriver>> {
    Ok(Arc::new(NullStorageDriver {
        events: EventSource::new(),
    }))
}

pub struct NullStorageDriver {
    events: EventSource<StorageEvent>,
}

impl StorageDriver for NullStorageDriver {
    fn save(&self, source: &str, show: &str, file_path: &Path) -> Result<()> {
        self.events.fire(StorageEvent::Save {
            source: source.to_string(),
            show: show.to_string(),
            location: file_path.display().to_string(),
        });
        Ok(())
    }

    fn events(&self) -> &EventSource<StorageEvent> {
        &self.events
    }
}
