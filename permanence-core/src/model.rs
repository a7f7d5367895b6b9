//! Plain data types shared across the engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{SourceDriver, StorageDriver};
use crate::hook::HookRegistration;
use crate::schedule::Schedule;

/// Identifies a scheduled item in every event the engine fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub source: String,
    pub show: String,
}

impl Token {
    pub fn new(source: impl Into<String>, show: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            show: show.into(),
        }
    }
}

/// The key under which the Show Manager tracks a Managed Show.
pub type ShowKey = (String, String);

/// A named recurring recording within a source.
#[derive(Clone)]
pub struct Show {
    pub name: String,
    pub schedule: Arc<dyn Schedule>,
}

/// A named origin of capture, with the driver used to spawn sessions and
/// the storage backends recordings from it are distributed to.
#[derive(Clone)]
pub struct Source {
    pub name: String,
    pub driver: Arc<dyn SourceDriver>,
    pub storages: Vec<Arc<dyn StorageDriver>>,
    pub shows: Vec<Show>,
}

/// Tunables read from the `options` section of configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub check_interval: Duration,
    pub leeway_seconds: i64,
    pub hook_pool_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(1000),
            leeway_seconds: 0,
            hook_pool_size: 2,
        }
    }
}

/// A fully resolved configuration, ready to hand to
/// [`crate::recorder::Recorder::apply_configuration`].
#[derive(Clone)]
pub struct Configuration {
    pub storage: HashMap<String, Arc<dyn StorageDriver>>,
    pub sources: HashMap<String, Source>,
    pub hooks: HashMap<String, Vec<HookRegistration>>,
    pub options: Options,
}
