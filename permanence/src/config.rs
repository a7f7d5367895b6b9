//! Configuration loading for the `permanence` daemon.
//!
//! Reads a YAML file into a `permanence_core::model::Configuration`,
//! resolving `source`/`storage` driver names through the plug-in registry
//! and tracking a checksum of the raw bytes so the daemon can detect
//! changes without re-parsing on every poll.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use permanence_core::hook::{HookArgs, HookRegistration};
use permanence_core::model::{Configuration, Options, Show, Source};
use permanence_core::monitor::ProcessMonitor;
use permanence_core::schedule::{parse_time_of_day, parse_weekday_token, WeeklySchedule};
use permanence_core::PermanenceError;
use serde::Deserialize;
use tracing::{debug, info};

use crate::drivers::DriverRegistry;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    options: RawOptions,
    #[serde(default)]
    storage: HashMap<String, RawDriver>,
    sources: HashMap<String, RawSource>,
    #[serde(default)]
    hooks: HashMap<String, Vec<RawHook>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawOptions {
    check_interval_seconds: Option<f64>,
    leeway_seconds: Option<i64>,
    hook_pool_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawDriver {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    rest: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    rest: serde_yaml::Value,
    shows: HashMap<String, RawShow>,
}

#[derive(Debug, Deserialize)]
struct RawShow {
    weekdays: Vec<String>,
    start: String,
    end: String,
    #[serde(default)]
    storage: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawHook {
    script: PathBuf,
}

/// Owns the config file path and the last-loaded state, mirroring the
/// teacher's `ConfigManager`: `load()` for first read, `reload_if_changed()`
/// for the polling path.
pub struct ConfigManager {
    path: PathBuf,
    current_checksum: Option<String>,
    registry: DriverRegistry,
    process_monitor: Arc<ProcessMonitor>,
}

impl ConfigManager {
    pub fn new(path: PathBuf, process_monitor: Arc<ProcessMonitor>) -> Self {
        Self {
            path,
            current_checksum: None,
            registry: DriverRegistry::default(),
            process_monitor,
        }
    }

    /// Read, parse, and validate the configuration file, building concrete
    /// driver instances. Parse/validation failures are
    /// `PermanenceError::Configuration` and abort startup.
    pub fn load(&mut self) -> Result<Configuration> {
        info!(path = %self.path.display(), "loading configuration");
        let raw_bytes = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let checksum = blake3::hash(&raw_bytes).to_hex().to_string();

        let config = self.parse(&raw_bytes)?;
        self.current_checksum = Some(checksum);
        Ok(config)
    }

    /// Re-read the file only if its checksum changed. Returns `None` if
    /// unchanged, matching the teacher's `reload_config` boolean-return
    /// shape but surfacing the parsed value directly since the caller
    /// needs it to call `apply_configuration`.
    pub fn reload_if_changed(&mut self) -> Result<Option<Configuration>> {
        let raw_bytes = std::fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let checksum = blake3::hash(&raw_bytes).to_hex().to_string();

        if self.current_checksum.as_deref() == Some(checksum.as_str()) {
            debug!("configuration unchanged");
            return Ok(None);
        }

        info!("configuration change detected, reloading");
        let config = self.parse(&raw_bytes)?;
        self.current_checksum = Some(checksum);
        Ok(Some(config))
    }

    fn parse(&self, raw_bytes: &[u8]) -> Result<Configuration> {
        let raw: RawConfig = serde_yaml::from_slice(raw_bytes)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        let options = Options {
            check_interval: raw
                .options
                .check_interval_seconds
                .map(Duration::from_secs_f64)
                .unwrap_or(Options::default().check_interval),
            leeway_seconds: raw.options.leeway_seconds.unwrap_or_default(),
            hook_pool_size: raw.options.hook_pool_size.unwrap_or(Options::default().hook_pool_size),
        };

        let mut storage = HashMap::new();
        for (name, raw_driver) in &raw.storage {
            let driver = self
                .registry
                .build_storage_driver(&raw_driver.kind, &raw_driver.rest)
                .with_context(|| format!("storage '{name}'"))?;
            storage.insert(name.clone(), driver);
        }

        let mut sources = HashMap::new();
        for (name, raw_source) in &raw.sources {
            let driver = self
                .registry
                .build_source_driver(&raw_source.kind, &raw_source.rest, self.process_monitor.clone())
                .with_context(|| format!("source '{name}'"))?;

            let mut shows = Vec::new();
            for (show_name, raw_show) in &raw_source.shows {
                shows.push(self.build_show(show_name, raw_show, &storage)?);
            }

            sources.insert(
                name.clone(),
                Source {
                    name: name.clone(),
                    driver,
                    storages: shows_storage_union(&raw_source.shows, &storage)?,
                    shows,
                },
            );
        }

        let mut hooks = HashMap::new();
        for (name, raw_registrations) in &raw.hooks {
            let mut registrations = Vec::new();
            for raw_hook in raw_registrations {
                registrations.push(script_hook_registration(raw_hook.script.clone()));
            }
            hooks.insert(name.clone(), registrations);
        }

        Ok(Configuration {
            storage,
            sources,
            hooks,
            options,
        })
    }

    fn build_show(
        &self,
        show_name: &str,
        raw_show: &RawShow,
        storage: &HashMap<String, Arc<dyn permanence_core::StorageDriver>>,
    ) -> Result<Show> {
        let mut weekdays = Vec::with_capacity(raw_show.weekdays.len());
        for token in &raw_show.weekdays {
            weekdays.push(parse_weekday_token(token)?);
        }
        let start = parse_time_of_day(&raw_show.start)?;
        let end = parse_time_of_day(&raw_show.end)?;

        for name in &raw_show.storage {
            if !storage.contains_key(name) {
                return Err(PermanenceError::Configuration(format!(
                    "show '{show_name}' references unknown storage '{name}'"
                ))
                .into());
            }
        }

        Ok(Show {
            name: show_name.to_string(),
            schedule: Arc::new(WeeklySchedule::new(weekdays, start, end)),
        })
    }
}

/// Every storage backend referenced by any of a source's shows - the
/// `Source` record carries the union so the Recorder can save a finished
/// capture without re-resolving names per show.
fn shows_storage_union(
    raw_shows: &HashMap<String, RawShow>,
    storage: &HashMap<String, Arc<dyn permanence_core::StorageDriver>>,
) -> Result<Vec<Arc<dyn permanence_core::StorageDriver>>> {
    let mut seen = std::collections::HashSet::new();
    let mut resolved = Vec::new();
    for raw_show in raw_shows.values() {
        for name in &raw_show.storage {
            if seen.insert(name.clone()) {
                if let Some(driver) = storage.get(name) {
                    resolved.push(driver.clone());
                }
            }
        }
    }
    Ok(resolved)
}

fn script_hook_registration(script: PathBuf) -> HookRegistration {
    let description = script.display().to_string();
    HookRegistration::new(
        description,
        Arc::new(move |args: &HookArgs| {
            let mut command = std::process::Command::new(&script);
            for (key, value) in hook_args_to_env(args) {
                command.env(key, value);
            }
            let status = command
                .status()
                .with_context(|| format!("failed to run hook script {}", script.display()))?;
            if !status.success() {
                anyhow::bail!("hook script {} exited with {status}", script.display());
            }
            Ok(())
        }),
    )
}

/// Flattens a hook payload into environment variables, the same
/// convention the original external-hook mechanism used to hand data to
/// an arbitrary script.
fn hook_args_to_env(args: &HookArgs) -> Vec<(&'static str, String)> {
    match args {
        HookArgs::Empty => Vec::new(),
        HookArgs::ShowSchedule { source, show, start_time } => vec![
            ("PERMANENCE_SOURCE", source.clone()),
            ("PERMANENCE_SHOW", show.clone()),
            ("PERMANENCE_START_TIME", format!("{start_time:?}")),
        ],
        HookArgs::Show { source, show } => vec![
            ("PERMANENCE_SOURCE", source.clone()),
            ("PERMANENCE_SHOW", show.clone()),
        ],
        HookArgs::ShowError { source, show, error } => vec![
            ("PERMANENCE_SOURCE", source.clone()),
            ("PERMANENCE_SHOW", show.clone()),
            ("PERMANENCE_ERROR", error.clone()),
        ],
        HookArgs::ShowDone { source, show, filename } => vec![
            ("PERMANENCE_SOURCE", source.clone()),
            ("PERMANENCE_SHOW", show.clone()),
            ("PERMANENCE_FILENAME", filename.clone()),
        ],
        HookArgs::ShowSave { source, show, location } => vec![
            ("PERMANENCE_SOURCE", source.clone()),
            ("PERMANENCE_SHOW", show.clone()),
            ("PERMANENCE_LOCATION", location.clone()),
        ],
        HookArgs::HookFailure { description, error } => vec![
            ("PERMANENCE_HOOK_DESCRIPTION", description.clone()),
            ("PERMANENCE_ERROR", error.clone()),
        ],
    }
}
