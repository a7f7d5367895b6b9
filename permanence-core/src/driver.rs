//! Contracts the engine depends on but does not implement.
//!
//! Concrete capture and storage mechanisms (spawning a stream-ripping
//! subprocess, copying a file to a path built from a template, shipping it
//! over SFTP) are external collaborators. The engine only needs to be able
//! to spawn a session, start and stop it, and hear about its lifecycle.

use std::path::Path;
use std::time::Duration;

use crate::event::EventSource;

/// Lifecycle events a [`Session`] fires over the course of a recording.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The capture process has started.
    Start,
    /// The capture ended abnormally: non-zero exit, or far too early.
    Error(String),
    /// The capture finished and produced a file at this path.
    Done(String),
}

/// A single in-progress (or just-finished) capture of a show.
///
/// Implementations own the underlying subprocess and are responsible for
/// registering it with a process monitor so `SessionEvent`s fire without
/// the engine polling anything itself.
pub trait Session: Send {
    /// Whether this session will stop itself once `duration` has elapsed,
    /// as opposed to requiring an explicit `stop()` call.
    fn can_stop_automatically(&self, duration: Duration) -> bool;

    /// Begin capturing. `duration` is `Some` only when the session reported
    /// `can_stop_automatically`; it is the upper bound the session should
    /// enforce on itself.
    fn start(&mut self, duration: Option<Duration>) -> anyhow::Result<()>;

    /// Stop the session. Must be a silent no-op if the session has already
    /// ended.
    fn stop(&mut self) -> anyhow::Result<()>;

    /// The event source this session fires `start`/`error`/`done` on.
    fn events(&self) -> &EventSource<SessionEvent>;
}

/// Spawns capture sessions for one show at a time.
pub trait SourceDriver: Send + Sync {
    fn spawn(&self, show_name: &str) -> anyhow::Result<Box<dyn Session>>;
}

/// Events a [`StorageDriver`] fires once a save it was asked to perform
/// completes or fails. Carries the `(source, show)` the save was for since
/// one storage driver instance is shared across many shows.
#[derive(Debug, Clone)]
pub enum StorageEvent {
    Save {
        source: String,
        show: String,
        location: String,
    },
    Error {
        source: String,
        show: String,
        error: String,
    },
}

/// Distributes a finished recording somewhere durable.
pub trait StorageDriver: Send + Sync {
    /// Queue (or perform) the save. Implementations may do this
    /// fire-and-forget on their own worker and report completion later
    /// through `events()`, or do it inline and fire immediately - the
    /// engine treats both identically.
    fn save(&self, source: &str, show: &str, file_path: &Path) -> anyhow::Result<()>;

    /// Optional teardown hook, called once at daemon shutdown.
    fn shutdown(&self) {}

    fn events(&self) -> &EventSource<StorageEvent>;
}
