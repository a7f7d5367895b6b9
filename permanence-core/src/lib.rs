//! Scheduling and supervision engine for the permanence recording daemon.
//!
//! This crate has no knowledge of configuration file formats, subprocess
//! management, or filesystem layouts - those live in the driver
//! implementations the `permanence` binary crate wires in. What lives here
//! is the part that is true regardless of how shows get captured: tracking
//! what should be recording right now, starting and stopping sessions at
//! the right times, and dispatching hooks for everything that happens
//! along the way.

pub mod driver;
pub mod error;
pub mod event;
pub mod hook;
pub mod model;
pub mod monitor;
pub mod recorder;
pub mod schedule;
pub mod show_manager;

pub use driver::{Session, SessionEvent, SourceDriver, StorageDriver, StorageEvent};
pub use error::{PermanenceError, Result};
pub use event::EventSource;
pub use hook::{HookArgs, HookCallable, HookInvoker, HookRegistration};
pub use model::{Configuration, Options, Show, ShowKey, Source, Token};
pub use monitor::{ExitStatus, ProcessMonitor, Watched};
pub use recorder::Recorder;
pub use schedule::{parse_time_of_day, parse_weekday_token, Schedule, WeeklySchedule};
pub use show_manager::ShowManager;
