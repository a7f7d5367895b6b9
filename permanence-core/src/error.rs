//! Domain error types for the scheduling and supervision engine.

/// Errors that abort configuration apply or hook registration outright.
///
/// Recoverable, per-session failures (a capture that failed to start, a
/// storage save that failed) are not represented here - they travel as
/// hook payloads so operators see them without the daemon crashing. See
/// the error handling notes on [`crate::recorder::Recorder`].
#[derive(Debug, thiserror::Error)]
pub enum PermanenceError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown {kind} driver: {name}")]
    UnknownDriver { kind: String, name: String },

    #[error("hook '{0}' already declared")]
    DuplicateHook(String),

    #[error("hook '{0}' is not declared")]
    UnregisteredHook(String),
}

pub type Result<T> = anyhow::Result<T>;
