//! Error types shared across the simulation core.

use std::fmt;
use std::io;

/// Crate-wide result alias.
pub type SimResult<T> = Result<T, SimError>;

/// Failure taxonomy of the simulation core.
///
/// `Config` and `NotImplemented` are reported at startup or on first use;
/// `Invariant` and `Transport` are fatal mid-run conditions. `Io` is only
/// recoverable where a policy can degrade (dataset replay); everywhere else
/// it aborts the job like the rest.
#[derive(Debug)]
pub enum SimError {
    /// Invalid simulation parameter, rejected before any worker starts.
    Config { what: String },
    /// A state invariant was violated (lost particle, duplicate owner, ...).
    Invariant { what: String },
    /// A collective failed or a peer never arrived.
    Transport { what: String },
    /// Underlying file I/O failure.
    Io(io::Error),
    /// A declared-unsupported code path was reached.
    NotImplemented { what: &'static str },
}

impl SimError {
    pub fn config(what: impl Into<String>) -> Self {
        SimError::Config { what: what.into() }
    }

    pub fn invariant(what: impl Into<String>) -> Self {
        SimError::Invariant { what: what.into() }
    }

    pub fn transport(what: impl Into<String>) -> Self {
        SimError::Transport { what: what.into() }
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Config { what } => write!(f, "invalid configuration: {what}"),
            SimError::Invariant { what } => write!(f, "invariant violation: {what}"),
            SimError::Transport { what } => write!(f, "transport failure: {what}"),
            SimError::Io(e) => write!(f, "i/o error: {e}"),
            SimError::NotImplemented { what } => write!(f, "{what} is not implemented"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SimError {
    fn from(e: io::Error) -> Self {
        SimError::Io(e)
    }
}
