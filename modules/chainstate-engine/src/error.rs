use thiserror::Error;

use crate::types::Pointer;

/// Machine-readable kind shared by every resolution failure.
pub const RESOLUTION_ERROR: &str = "resolution_error";

/// Failure to fetch or decode side data. Distinct from legitimate absence,
/// which resolvers report as `Ok(None)`.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Transport error fetching {pointer}: {message}")]
    Transport { pointer: Pointer, message: String },

    #[error("Could not decode {what}: {message}")]
    Decode { what: String, message: String },

    #[error("Contract read {call} failed: {message}")]
    ContractRead { call: String, message: String },
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        RESOLUTION_ERROR
    }

    pub fn message(&self) -> &str {
        match self {
            ResolveError::Transport { message, .. }
            | ResolveError::Decode { message, .. }
            | ResolveError::ContractRead { message, .. } => message,
        }
    }
}

/// Why an event could not be folded. Nothing is committed when this is
/// returned; the previous snapshot stays authoritative.
#[derive(Error, Debug)]
pub enum ReduceError {
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    #[error("Malformed {event} event: {message}")]
    Decode { event: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReduceError {
    pub fn decode(event: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ReduceError::Decode {
            event: event.into(),
            message: err.to_string(),
        }
    }
}
