//! Error types for the simulation harness.

use thiserror::Error;

/// Errors that can occur while running or exporting scenarios.
#[derive(Debug, Error)]
pub enum SimError {
    /// Runtime construction or export file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Export serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine aborted the script
    #[error("Engine error: {0}")]
    Engine(#[from] hasim_core::EngineError),
}
