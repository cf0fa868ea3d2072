//! Error types for the failover engine.

use thiserror::Error;

use crate::model::{HostId, VmId};
use crate::phase::HaPhase;

/// A mutation referenced an entity that does not exist.
///
/// The failover script is fixed, so hitting one of these means the script
/// and the canonical inventory disagree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Unknown host: {0}")]
    UnknownHost(HostId),

    #[error("Unknown VM: {0}")]
    UnknownVm(VmId),
}

/// The phase machine was asked to move somewhere other than its successor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhaseError {
    #[error("Illegal phase transition {from} -> {to}")]
    IllegalTransition { from: HaPhase, to: HaPhase },
}

/// Errors that abort an incident run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Script step referenced a missing host or VM
    #[error("Inconsistent failover script: {0}")]
    Model(#[from] ModelError),

    /// Script step skipped or repeated a phase
    #[error("Inconsistent failover script: {0}")]
    Phase(#[from] PhaseError),
}
