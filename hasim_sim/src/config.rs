//! Harness configuration.

use std::fmt;
use std::path::PathBuf;

/// Which clock drives the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// `SimContext`: the 40 s script completes instantly
    Virtual,
    /// `TokioContext`: waits really happen, for a live demo
    Realtime,
}

impl ClockMode {
    pub fn name(&self) -> &'static str {
        match self {
            ClockMode::Virtual => "virtual",
            ClockMode::Realtime => "realtime",
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for a harness run.
///
/// Timings and the cluster layout are fixed by the script; only how the run
/// is clocked, observed and recorded can be chosen.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Clock driving the script
    pub clock: ClockMode,

    /// Echo phase, status and narration as the observer sees them
    pub echo: bool,

    /// Write per-snapshot frames of the run to this JSON file
    pub export_path: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Virtual,
            echo: false,
            export_path: None,
        }
    }
}
