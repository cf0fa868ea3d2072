//! HA failover simulation harness
//!
//! Drives the scripted HA incident from `hasim_core` through fixed
//! scenarios and checks every published snapshot against the cluster
//! invariants.
//!
//! # Clocks
//!
//! - **Virtual**: `SimContext` advances time on every sleep, so the 40 s
//!   script finishes instantly and deterministically
//! - **Realtime**: `TokioContext` waits for real, for live demos
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                     │
//! │  ┌───────────────┐   trigger / reset   ┌──────────┐  │
//! │  │   Scenario    │────────────────────►│ HaEngine │  │
//! │  └───────────────┘                     └────┬─────┘  │
//! │                                  watch      │        │
//! │  ┌───────────────────────────────────────── ▼ ─────┐ │
//! │  │ Recorder: oracle · exporter · console echo      │ │
//! │  └─────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hasim_sim::{ScenarioRunner, SimConfig};
//! use hasim_sim::scenarios::ScenarioId;
//!
//! let runner = ScenarioRunner::new(SimConfig::default());
//! let result = runner.run(ScenarioId::FullIncident);
//! assert!(result.passed);
//! ```

mod config;
mod context;
mod error;
mod exporter;
mod observer;
mod oracle;
mod runner;
pub mod scenarios;

pub use config::{ClockMode, SimConfig};
pub use context::SimContext;
pub use error::SimError;
pub use exporter::{SimExport, SimFrame};
pub use observer::Recorder;
pub use oracle::{check, InvariantOracle};
pub use runner::{ScenarioResult, ScenarioRunner};
