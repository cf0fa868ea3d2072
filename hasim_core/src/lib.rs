//! HA Sim Core - scripted vSphere HA failover engine
//!
//! Walks a three-host cluster through one HA incident:
//! 1. **Detection**: ESXi-01 stops answering and its VMs go down
//! 2. **Isolation check**: the datastore heartbeat confirms a real failure
//! 3. **Failover**: ESXi-02 is elected master and restarts the High-priority VMs
//!
//! The engine owns the only write path. Renderers read snapshots or
//! subscribe to them, and may only call `trigger()` and `reset()`.

pub mod engine;
pub mod error;
pub mod event_log;
pub mod model;
pub mod phase;
pub mod script;
pub mod state;

// Re-export key types for convenience
pub use engine::{HaEngine, RunOutcome, TriggerOutcome};
pub use error::{EngineError, ModelError, PhaseError};
pub use event_log::{EventLog, LogEntry};
pub use model::{Host, HostId, HostStatus, Inventory, RestartPriority, VirtualMachine, VmId, VmStatus};
pub use phase::{HaPhase, PhaseMachine};
pub use state::{ClusterSnapshot, ClusterState, Placement};
