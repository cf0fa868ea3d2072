//! The mutable cluster state owned by the engine, and its read-only snapshot.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::debug;

use crate::event_log::{EventLog, LogEntry};
use crate::model::{Host, HostId, Inventory, RestartPriority, VirtualMachine, VmId};
use crate::phase::{HaPhase, PhaseMachine};

/// Status line shown while the cluster is healthy.
pub const STATUS_PROTECTED: &str = "Cluster protected. FDM agents active.";

/// One VM placement decided by the master during `FAILOVER_PLAN`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub vm_id: VmId,
    pub vm_name: String,
    pub priority: RestartPriority,
    pub target: HostId,
    pub target_name: String,
}

/// Everything the sequencer writes. Only the engine holds one of these.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub(crate) machine: PhaseMachine,
    pub(crate) inventory: Inventory,
    pub(crate) log: EventLog,
    pub(crate) status: String,
    pub(crate) heartbeat_active: bool,
    pub(crate) restart_plan: Vec<Placement>,
}

impl ClusterState {
    /// Canonical snapshot: healthy phase, canonical inventory, empty log.
    pub fn new() -> Self {
        Self {
            machine: PhaseMachine::new(),
            inventory: Inventory::canonical(),
            log: EventLog::new(),
            status: STATUS_PROTECTED.to_string(),
            heartbeat_active: true,
            restart_plan: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn phase(&self) -> HaPhase {
        self.machine.current()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_active
    }

    pub fn restart_plan(&self) -> &[Placement] {
        &self.restart_plan
    }

    /// Appends a narration line stamped with `at` and the current phase.
    pub(crate) fn narrate(&mut self, at: SystemTime, speaker: Option<&str>, text: impl Into<String>) {
        let phase = self.machine.current();
        let entry = self.log.append(at, phase, speaker, text);
        debug!(seq = entry.seq, phase = %phase, "{}", entry.message());
    }

    /// Overwrites the status line.
    pub(crate) fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
    }

    /// Owned copy for observers.
    pub fn snapshot(&self, incident_running: bool) -> ClusterSnapshot {
        ClusterSnapshot {
            phase: self.machine.current(),
            phase_history: self.machine.history().to_vec(),
            hosts: self.inventory.hosts().to_vec(),
            vms: self.inventory.vms().to_vec(),
            log: self.log.entries().to_vec(),
            status: self.status.clone(),
            heartbeat_active: self.heartbeat_active,
            restart_plan: self.restart_plan.clone(),
            incident_running,
        }
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the engine handed to renderers and subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub phase: HaPhase,
    pub phase_history: Vec<HaPhase>,
    pub hosts: Vec<Host>,
    pub vms: Vec<VirtualMachine>,
    /// Oldest-first
    pub log: Vec<LogEntry>,
    pub status: String,
    pub heartbeat_active: bool,
    pub restart_plan: Vec<Placement>,
    /// A sequencer run holds the run slot
    pub incident_running: bool,
}

impl ClusterSnapshot {
    /// The snapshot every fresh or reset engine reports.
    pub fn canonical() -> Self {
        ClusterState::new().snapshot(false)
    }

    pub fn host_by_name(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&VirtualMachine> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    /// Display name of the host a VM currently references.
    pub fn host_name_of(&self, vm: &VirtualMachine) -> Option<&str> {
        self.hosts
            .iter()
            .find(|h| h.id == vm.host_id)
            .map(|h| h.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn test_new_state_is_canonical() {
        let state = ClusterState::new();

        assert_eq!(state.phase(), HaPhase::Healthy);
        assert_eq!(state.status(), STATUS_PROTECTED);
        assert!(state.heartbeat_active());
        assert!(state.log().is_empty());
        assert!(state.restart_plan().is_empty());
        assert_eq!(state.inventory(), &Inventory::canonical());
    }

    #[test]
    fn test_reset_restores_everything() {
        let mut state = ClusterState::new();
        state.machine.advance(HaPhase::FailureDetected).unwrap();
        state.inventory.mark_host_failed(&HostId::from("h1")).unwrap();
        state.heartbeat_active = false;
        state.set_status("degraded");
        state.narrate(UNIX_EPOCH, Some("Cluster"), "degraded");

        state.reset();

        assert_eq!(state.snapshot(false), ClusterSnapshot::canonical());
    }

    #[test]
    fn test_narrate_tags_current_phase() {
        let mut state = ClusterState::new();
        state.narrate(UNIX_EPOCH, None, "before");
        state.machine.advance(HaPhase::FailureDetected).unwrap();
        state.narrate(UNIX_EPOCH, Some("FDM Master"), "after");

        let phases: Vec<_> = state.log().entries().iter().map(|e| e.phase).collect();
        assert_eq!(phases, [HaPhase::Healthy, HaPhase::FailureDetected]);
    }

    #[test]
    fn test_snapshot_lookups() {
        let snapshot = ClusterSnapshot::canonical();
        let sql = snapshot.vm_by_name("SQL-DB").unwrap();

        assert_eq!(snapshot.host_name_of(sql), Some("ESXi-01"));
        assert!(snapshot.host_by_name("ESXi-04").is_none());
    }
}
