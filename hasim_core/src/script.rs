//! The failover script.
//!
//! An incident is six steps played in order. Each [`Step`] carries the delay
//! that precedes it, the phase it enters (the first step stays in
//! `HEALTHY`), and a handler that mutates the cluster and narrates.
//!
//! ```text
//!   t=0s   announce      HEALTHY           ping lost on ESXi-01
//!   t=5s   detect        FAILURE_DETECTED  ESXi-01 + its VMs fail, heartbeat off
//!   t=14s  isolation     ISOLATION_CHECK   datastore heartbeat silent
//!   t=23s  plan          FAILOVER_PLAN     ESXi-02 elected, placements computed
//!   t=31s  restart       RESTARTING        High-priority VMs booting elsewhere
//!   t=40s  recover       RECOVERED         booting -> running
//! ```

use std::time::{Duration, SystemTime};

use crate::error::{EngineError, ModelError};
use crate::model::{HostId, RestartPriority, VmStatus};
use crate::phase::HaPhase;
use crate::state::{ClusterState, Placement};

/// Host whose power failure the incident simulates.
pub const FAILED_HOST: &str = "h1";

/// Host that wins the FDM election after the failure.
pub const NEW_MASTER: &str = "h2";

/// Incident markers framing the narration.
pub const INCIDENT_START: &str = "--- INCIDENT START ---";
pub const INCIDENT_END: &str = "--- INCIDENT END ---";

type StepFn = fn(&mut ClusterState, SystemTime) -> Result<(), EngineError>;

/// One scripted step of the incident.
#[derive(Clone, Copy)]
pub struct Step {
    /// Handler name, for logging
    pub name: &'static str,
    /// Suspension before the step runs
    pub wait_before: Duration,
    /// Phase entered when the step runs
    pub enters: Option<HaPhase>,
    apply: StepFn,
}

impl Step {
    /// Enters the step's phase, then applies its mutations and narration.
    pub fn run(&self, state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
        if let Some(phase) = self.enters {
            state.machine.advance(phase)?;
        }
        (self.apply)(state, at)
    }
}

/// The full incident, in order.
pub static SCRIPT: [Step; 6] = [
    Step {
        name: "announce",
        wait_before: Duration::ZERO,
        enters: None,
        apply: announce_unreachable,
    },
    Step {
        name: "detect",
        wait_before: Duration::from_millis(5000),
        enters: Some(HaPhase::FailureDetected),
        apply: detect_failure,
    },
    Step {
        name: "isolation",
        wait_before: Duration::from_millis(9000),
        enters: Some(HaPhase::IsolationCheck),
        apply: check_isolation,
    },
    Step {
        name: "plan",
        wait_before: Duration::from_millis(9000),
        enters: Some(HaPhase::FailoverPlan),
        apply: plan_failover,
    },
    Step {
        name: "restart",
        wait_before: Duration::from_millis(8000),
        enters: Some(HaPhase::Restarting),
        apply: restart_vms,
    },
    Step {
        name: "recover",
        wait_before: Duration::from_millis(9000),
        enters: Some(HaPhase::Recovered),
        apply: recover,
    },
];

/// Sum of every scripted delay.
pub fn total_duration() -> Duration {
    SCRIPT.iter().map(|s| s.wait_before).sum()
}

fn host_name(state: &ClusterState, id: &str) -> Result<String, ModelError> {
    let id = HostId::from(id);
    state
        .inventory
        .host(&id)
        .map(|h| h.name.clone())
        .ok_or(ModelError::UnknownHost(id))
}

// =============================================================================
// STEP HANDLERS
// =============================================================================

fn announce_unreachable(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    let failed = host_name(state, FAILED_HOST)?;

    state.narrate(at, None, INCIDENT_START);
    state.narrate(
        at,
        Some("Monitor"),
        format!("Host {} stopped responding to ping.", failed),
    );
    Ok(())
}

fn detect_failure(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    let failed = host_name(state, FAILED_HOST)?;

    state.heartbeat_active = false;
    state.inventory.mark_host_failed(&HostId::from(FAILED_HOST))?;

    state.set_status(format!(
        "CRITICAL ALERT! All contact with host {} has been lost. \
         The virtual machines on that host went down abruptly.",
        failed
    ));
    state.narrate(
        at,
        Some("FDM Master"),
        format!("Network heartbeat loss detected on {}!", failed),
    );
    state.narrate(
        at,
        Some("Cluster"),
        "State degraded. Starting emergency protocols.",
    );
    Ok(())
}

fn check_isolation(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    let failed = host_name(state, FAILED_HOST)?;

    state.set_status(
        "The master host checks shared storage (Datastore Heartbeat) to confirm whether \
         the host really failed or whether it is only a network cable problem.",
    );
    state.narrate(at, Some("HA Master"), "Checking 'Datastore Heartbeat'...");
    state.narrate(
        at,
        Some("Storage"),
        format!("No disk activity detected from host {}.", failed),
    );
    Ok(())
}

fn plan_failover(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    let failed = host_name(state, FAILED_HOST)?;
    let master = host_name(state, NEW_MASTER)?;

    state.inventory.promote_host_to_master(&HostId::from(NEW_MASTER))?;
    state.narrate(
        at,
        Some("FDM Election"),
        format!("{} takes over as the NEW MASTER.", master),
    );

    state.restart_plan = compute_restart_plan(state)?;

    state.set_status(format!(
        "Confirmed: host {} is dead. The new master ({}) reviews the affected VMs \
         and decides where to restart them based on available capacity.",
        failed, master
    ));
    state.narrate(
        at,
        Some("HA Master"),
        "Computing restart plan for affected VMs...",
    );
    let lines: Vec<String> = state
        .restart_plan
        .iter()
        .map(|p| format!("{} ({} Priority) -> {}", p.vm_name, p.priority, p.target_name))
        .collect();
    for line in lines {
        state.narrate(at, Some("Plan"), line);
    }
    Ok(())
}

/// High-priority VMs of the failed host, spread round-robin over the
/// surviving hosts starting with the new master.
fn compute_restart_plan(state: &ClusterState) -> Result<Vec<Placement>, ModelError> {
    let failed = HostId::from(FAILED_HOST);
    let master = HostId::from(NEW_MASTER);

    let master_host = state
        .inventory
        .host(&master)
        .ok_or_else(|| ModelError::UnknownHost(master.clone()))?;
    let mut survivors = vec![master_host];
    survivors.extend(
        state
            .inventory
            .hosts()
            .iter()
            .filter(|h| !h.is_failed() && h.id != master),
    );

    let mut affected: Vec<_> = state
        .inventory
        .vms_on(&failed)
        .filter(|vm| vm.priority == RestartPriority::High)
        .collect();
    affected.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    Ok(affected
        .into_iter()
        .zip(survivors.iter().cycle())
        .map(|(vm, host)| Placement {
            vm_id: vm.id.clone(),
            vm_name: vm.name.clone(),
            priority: vm.priority,
            target: host.id.clone(),
            target_name: host.name.clone(),
        })
        .collect())
}

fn restart_vms(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    state.set_status(
        "Restoring! vSphere HA orders the immediate power-on of the VMs on the surviving \
         hosts. High-priority VMs start first.",
    );

    let plan = state.restart_plan.clone();
    for placement in &plan {
        state
            .inventory
            .relocate_vm(&placement.vm_id, &placement.target, VmStatus::Booting)?;
        state.narrate(
            at,
            Some("Task"),
            format!(
                "Power On '{}' on {}... Success.",
                placement.vm_name, placement.target_name
            ),
        );
    }
    Ok(())
}

fn recover(state: &mut ClusterState, at: SystemTime) -> Result<(), EngineError> {
    state.inventory.settle_booting_to_running();

    state.set_status(
        "Recovery complete. Services were restored automatically without human intervention.",
    );
    state.narrate(at, Some("HA"), "All protected VMs are back online.");
    state.narrate(at, None, INCIDENT_END);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HostStatus, VmId};
    use std::time::UNIX_EPOCH;

    fn run_through(state: &mut ClusterState, steps: usize) {
        for step in &SCRIPT[..steps] {
            step.run(state, UNIX_EPOCH).unwrap();
        }
    }

    #[test]
    fn test_script_timings() {
        let waits: Vec<u64> = SCRIPT.iter().map(|s| s.wait_before.as_millis() as u64).collect();

        assert_eq!(waits, [0, 5000, 9000, 9000, 8000, 9000]);
        assert_eq!(total_duration(), Duration::from_secs(40));
    }

    #[test]
    fn test_script_walks_every_phase_once() {
        let entered: Vec<_> = SCRIPT.iter().filter_map(|s| s.enters).collect();

        assert_eq!(entered, &HaPhase::ALL[1..]);
    }

    #[test]
    fn test_announce_only_narrates() {
        let mut state = ClusterState::new();
        run_through(&mut state, 1);

        assert_eq!(state.phase(), HaPhase::Healthy);
        assert_eq!(state.log().len(), 2);
        assert_eq!(state.log().entries()[0].text, INCIDENT_START);
        assert!(state.heartbeat_active());
        assert_eq!(state.inventory(), &crate::model::Inventory::canonical());
    }

    #[test]
    fn test_detect_failure_cascades_and_drops_heartbeat() {
        let mut state = ClusterState::new();
        run_through(&mut state, 2);

        assert_eq!(state.phase(), HaPhase::FailureDetected);
        assert!(!state.heartbeat_active());
        assert!(state.status().starts_with("CRITICAL ALERT!"));

        let inv = state.inventory();
        assert_eq!(inv.host_by_name("ESXi-01").unwrap().status, HostStatus::Failed);
        assert_eq!(inv.vm_by_name("AD-Server").unwrap().status, VmStatus::Failed);
        assert_eq!(inv.vm_by_name("SQL-DB").unwrap().status, VmStatus::Failed);
        assert_eq!(inv.vm_by_name("Web-App").unwrap().status, VmStatus::Running);
    }

    #[test]
    fn test_isolation_check_mutates_nothing() {
        let mut state = ClusterState::new();
        run_through(&mut state, 2);
        let inventory_before = state.inventory().clone();

        SCRIPT[2].run(&mut state, UNIX_EPOCH).unwrap();

        assert_eq!(state.phase(), HaPhase::IsolationCheck);
        assert_eq!(state.inventory(), &inventory_before);
        assert!(state.status().contains("Datastore Heartbeat"));
        assert_eq!(state.log().in_phase(HaPhase::IsolationCheck).count(), 2);
    }

    #[test]
    fn test_plan_elects_master_without_moving_vms() {
        let mut state = ClusterState::new();
        run_through(&mut state, 3);
        let vms_before = state.inventory().vms().to_vec();

        SCRIPT[3].run(&mut state, UNIX_EPOCH).unwrap();

        let inv = state.inventory();
        assert_eq!(inv.host_by_name("ESXi-02").unwrap().status, HostStatus::Master);
        assert_eq!(inv.masters().count(), 1);
        assert_eq!(inv.vms(), &vms_before[..]);

        let plan: Vec<_> = state
            .restart_plan()
            .iter()
            .map(|p| (p.vm_name.as_str(), p.target_name.as_str()))
            .collect();
        assert_eq!(plan, [("AD-Server", "ESXi-02"), ("SQL-DB", "ESXi-03")]);

        let plan_lines: Vec<_> = state
            .log()
            .entries()
            .iter()
            .filter(|e| e.speaker.as_deref() == Some("Plan"))
            .map(|e| e.text.as_str())
            .collect();
        assert_eq!(
            plan_lines,
            [
                "AD-Server (High Priority) -> ESXi-02",
                "SQL-DB (High Priority) -> ESXi-03",
            ]
        );
    }

    #[test]
    fn test_restart_boots_planned_vms() {
        let mut state = ClusterState::new();
        run_through(&mut state, 5);

        let inv = state.inventory();
        let ad = inv.vm(&VmId::from("vm1")).unwrap();
        let sql = inv.vm(&VmId::from("vm2")).unwrap();
        assert_eq!((ad.host_id.as_str(), ad.status), ("h2", VmStatus::Booting));
        assert_eq!((sql.host_id.as_str(), sql.status), ("h3", VmStatus::Booting));
        assert_eq!(state.log().in_phase(HaPhase::Restarting).count(), 2);
    }

    #[test]
    fn test_full_script_recovers() {
        let mut state = ClusterState::new();
        run_through(&mut state, SCRIPT.len());

        assert_eq!(state.phase(), HaPhase::Recovered);
        assert!(state
            .inventory()
            .vms()
            .iter()
            .all(|vm| vm.status == VmStatus::Running));
        assert_eq!(state.log().entries().last().unwrap().text, INCIDENT_END);
        assert!(state.status().starts_with("Recovery complete."));
    }

    #[test]
    fn test_replaying_a_step_is_rejected() {
        let mut state = ClusterState::new();
        run_through(&mut state, 2);

        let err = SCRIPT[1].run(&mut state, UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, EngineError::Phase(_)));
    }
}
