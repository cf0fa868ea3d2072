//! Invariant oracle for simulation runs.
//!
//! The Oracle sees every snapshot an observer sees and checks the rules the
//! engine must never break, whatever the interleaving:
//! - every VM references an existing host
//! - a failed host never holds `master`, and there is never more than one
//! - from `FAILOVER_PLAN` on exactly one master exists and it is not ESXi-01
//! - phases only move along the scripted path
//! - the log is gap-free and its phases never go backwards

use hasim_core::{ClusterSnapshot, HaPhase, HostStatus, RestartPriority, VmStatus};
use tracing::warn;

/// Host the script fails.
const FAILED_HOST_NAME: &str = "ESXi-01";

/// The Oracle - checks invariants over a stream of snapshots.
#[derive(Debug, Default)]
pub struct InvariantOracle {
    /// Phases observed, consecutive duplicates removed
    phases_seen: Vec<HaPhase>,

    /// Snapshots checked
    observations: u64,

    /// Human-readable invariant violations
    violations: Vec<String>,
}

impl InvariantOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one snapshot and records any violation.
    pub fn observe(&mut self, snapshot: &ClusterSnapshot) {
        self.observations += 1;
        if self.phases_seen.last() != Some(&snapshot.phase) {
            self.phases_seen.push(snapshot.phase);
        }

        for violation in check(snapshot) {
            warn!(phase = %snapshot.phase, "Invariant violated: {}", violation);
            self.violations.push(format!("[{}] {}", snapshot.phase, violation));
        }
    }

    /// Records a scenario-level failure next to the snapshot checks.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Scenario check failed: {}", reason);
        self.violations.push(reason);
    }

    pub fn phases_seen(&self) -> &[HaPhase] {
        &self.phases_seen
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// All invariant violations in a single snapshot.
pub fn check(snapshot: &ClusterSnapshot) -> Vec<String> {
    let mut violations = Vec::new();

    for vm in &snapshot.vms {
        if snapshot.host_name_of(vm).is_none() {
            violations.push(format!("{} references missing host {}", vm.name, vm.host_id));
        }
    }

    let masters: Vec<_> = snapshot
        .hosts
        .iter()
        .filter(|h| h.status == HostStatus::Master)
        .collect();
    if masters.len() > 1 {
        violations.push(format!("{} hosts hold master", masters.len()));
    }
    if snapshot.phase >= HaPhase::FailoverPlan {
        if masters.len() != 1 {
            violations.push(format!("expected one master, found {}", masters.len()));
        }
        if masters.iter().any(|h| h.name == FAILED_HOST_NAME) {
            violations.push(format!("{} regained master", FAILED_HOST_NAME));
        }
    }

    for vm in snapshot.vms.iter().filter(|vm| vm.status == VmStatus::Failed) {
        let host_failed = snapshot
            .hosts
            .iter()
            .any(|h| h.id == vm.host_id && h.status == HostStatus::Failed);
        if !host_failed {
            violations.push(format!("{} failed on a healthy host", vm.name));
        }
    }

    if snapshot.phase >= HaPhase::FailureDetected && snapshot.heartbeat_active {
        violations.push("heartbeat still active after failure".to_string());
    }
    if snapshot.phase == HaPhase::Healthy && !snapshot.heartbeat_active {
        violations.push("heartbeat lost while healthy".to_string());
    }

    if snapshot.phase == HaPhase::Restarting {
        let booting: Vec<_> = snapshot
            .vms
            .iter()
            .filter(|vm| vm.status == VmStatus::Booting)
            .collect();
        let all_high = booting.iter().all(|vm| vm.priority == RestartPriority::High);
        if booting.len() != 2 || !all_high {
            violations.push(format!(
                "expected the two High-priority VMs booting, found {:?}",
                booting.iter().map(|vm| vm.name.as_str()).collect::<Vec<_>>()
            ));
        }
    }

    let expected_path = &HaPhase::ALL[..snapshot.phase_history.len().min(HaPhase::ALL.len())];
    if snapshot.phase_history != expected_path || snapshot.phase_history.last() != Some(&snapshot.phase) {
        violations.push(format!("phase path {:?} left the script", snapshot.phase_history));
    }

    for (i, entry) in snapshot.log.iter().enumerate() {
        if entry.seq != i as u64 {
            violations.push(format!("log gap at position {} (seq {})", i, entry.seq));
            break;
        }
    }
    if snapshot.log.windows(2).any(|w| w[0].phase > w[1].phase) {
        violations.push("log phases out of causal order".to_string());
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasim_core::HostId;

    #[test]
    fn test_canonical_snapshot_is_clean() {
        assert!(check(&ClusterSnapshot::canonical()).is_empty());
    }

    #[test]
    fn test_detects_two_masters() {
        let mut snapshot = ClusterSnapshot::canonical();
        snapshot.hosts[1].status = HostStatus::Master;

        let violations = check(&snapshot);
        assert_eq!(violations, vec!["2 hosts hold master".to_string()]);
    }

    #[test]
    fn test_detects_orphan_vm() {
        let mut snapshot = ClusterSnapshot::canonical();
        snapshot.vms[0].host_id = HostId::from("h9");

        assert!(check(&snapshot)[0].contains("missing host h9"));
    }

    #[test]
    fn test_detects_skipped_phase() {
        let mut snapshot = ClusterSnapshot::canonical();
        snapshot.phase = HaPhase::IsolationCheck;
        snapshot.phase_history = vec![HaPhase::Healthy, HaPhase::IsolationCheck];
        snapshot.heartbeat_active = false;

        let violations = check(&snapshot);
        assert!(violations.iter().any(|v| v.contains("left the script")));
    }

    #[test]
    fn test_oracle_tracks_phases_and_failures() {
        let mut oracle = InvariantOracle::new();
        let snapshot = ClusterSnapshot::canonical();
        oracle.observe(&snapshot);
        oracle.observe(&snapshot);

        assert_eq!(oracle.phases_seen(), &[HaPhase::Healthy]);
        assert_eq!(oracle.observations(), 2);
        assert!(oracle.passed());

        oracle.fail("trigger accepted twice");
        assert!(!oracle.passed());
    }
}
