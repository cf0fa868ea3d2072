//! HA phases and the linear phase machine.
//!
//! The incident is a script, not a general automaton: every phase has exactly
//! one successor and `Recovered` has none. Only a reset goes back.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PhaseError;

/// The HA state of the cluster during an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaPhase {
    /// All hosts heartbeating, no incident
    Healthy,
    /// Network heartbeat from a host was lost
    FailureDetected,
    /// Master is checking the datastore heartbeat of the silent host
    IsolationCheck,
    /// New master elected, restart placements computed
    FailoverPlan,
    /// Affected VMs are powering on elsewhere
    Restarting,
    /// Protected VMs are back online
    Recovered,
}

impl HaPhase {
    /// Phases in script order.
    pub const ALL: [HaPhase; 6] = [
        HaPhase::Healthy,
        HaPhase::FailureDetected,
        HaPhase::IsolationCheck,
        HaPhase::FailoverPlan,
        HaPhase::Restarting,
        HaPhase::Recovered,
    ];

    /// The only legal next phase, `None` for the terminal phase.
    pub fn next(&self) -> Option<HaPhase> {
        match self {
            HaPhase::Healthy => Some(HaPhase::FailureDetected),
            HaPhase::FailureDetected => Some(HaPhase::IsolationCheck),
            HaPhase::IsolationCheck => Some(HaPhase::FailoverPlan),
            HaPhase::FailoverPlan => Some(HaPhase::Restarting),
            HaPhase::Restarting => Some(HaPhase::Recovered),
            HaPhase::Recovered => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HaPhase::Healthy => "HEALTHY",
            HaPhase::FailureDetected => "FAILURE_DETECTED",
            HaPhase::IsolationCheck => "ISOLATION_CHECK",
            HaPhase::FailoverPlan => "FAILOVER_PLAN",
            HaPhase::Restarting => "RESTARTING",
            HaPhase::Recovered => "RECOVERED",
        }
    }

    /// Short banner for the status panel.
    pub fn headline(&self) -> &'static str {
        match self {
            HaPhase::Healthy => "Cluster Healthy",
            HaPhase::FailureDetected => "Failure Detected",
            HaPhase::IsolationCheck => "Checking Datastores",
            HaPhase::FailoverPlan => "Planning Failover",
            HaPhase::Restarting => "Restarting VMs",
            HaPhase::Recovered => "Recovery Complete",
        }
    }
}

impl fmt::Display for HaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current phase plus the phases entered since the last reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMachine {
    current: HaPhase,
    history: Vec<HaPhase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: HaPhase::Healthy,
            history: vec![HaPhase::Healthy],
        }
    }

    pub fn current(&self) -> HaPhase {
        self.current
    }

    pub fn history(&self) -> &[HaPhase] {
        &self.history
    }

    /// Moves to `to`, which must be the successor of the current phase.
    pub fn advance(&mut self, to: HaPhase) -> Result<(), PhaseError> {
        if self.current.next() != Some(to) {
            return Err(PhaseError::IllegalTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_path() {
        let mut machine = PhaseMachine::new();
        for phase in &HaPhase::ALL[1..] {
            machine.advance(*phase).unwrap();
        }

        assert_eq!(machine.current(), HaPhase::Recovered);
        assert_eq!(machine.history(), &HaPhase::ALL);
        assert_eq!(machine.current().next(), None);
    }

    #[test]
    fn test_skip_is_rejected() {
        let mut machine = PhaseMachine::new();
        let err = machine.advance(HaPhase::IsolationCheck).unwrap_err();

        assert_eq!(
            err,
            PhaseError::IllegalTransition {
                from: HaPhase::Healthy,
                to: HaPhase::IsolationCheck,
            }
        );
        assert_eq!(machine.current(), HaPhase::Healthy);
        assert_eq!(machine.history(), &[HaPhase::Healthy]);
    }

    #[test]
    fn test_no_back_edges() {
        let mut machine = PhaseMachine::new();
        machine.advance(HaPhase::FailureDetected).unwrap();

        assert!(machine.advance(HaPhase::Healthy).is_err());
        assert!(machine.advance(HaPhase::FailureDetected).is_err());
    }

    #[test]
    fn test_terminal_phase_stays_until_reset() {
        let mut machine = PhaseMachine::new();
        for phase in &HaPhase::ALL[1..] {
            machine.advance(*phase).unwrap();
        }
        assert!(machine.advance(HaPhase::Healthy).is_err());

        machine.reset();
        assert_eq!(machine, PhaseMachine::new());
    }

    #[test]
    fn test_phase_names_round_trip_through_serde() {
        let json = serde_json::to_string(&HaPhase::FailoverPlan).unwrap();
        assert_eq!(json, "\"FAILOVER_PLAN\"");
        assert_eq!(HaPhase::FailoverPlan.to_string(), "FAILOVER_PLAN");
    }
}
