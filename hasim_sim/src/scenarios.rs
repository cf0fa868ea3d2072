//! Scripted scenarios the harness can play against the engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// HA-001: Trigger once and let the script reach RECOVERED
    FullIncident,

    /// HA-002: Reset while a step is pending, then outwait the script
    ResetMidRun,

    /// HA-003: Trigger again while the first incident is in flight
    DoubleTrigger,

    /// HA-004: Recover, reset, and run a second incident
    ResetAfterRecovery,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::FullIncident,
            ScenarioId::ResetMidRun,
            ScenarioId::DoubleTrigger,
            ScenarioId::ResetAfterRecovery,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::FullIncident => "full_incident",
            ScenarioId::ResetMidRun => "reset_mid_run",
            ScenarioId::DoubleTrigger => "double_trigger",
            ScenarioId::ResetAfterRecovery => "reset_after_recovery",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::FullIncident => "ESXi-01 power loss through recovery on ESXi-02/03",
            ScenarioId::ResetMidRun => "Reset during ISOLATION_CHECK, no stale step may land",
            ScenarioId::DoubleTrigger => "Second trigger during a run is ignored",
            ScenarioId::ResetAfterRecovery => "Reset after RECOVERED allows a fresh incident",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full_incident" | "fullincident" | "ha-001" => Ok(ScenarioId::FullIncident),
            "reset_mid_run" | "resetmidrun" | "ha-002" => Ok(ScenarioId::ResetMidRun),
            "double_trigger" | "doubletrigger" | "ha-003" => Ok(ScenarioId::DoubleTrigger),
            "reset_after_recovery" | "resetafterrecovery" | "ha-004" => {
                Ok(ScenarioId::ResetAfterRecovery)
            }
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
