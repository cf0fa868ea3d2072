//! Scenario runner - plays scripted incidents and checks the outcome.

use crate::config::{ClockMode, SimConfig};
use crate::context::SimContext;
use crate::error::SimError;
use crate::exporter::SimExport;
use crate::observer::Recorder;
use crate::scenarios::ScenarioId;

use hasim_core::script::{total_duration, INCIDENT_START};
use hasim_core::{ClusterSnapshot, HaEngine, HaPhase, HostStatus, VmStatus};
use hasim_env::{HaContext, TokioContext};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Clock used
    pub clock: ClockMode,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Phase the engine ended in
    pub final_phase: HaPhase,

    /// Phases observed, consecutive duplicates removed
    pub phases_seen: Vec<HaPhase>,

    /// Narration entries at the end
    pub log_entries: usize,

    /// Snapshots checked by the oracle
    pub observations: u64,

    /// Clock time when the scenario finished
    pub elapsed_ms: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

/// Runs HA scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
}

fn run_over(snapshot: &ClusterSnapshot) -> bool {
    !snapshot.incident_running
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Runs a scenario on a fresh engine and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} ({} clock)", scenario.name(), self.config.clock);

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return self.aborted(scenario, SimError::from(e)),
        };

        match self.config.clock {
            ClockMode::Virtual => runtime.block_on(self.run_on(SimContext::shared(), scenario)),
            ClockMode::Realtime => runtime.block_on(self.run_on(TokioContext::shared(), scenario)),
        }
    }

    fn aborted(&self, scenario: ScenarioId, e: SimError) -> ScenarioResult {
        error!("Scenario {} could not start: {}", scenario, e);
        ScenarioResult {
            scenario,
            clock: self.config.clock,
            passed: false,
            final_phase: HaPhase::Healthy,
            phases_seen: Vec::new(),
            log_entries: 0,
            observations: 0,
            elapsed_ms: 0,
            failure_reason: Some(e.to_string()),
        }
    }

    async fn run_on<Ctx: HaContext>(&self, ctx: Arc<Ctx>, scenario: ScenarioId) -> ScenarioResult {
        let engine = HaEngine::new(ctx.clone());
        let mut recorder = Recorder::new(self.config.echo);
        if self.config.export_path.is_some() {
            recorder = recorder.with_export(SimExport::new(scenario.name(), self.config.clock.name()));
        }

        let outcome = match scenario {
            ScenarioId::FullIncident => self.run_full_incident(&engine, &mut recorder).await,
            ScenarioId::ResetMidRun => self.run_reset_mid_run(&engine, &mut recorder).await,
            ScenarioId::DoubleTrigger => self.run_double_trigger(&engine, &mut recorder).await,
            ScenarioId::ResetAfterRecovery => {
                self.run_reset_after_recovery(&engine, &mut recorder).await
            }
        };
        if let Err(e) = outcome {
            recorder.oracle.fail(e.to_string());
        }

        let final_snapshot = engine.snapshot();
        let passed = recorder.oracle.passed();

        if let (Some(path), Some(mut export)) = (&self.config.export_path, recorder.take_export()) {
            export.finalize(passed, recorder.oracle.violations());
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path.display()),
                Err(e) => error!("Failed to write export: {}", e),
            }
        }

        ScenarioResult {
            scenario,
            clock: self.config.clock,
            passed,
            final_phase: final_snapshot.phase,
            phases_seen: recorder.oracle.phases_seen().to_vec(),
            log_entries: final_snapshot.log.len(),
            observations: recorder.oracle.observations(),
            elapsed_ms: ctx.now().as_millis() as u64,
            failure_reason: if passed {
                None
            } else {
                Some(recorder.oracle.violations().join("; "))
            },
        }
    }

    /// HA-001: trigger once, follow the incident to the end.
    async fn run_full_incident<Ctx: HaContext>(
        &self,
        engine: &HaEngine<Ctx>,
        recorder: &mut Recorder,
    ) -> Result<(), SimError> {
        info!("HA-001: FullIncident - ESXi-01 power loss");

        let ctx = engine.context().clone();
        let mut updates = engine.subscribe();

        if !engine.trigger().is_started() {
            recorder.oracle.fail("trigger on a healthy cluster was ignored");
            return Ok(());
        }
        match recorder.follow(&mut updates, || ctx.now(), run_over).await {
            Some(snapshot) => verify_recovered(&snapshot, recorder),
            None => recorder.oracle.fail("engine dropped its update channel"),
        }
        Ok(())
    }

    /// HA-002: reset while ISOLATION_CHECK waits, then outwait the script.
    async fn run_reset_mid_run<Ctx: HaContext>(
        &self,
        engine: &HaEngine<Ctx>,
        recorder: &mut Recorder,
    ) -> Result<(), SimError> {
        info!("HA-002: ResetMidRun - cancel a pending step");

        let ctx = engine.context().clone();
        let mut updates = engine.subscribe();

        engine.trigger();
        let reached = recorder
            .follow(&mut updates, || ctx.now(), |s| {
                s.phase >= HaPhase::IsolationCheck || run_over(s)
            })
            .await;
        if let Some(snapshot) = reached {
            info!(phase = %snapshot.phase, "Resetting mid-run");
        }

        engine.reset();
        let after_reset = engine.snapshot();
        recorder.record(ctx.now(), &after_reset);
        if after_reset != ClusterSnapshot::canonical() {
            recorder.oracle.fail("reset did not restore the canonical snapshot");
        }

        // Give the cancelled run every chance to fire a stale step.
        ctx.sleep(total_duration()).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        let settled = engine.snapshot();
        recorder.record(ctx.now(), &settled);
        if settled != ClusterSnapshot::canonical() {
            recorder.oracle.fail(format!(
                "stale step mutated state after reset (phase {})",
                settled.phase
            ));
        }
        Ok(())
    }

    /// HA-003: a second trigger during the run must be ignored.
    async fn run_double_trigger<Ctx: HaContext>(
        &self,
        engine: &HaEngine<Ctx>,
        recorder: &mut Recorder,
    ) -> Result<(), SimError> {
        info!("HA-003: DoubleTrigger - one incident at a time");

        let ctx = engine.context().clone();
        let mut updates = engine.subscribe();

        engine.trigger();
        let early = engine.trigger();
        debug!(?early, "Second trigger during opening delay");
        if early.is_started() {
            recorder.oracle.fail("second trigger during the opening delay was accepted");
        }

        recorder
            .follow(&mut updates, || ctx.now(), |s| {
                s.phase >= HaPhase::FailureDetected || run_over(s)
            })
            .await;
        if engine.trigger().is_started() {
            recorder.oracle.fail("trigger during the incident was accepted");
        }

        match recorder.follow(&mut updates, || ctx.now(), run_over).await {
            Some(snapshot) => {
                let starts = snapshot.log.iter().filter(|e| e.text == INCIDENT_START).count();
                if starts != 1 {
                    recorder.oracle.fail(format!("{} incidents narrated", starts));
                }
                verify_recovered(&snapshot, recorder);
            }
            None => recorder.oracle.fail("engine dropped its update channel"),
        }
        Ok(())
    }

    /// HA-004: recover, reset, and recover again.
    async fn run_reset_after_recovery<Ctx: HaContext>(
        &self,
        engine: &HaEngine<Ctx>,
        recorder: &mut Recorder,
    ) -> Result<(), SimError> {
        info!("HA-004: ResetAfterRecovery - the lab can be replayed");

        let outcome = engine.run_incident().await?;
        debug!(?outcome, "First incident finished");
        verify_recovered(&engine.snapshot(), recorder);

        if engine.trigger().is_started() {
            recorder.oracle.fail("trigger after RECOVERED was accepted without reset");
        }

        engine.reset();
        let ctx = engine.context().clone();
        let after_reset = engine.snapshot();
        recorder.record(ctx.now(), &after_reset);
        if after_reset != ClusterSnapshot::canonical() {
            recorder.oracle.fail("reset after recovery did not restore the canonical snapshot");
        }

        let mut updates = engine.subscribe();
        if !engine.trigger().is_started() {
            recorder.oracle.fail("trigger after reset was ignored");
            return Ok(());
        }
        match recorder.follow(&mut updates, || ctx.now(), run_over).await {
            Some(snapshot) => verify_recovered(&snapshot, recorder),
            None => recorder.oracle.fail("engine dropped its update channel"),
        }
        Ok(())
    }
}

/// Checks the end state of a completed incident.
fn verify_recovered(snapshot: &ClusterSnapshot, recorder: &mut Recorder) {
    let oracle = &mut recorder.oracle;

    if snapshot.phase_history != HaPhase::ALL {
        oracle.fail(format!("phase history {:?}", snapshot.phase_history));
    }

    let host_status = |name: &str| snapshot.host_by_name(name).map(|h| h.status);
    if host_status("ESXi-01") != Some(HostStatus::Failed) {
        oracle.fail("ESXi-01 is not failed");
    }
    if host_status("ESXi-02") != Some(HostStatus::Master) {
        oracle.fail("ESXi-02 is not master");
    }

    for (vm_name, host_name) in [("AD-Server", "ESXi-02"), ("SQL-DB", "ESXi-03")] {
        let placed = snapshot
            .vm_by_name(vm_name)
            .map(|vm| (snapshot.host_name_of(vm), vm.status));
        if placed != Some((Some(host_name), VmStatus::Running)) {
            oracle.fail(format!("{} not running on {}: {:?}", vm_name, host_name, placed));
        }
    }

    let mut narrated: Vec<HaPhase> = snapshot.log.iter().map(|e| e.phase).collect();
    narrated.dedup();
    if narrated != HaPhase::ALL {
        oracle.fail(format!("narrated phases {:?}", narrated));
    }
}
