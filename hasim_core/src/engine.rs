//! HA Engine - runs the failover script against the cluster state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         HaEngine                             │
//! │  ┌───────────────────────────────┐   ┌────────────────────┐  │
//! │  │ Mutex<Inner>                  │   │ watch::Sender      │  │
//! │  │  • ClusterState (phase, VMs,  │──►│  ClusterSnapshot   │──► observers
//! │  │    hosts, log, status)        │   └────────────────────┘  │
//! │  │  • run slot (id + cancel)     │                           │
//! │  └───────────────────────────────┘                           │
//! │                 ▲                                            │
//! │                 │ one step per resumption                    │
//! │  ┌──────────────┴────────────────┐                           │
//! │  │ sequencer task (ctx.spawn)    │  select! { cancelled,     │
//! │  │  SCRIPT[1..]                  │            ctx.sleep }    │
//! │  └───────────────────────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the sequencer writes cluster state, and only after resuming from a
//! suspension. The lock is never held across an `.await`. `reset()` cancels
//! the run token before restoring the canonical snapshot, and each step
//! re-checks its token under the lock, so a resumption that lost the race
//! against a reset cannot touch the restored state.
//!
//! # Usage
//!
//! ```ignore
//! use hasim_core::HaEngine;
//! use hasim_env::TokioContext;
//!
//! let engine = HaEngine::new(TokioContext::shared());
//! let mut updates = engine.subscribe();
//!
//! engine.trigger();
//! while updates.changed().await.is_ok() {
//!     render(&updates.borrow_and_update());
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hasim_env::HaContext;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::event_log::LogEntry;
use crate::model::{Host, VirtualMachine};
use crate::phase::HaPhase;
use crate::script::{Step, SCRIPT};
use crate::state::{ClusterSnapshot, ClusterState};

/// Result of asking the engine to start an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The script is running
    Started,
    /// Another incident is in flight or the cluster is not healthy
    Ignored { phase: HaPhase },
}

impl TriggerOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, TriggerOutcome::Started)
    }
}

/// How an inline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached `RECOVERED`
    Completed,
    /// A reset cancelled the run
    Cancelled,
    /// The trigger was rejected; nothing ran
    Ignored { phase: HaPhase },
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Releases the run slot when the run that claimed it ends, however it ends.
///
/// A dropped `run_incident()` future or an aborted sequencer task would
/// otherwise leave the slot claimed and every later trigger ignored.
struct RunGuard {
    shared: Arc<Shared>,
    run_id: u64,
    cancel: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.run.as_ref().map(|r| r.id) == Some(self.run_id) {
            inner.run = None;
            self.cancel.cancel();
            self.shared.publish(&inner);
            debug!(run_id = self.run_id, phase = %inner.state.phase(), "Run slot released");
        }
    }
}

struct Inner {
    state: ClusterState,
    run: Option<ActiveRun>,
    next_run_id: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<ClusterSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.updates
            .send_replace(inner.state.snapshot(inner.run.is_some()));
    }
}

/// The failover simulation engine.
///
/// Generic over the context so the same script runs on the real clock
/// (`TokioContext`) or a virtual one. Cloning yields another handle to the
/// same engine.
pub struct HaEngine<Ctx: HaContext> {
    ctx: Arc<Ctx>,
    shared: Arc<Shared>,
}

impl<Ctx: HaContext> Clone for HaEngine<Ctx> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<Ctx: HaContext> HaEngine<Ctx> {
    /// Creates an engine holding the canonical snapshot.
    pub fn new(ctx: Arc<Ctx>) -> Self {
        let (updates, _) = watch::channel(ClusterSnapshot::canonical());
        Self {
            ctx,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: ClusterState::new(),
                    run: None,
                    next_run_id: 0,
                }),
                updates,
            }),
        }
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }

    // =========================================================================
    // CONTROL
    // =========================================================================

    /// Starts the incident in a background task.
    ///
    /// The announcement lines are written before this returns; every later
    /// step follows its scripted delay. Ignored unless the cluster is
    /// `HEALTHY` and no run is in flight.
    pub fn trigger(&self) -> TriggerOutcome {
        let guard = match self.begin_run() {
            Ok(guard) => guard,
            Err(phase) => return TriggerOutcome::Ignored { phase },
        };

        let engine = self.clone();
        self.ctx.spawn("ha-sequencer", async move {
            let run_id = guard.run_id;
            if let Err(e) = engine.drive(guard).await {
                error!(run_id, "Failover script aborted: {}", e);
            }
        });
        TriggerOutcome::Started
    }

    /// Starts the incident and drives it on the calling task.
    ///
    /// Returns once the script reaches `RECOVERED` or a reset cancels it.
    /// Dropping the future early releases the run slot; state written so
    /// far stays until the next reset.
    pub async fn run_incident(&self) -> Result<RunOutcome, EngineError> {
        match self.begin_run() {
            Ok(guard) => {
                let run_id = guard.run_id;
                let outcome = self.drive(guard).await;
                if let Err(e) = &outcome {
                    error!(run_id, "Failover script aborted: {}", e);
                }
                outcome
            }
            Err(phase) => Ok(RunOutcome::Ignored { phase }),
        }
    }

    /// Cancels any in-flight run and restores the canonical snapshot.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        if let Some(run) = inner.run.take() {
            run.cancel.cancel();
            info!(run_id = run.id, phase = %inner.state.phase(), "Cancelled in-flight incident");
        }
        inner.state.reset();
        self.shared.publish(&inner);
        info!("Cluster reset to canonical snapshot");
    }

    // =========================================================================
    // SEQUENCER
    // =========================================================================

    /// Claims the run slot and plays the zero-delay opening step.
    fn begin_run(&self) -> Result<RunGuard, HaPhase> {
        let mut inner = self.shared.lock();
        let phase = inner.state.phase();

        if inner.run.is_some() || phase != HaPhase::Healthy {
            warn!(phase = %phase, running = inner.run.is_some(), "Trigger ignored: incident already in progress");
            return Err(phase);
        }

        let run_id = inner.next_run_id;
        inner.next_run_id += 1;
        let cancel = CancellationToken::new();
        inner.run = Some(ActiveRun {
            id: run_id,
            cancel: cancel.clone(),
        });
        info!(run_id, "Incident triggered");

        let at = self.ctx.system_time();
        let opening = SCRIPT
            .iter()
            .take_while(|step| step.wait_before.is_zero());
        for step in opening {
            if let Err(e) = step.run(&mut inner.state, at) {
                // Nothing else will release the slot for this run.
                inner.run = None;
                self.shared.publish(&inner);
                error!(run_id, step = step.name, "Failover script aborted: {}", e);
                return Err(inner.state.phase());
            }
        }
        self.shared.publish(&inner);

        Ok(RunGuard {
            shared: Arc::clone(&self.shared),
            run_id,
            cancel,
        })
    }

    /// Plays the delayed steps. The guard releases the slot on every exit.
    async fn drive(&self, guard: RunGuard) -> Result<RunOutcome, EngineError> {
        let run_id = guard.run_id;
        let cancel = guard.cancel.clone();
        let pending = SCRIPT.iter().skip_while(|step| step.wait_before.is_zero());

        for step in pending {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(run_id, step = step.name, "Pending step cancelled");
                    return Ok(RunOutcome::Cancelled);
                }
                _ = self.ctx.sleep(step.wait_before) => {}
            }

            if !self.apply_step(run_id, &cancel, step)? {
                return Ok(RunOutcome::Cancelled);
            }
        }

        drop(guard);
        info!(run_id, elapsed_ms = self.ctx.now().as_millis() as u64, "Incident recovered");
        Ok(RunOutcome::Completed)
    }

    /// Applies one step unless the run was cancelled. Returns false when
    /// the step was dropped.
    fn apply_step(
        &self,
        run_id: u64,
        cancel: &CancellationToken,
        step: &Step,
    ) -> Result<bool, EngineError> {
        let mut inner = self.shared.lock();
        if cancel.is_cancelled() {
            debug!(run_id, step = step.name, "Dropped stale resumption after reset");
            return Ok(false);
        }

        // On error the run's guard releases the slot and publishes.
        step.run(&mut inner.state, self.ctx.system_time())?;

        if let Some(phase) = step.enters {
            info!(run_id, phase = %phase, "{}", phase.headline());
        }
        self.shared.publish(&inner);
        Ok(true)
    }

    // =========================================================================
    // READ ACCESS
    // =========================================================================

    pub fn phase(&self) -> HaPhase {
        self.shared.lock().state.phase()
    }

    /// Phases entered since the last reset, in order.
    pub fn phase_history(&self) -> Vec<HaPhase> {
        self.shared.lock().state.machine.history().to_vec()
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.shared.lock().state.inventory().hosts().to_vec()
    }

    pub fn vms(&self) -> Vec<VirtualMachine> {
        self.shared.lock().state.inventory().vms().to_vec()
    }

    /// Narration, oldest-first.
    pub fn log(&self) -> Vec<LogEntry> {
        self.shared.lock().state.log().entries().to_vec()
    }

    pub fn status_message(&self) -> String {
        self.shared.lock().state.status().to_string()
    }

    pub fn heartbeat_active(&self) -> bool {
        self.shared.lock().state.heartbeat_active()
    }

    /// True while a sequencer run holds the run slot.
    pub fn is_running(&self) -> bool {
        self.shared.lock().run.is_some()
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.shared.lock();
        inner.state.snapshot(inner.run.is_some())
    }

    /// Receiver that sees a fresh snapshot after every mutation.
    ///
    /// Do not hold a `borrow()` of the receiver while calling back into the
    /// engine.
    pub fn subscribe(&self) -> watch::Receiver<ClusterSnapshot> {
        self.shared.updates.subscribe()
    }
}
