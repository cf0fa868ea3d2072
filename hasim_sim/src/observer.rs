//! Console observer - follows engine snapshots the way a renderer would.
//!
//! The recorder only reads. Each snapshot it sees is checked by the oracle,
//! optionally turned into an export frame, and optionally echoed to the
//! console (phase banner, status line, new narration).

use hasim_core::{ClusterSnapshot, HaPhase};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::InvariantOracle;

/// Reads snapshots and feeds the oracle, exporter and console.
pub struct Recorder {
    pub oracle: InvariantOracle,

    export: Option<SimExport>,

    /// Print phase, status and narration as they change
    echo: bool,

    last_phase: Option<HaPhase>,
    last_status: String,
    /// Next log sequence number not yet echoed/exported
    next_seq: u64,
}

impl Recorder {
    pub fn new(echo: bool) -> Self {
        Self {
            oracle: InvariantOracle::new(),
            export: None,
            echo,
            last_phase: None,
            last_status: String::new(),
            next_seq: 0,
        }
    }

    /// Also collects export frames.
    pub fn with_export(mut self, export: SimExport) -> Self {
        self.export = Some(export);
        self
    }

    /// Handles one snapshot observed at clock time `now`.
    pub fn record(&mut self, now: Duration, snapshot: &ClusterSnapshot) {
        self.oracle.observe(snapshot);

        // A reset clears the log; start numbering from the top again.
        if snapshot.log.len() < self.next_seq as usize {
            self.next_seq = 0;
        }

        if let Some(export) = self.export.as_mut() {
            export.add_frame(SimFrame::from_snapshot(
                now.as_millis() as u64,
                snapshot,
                self.next_seq,
            ));
        }

        if self.echo {
            if self.last_phase != Some(snapshot.phase) {
                info!("━━ {} ({}) ━━", snapshot.phase.headline(), snapshot.phase);
            }
            if self.last_status != snapshot.status {
                info!("   {}", snapshot.status);
            }
            for entry in snapshot.log.iter().filter(|e| e.seq >= self.next_seq) {
                info!("   {}", entry);
            }
        }

        self.last_phase = Some(snapshot.phase);
        self.last_status = snapshot.status.clone();
        self.next_seq = snapshot.log.len() as u64;
    }

    /// Records snapshots from `updates` until `done` holds for one of them.
    ///
    /// The current value is recorded first, so a condition that already holds
    /// returns immediately. Returns the snapshot that satisfied `done`, or
    /// `None` if the engine went away.
    pub async fn follow<F>(
        &mut self,
        updates: &mut watch::Receiver<ClusterSnapshot>,
        clock: impl Fn() -> Duration,
        done: F,
    ) -> Option<ClusterSnapshot>
    where
        F: Fn(&ClusterSnapshot) -> bool,
    {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            self.record(clock(), &snapshot);
            if done(&snapshot) {
                return Some(snapshot);
            }
            if updates.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Takes the collected export, if any.
    pub fn take_export(&mut self) -> Option<SimExport> {
        self.export.take()
    }
}
