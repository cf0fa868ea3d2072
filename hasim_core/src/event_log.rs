//! Narration log (the `fdm.log` feed).
//!
//! Entries are stored oldest-first in causal order. The renderer shows the
//! newest line on top, so the reversed views live here too and nothing
//! downstream has to re-sort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::phase::HaPhase;

/// One narrated line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Creation order, starting at 0 after every reset
    pub seq: u64,
    pub at: DateTime<Utc>,
    /// Phase active when the line was emitted
    pub phase: HaPhase,
    /// Component narrating (`Monitor`, `FDM Master`, ...); `None` for markers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub text: String,
}

impl LogEntry {
    /// Stamp as shown in the log panel (`HH:MM:SS`, UTC so virtual-clock
    /// runs narrate identically on every machine).
    pub fn stamp(&self) -> String {
        self.at.format("%H:%M:%S").to_string()
    }

    /// Speaker and text without the stamp.
    pub fn message(&self) -> String {
        match &self.speaker {
            Some(speaker) => format!("{}: {}", speaker, self.text),
            None => self.text.clone(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stamp(), self.message())
    }
}

/// Append-only narration feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(
        &mut self,
        at: SystemTime,
        phase: HaPhase,
        speaker: Option<&str>,
        text: impl Into<String>,
    ) -> &LogEntry {
        let entry = LogEntry {
            seq: self.entries.len() as u64,
            at: DateTime::<Utc>::from(at),
            phase,
            speaker: speaker.map(str::to_string),
            text: text.into(),
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in creation order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries newest-first, the way the log panel lists them.
    pub fn newest_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    /// Formatted lines, newest-first.
    pub fn display_lines(&self) -> Vec<String> {
        self.newest_first().map(LogEntry::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries emitted while `phase` was active.
    pub fn in_phase(&self, phase: HaPhase) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.phase == phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1704067200 + secs)
    }

    #[test]
    fn test_append_keeps_causal_order() {
        let mut log = EventLog::new();
        log.append(t(0), HaPhase::Healthy, None, "--- INCIDENT START ---");
        log.append(t(5), HaPhase::FailureDetected, Some("FDM Master"), "heartbeat lost");

        let seqs: Vec<_> = log.entries().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, [0, 1]);
        assert_eq!(log.entries()[0].text, "--- INCIDENT START ---");
    }

    #[test]
    fn test_newest_first_reverses_presentation_only() {
        let mut log = EventLog::new();
        log.append(t(0), HaPhase::Healthy, Some("Monitor"), "first");
        log.append(t(1), HaPhase::Healthy, Some("Monitor"), "second");

        let shown: Vec<_> = log.newest_first().map(|e| e.text.as_str()).collect();
        assert_eq!(shown, ["second", "first"]);
        assert_eq!(log.entries()[0].text, "first");
    }

    #[test]
    fn test_display_format() {
        let mut log = EventLog::new();
        let entry = log
            .append(t(0), HaPhase::Healthy, Some("Monitor"), "ESXi-01 stopped answering ping.")
            .clone();

        let line = entry.to_string();
        assert_eq!(line, "[00:00:00] Monitor: ESXi-01 stopped answering ping.");
        assert_eq!(log.display_lines(), vec![line]);
    }

    #[test]
    fn test_marker_has_no_speaker() {
        let mut log = EventLog::new();
        let entry = log.append(t(0), HaPhase::Recovered, None, "--- INCIDENT END ---");

        assert_eq!(entry.message(), "--- INCIDENT END ---");
    }

    #[test]
    fn test_clear_restarts_sequence() {
        let mut log = EventLog::new();
        log.append(t(0), HaPhase::Healthy, None, "a");
        log.append(t(1), HaPhase::Healthy, None, "b");
        log.clear();
        assert!(log.is_empty());

        let entry = log.append(t(2), HaPhase::Healthy, None, "c");
        assert_eq!(entry.seq, 0);
    }

    #[test]
    fn test_in_phase_filter() {
        let mut log = EventLog::new();
        log.append(t(0), HaPhase::Healthy, None, "a");
        log.append(t(5), HaPhase::FailureDetected, None, "b");
        log.append(t(6), HaPhase::FailureDetected, None, "c");

        assert_eq!(log.in_phase(HaPhase::FailureDetected).count(), 2);
        assert_eq!(log.in_phase(HaPhase::Recovered).count(), 0);
    }
}
