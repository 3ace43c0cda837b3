//! Sequence State Management and Phase Tracking
//!
//! - `Phase`: the nine ordinal phases of a staging run
//! - `SequenceState`: current phase, completed phases, counters and the values
//!   handed from one phase to the next (token, download URL)
//!
//! Transitions are strictly linear: phase N may only be entered once phases
//! 1..N-1 have completed in order, and no phase is ever entered twice.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Phases of a staging run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Phase 1: reboot and reconnect
    Reset,
    /// Phase 2: scan the device log for the identity token
    IdentityExtraction,
    /// Phase 3: exchange the token for a download URL
    Authorization,
    /// Phase 4: download the payload to a staging file
    Acquisition,
    /// Phase 5: remove the artifact paths
    Sanitation,
    /// Phase 6: push the payload and drop the staging file
    Injection,
    /// Phase 7: reboot so the device picks the payload up
    ApplicationReboot,
    /// Phase 8: wait for the metadata marker (non-fatal)
    Verification,
    /// Phase 9: wait for the trigger marker, then clean up
    TriggerWait,
}

impl Phase {
    pub const SEQUENCE: [Phase; 9] = [
        Phase::Reset,
        Phase::IdentityExtraction,
        Phase::Authorization,
        Phase::Acquisition,
        Phase::Sanitation,
        Phase::Injection,
        Phase::ApplicationReboot,
        Phase::Verification,
        Phase::TriggerWait,
    ];

    /// 1-based position in the sequence.
    pub fn ordinal(&self) -> usize {
        *self as usize + 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Reset => "Initial Reset",
            Phase::IdentityExtraction => "Identity Token Extraction",
            Phase::Authorization => "Server Authorization",
            Phase::Acquisition => "Payload Acquisition",
            Phase::Sanitation => "Artifact Sanitation",
            Phase::Injection => "Payload Injection",
            Phase::ApplicationReboot => "Application Reboot",
            Phase::Verification => "Metadata Verification",
            Phase::TriggerWait => "Trigger Monitor",
        }
    }

    /// Banner text, e.g. `Phase 1: Initial Reset`
    pub fn title(&self) -> String {
        format!("Phase {}: {}", self.ordinal(), self.as_str())
    }

    pub fn next(&self) -> Option<Phase> {
        Phase::SEQUENCE.get(self.ordinal()).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a run currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceStatus {
    Running,
    /// All phases done and the trigger marker was seen
    Succeeded,
    /// All phases ran but the trigger marker never appeared
    TriggerTimedOut,
    /// A fault ended the run; `phase` is `None` before phase 1 started
    Aborted {
        phase: Option<Phase>,
        message: String,
    },
}

impl SequenceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SequenceStatus::Running)
    }
}

/// Execution state of one run.
#[derive(Debug, Clone)]
pub struct SequenceState {
    current: Option<Phase>,
    completed: Vec<Phase>,
    status: SequenceStatus,
    reboots: u32,
    sanitation_passes: u32,
    token: Option<String>,
    download_url: Option<String>,
    start_time: Instant,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceState {
    pub fn new() -> Self {
        SequenceState {
            current: None,
            completed: Vec::with_capacity(Phase::SEQUENCE.len()),
            status: SequenceStatus::Running,
            reboots: 0,
            sanitation_passes: 0,
            token: None,
            download_url: None,
            start_time: Instant::now(),
        }
    }

    /// The phase that must be entered next, if any.
    pub fn expected_next(&self) -> Option<Phase> {
        Phase::SEQUENCE.get(self.completed.len()).copied()
    }

    /// Enter `phase`. Rejected unless it is exactly the next phase and no
    /// other phase is in progress.
    pub fn enter(&mut self, phase: Phase) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("Cannot enter {}: run already finished", phase.title()));
        }
        if let Some(current) = self.current {
            return Err(format!(
                "Cannot enter {} while {} is in progress",
                phase.title(),
                current.title()
            ));
        }
        if self.expected_next() != Some(phase) {
            return Err(format!(
                "Invalid phase transition: {} after {} completed phase(s)",
                phase.title(),
                self.completed.len()
            ));
        }
        self.current = Some(phase);
        Ok(())
    }

    /// Mark the in-progress `phase` as done.
    pub fn complete(&mut self, phase: Phase) -> Result<(), String> {
        if self.current != Some(phase) {
            return Err(format!("Cannot complete {}: not in progress", phase.title()));
        }
        self.current = None;
        self.completed.push(phase);
        Ok(())
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    pub fn completed(&self) -> &[Phase] {
        &self.completed
    }

    pub fn status(&self) -> &SequenceStatus {
        &self.status
    }

    pub fn succeed(&mut self) {
        self.finish(SequenceStatus::Succeeded);
    }

    pub fn trigger_timed_out(&mut self) {
        self.finish(SequenceStatus::TriggerTimedOut);
    }

    /// Record a fault against the phase in progress (or the last attempted one).
    pub fn abort(&mut self, message: impl Into<String>) {
        let phase = self.current.or_else(|| self.completed.last().copied());
        self.finish(SequenceStatus::Aborted {
            phase,
            message: message.into(),
        });
    }

    fn finish(&mut self, status: SequenceStatus) {
        if self.status.is_terminal() {
            log::debug!("[State] ignoring {:?}, already {:?}", status, self.status);
            return;
        }
        self.status = status;
    }

    pub fn record_reboot(&mut self) {
        self.reboots += 1;
    }

    pub fn record_sanitation(&mut self) {
        self.sanitation_passes += 1;
    }

    pub fn reboots(&self) -> u32 {
        self.reboots
    }

    pub fn sanitation_passes(&self) -> u32 {
        self.sanitation_passes
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_download_url(&mut self, url: String) {
        self.download_url = Some(url);
    }

    pub fn download_url(&self) -> Option<&str> {
        self.download_url.as_deref()
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
