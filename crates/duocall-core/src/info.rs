//! Per-call milestone collection.
//!
//! Each call accumulates an append-only list of `(milestone, elapsed_ms)`
//! pairs measured from call start on the monotonic clock. A snapshot is
//! published on first-frame decode; a diff report is logged when the call
//! ends and the buffer is reset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Notable points in a call's life.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallMilestone {
    Start,
    RemoteUserRecvCall,
    AcceptCall,
    LocalUserJoinChannel,
    RemoteUserJoinChannel,
    RecvFirstFrame,
    End,
}

impl fmt::Display for CallMilestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallMilestone::Start => "start",
            CallMilestone::RemoteUserRecvCall => "remoteUserRecvCall",
            CallMilestone::AcceptCall => "acceptCall",
            CallMilestone::LocalUserJoinChannel => "localUserJoinChannel",
            CallMilestone::RemoteUserJoinChannel => "remoteUserJoinChannel",
            CallMilestone::RecvFirstFrame => "recvFirstFrame",
            CallMilestone::End => "end",
        };
        write!(f, "{}", name)
    }
}

/// Immutable view of the milestone buffer, as delivered on the
/// `call_info_changed` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallInfoSnapshot {
    pub milestones: Vec<(CallMilestone, u64)>,
}

impl CallInfoSnapshot {
    pub fn elapsed_ms(&self, milestone: CallMilestone) -> Option<u64> {
        self.milestones
            .iter()
            .find(|(m, _)| *m == milestone)
            .map(|(_, at)| *at)
    }

    /// Render `milestone +delta_ms (at_ms)` lines for the end-of-call report.
    pub fn report(&self) -> String {
        let mut out = String::new();
        let mut prev = 0u64;
        for (milestone, at) in &self.milestones {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&format!("{} +{}ms ({}ms)", milestone, at - prev, at));
            prev = *at;
        }
        out
    }
}

/// Mutable milestone collector owned by the engine.
#[derive(Debug, Default)]
pub struct CallInfo {
    started_at: Option<Instant>,
    milestones: Vec<(CallMilestone, u64)>,
}

impl CallInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new collection, recording `Start` at 0ms. Restarting an
    /// already-started collection resets it.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.milestones.clear();
        self.milestones.push((CallMilestone::Start, 0));
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Record a milestone at the current elapsed time. Ignored before
    /// `start` and on repeats of the same milestone.
    pub fn mark(&mut self, milestone: CallMilestone) {
        let Some(started_at) = self.started_at else {
            return;
        };
        if self.milestones.iter().any(|(m, _)| *m == milestone) {
            return;
        }
        let elapsed = started_at.elapsed().as_millis() as u64;
        self.milestones.push((milestone, elapsed));
    }

    pub fn snapshot(&self) -> CallInfoSnapshot {
        CallInfoSnapshot {
            milestones: self.milestones.clone(),
        }
    }

    /// Record `End`, return the final snapshot, and clear the buffer.
    pub fn finish(&mut self) -> Option<CallInfoSnapshot> {
        if self.started_at.is_none() {
            return None;
        }
        self.mark(CallMilestone::End);
        let snapshot = self.snapshot();
        self.reset();
        Some(snapshot)
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.milestones.clear();
    }
}
