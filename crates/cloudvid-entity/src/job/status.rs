//! Transfer job status and its transition graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a transfer job.
///
/// ```text
/// Pending ──► Downloading ──► Uploading ──► Completed
///    │  ▲          │  │           │  │
///    │  └──retry───┘  │           │  ├──► Failed
///    │  ▲             ├──► Failed │  └──► Cancelled
///    │  └─────────retry───────────┘
///    ├──► Completed (duplicate short-circuit)
///    └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transfer_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be picked up by the dispatcher.
    Pending,
    /// Source bytes are being spooled.
    Downloading,
    /// Spooled bytes are being sent to the destination.
    Uploading,
    /// Successfully transferred (or short-circuited as a duplicate).
    Completed,
    /// Terminally failed.
    Failed,
    /// Cancelled on request.
    Cancelled,
}

impl JobStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Downloading,
        Self::Uploading,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the job is actively transferring.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Downloading | Self::Uploading)
    }

    /// Whether `self -> next` is an edge of the state graph.
    ///
    /// Same-status edges are only legal for the active states, where they
    /// carry progress updates.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Downloading | Completed | Cancelled) => true,
            (Downloading, Downloading | Uploading | Pending | Failed | Cancelled) => true,
            (Uploading, Uploading | Completed | Pending | Failed | Cancelled) => true,
            _ => false,
        }
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn test_pending_edges() {
        let pending = JobStatus::Pending;
        assert!(pending.can_transition_to(JobStatus::Downloading));
        assert!(pending.can_transition_to(JobStatus::Completed));
        assert!(pending.can_transition_to(JobStatus::Cancelled));
        assert!(!pending.can_transition_to(JobStatus::Uploading));
        assert!(!pending.can_transition_to(JobStatus::Failed));
        assert!(!pending.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_active_edges() {
        assert!(JobStatus::Downloading.can_transition_to(JobStatus::Uploading));
        assert!(JobStatus::Downloading.can_transition_to(JobStatus::Downloading));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Uploading.can_transition_to(JobStatus::Downloading));
        assert!(JobStatus::Uploading.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Uploading.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn test_parse_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("running".parse::<JobStatus>().is_err());
    }
}
