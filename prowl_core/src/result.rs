use std::fmt;
use std::time::Duration;

/// Outcome classification of a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The landing page was served and the target reported nothing.
    Complete,
    /// The landing page never reached the target.
    Error,
    /// The target reported a failure after receiving the landing page.
    Failed,
    /// The target reported a failure that should be ignored.
    Ignored,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Complete => "complete",
            RunStatus::Error => "error",
            RunStatus::Failed => "failed",
            RunStatus::Ignored => "ignored",
        };
        f.write_str(name)
    }
}

/// Record of one trial, produced by [`Runner::run`](crate::runner::Runner::run).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    status: RunStatus,
    served: Vec<String>,
    duration: Duration,
    timeout: bool,
}

impl RunResult {
    pub(crate) fn new(
        status: RunStatus,
        served: Vec<String>,
        duration: Duration,
        timeout: bool,
    ) -> Self {
        Self {
            status,
            served,
            duration,
            timeout,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Items delivered during the trial, in delivery order.
    pub fn served(&self) -> &[String] {
        &self.served
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// `true` when content delivery stopped because it timed out.
    pub fn timeout(&self) -> bool {
        self.timeout
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}
