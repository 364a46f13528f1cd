use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure signal reported by a [`Target`] after a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureResult {
    /// Nothing of interest was observed.
    None,
    /// The target failed (crash, assertion, sanitizer report, ...).
    Failure,
    /// The target failed in a way that has been flagged as uninteresting.
    Ignored,
}

/// Diagnostic artifact captured when a target could not be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    /// Location of the captured logs.
    pub path: PathBuf,
    /// Short human-readable summary of what went wrong.
    pub summary: String,
}

/// Errors returned by [`Target::launch`].
///
/// `Failed` is fatal. `TimedOut` may succeed on the next attempt.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// The target could not be started for a reason unrelated to timing.
    #[error("Target launch failed: {reason}")]
    Failed {
        reason: String,
        report: DiagnosticReport,
    },

    /// The target did not finish starting within its launch timeout.
    #[error("Target launch timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

impl LaunchError {
    /// Returns `true` if another launch attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LaunchError::TimedOut { .. })
    }

    pub fn report(&self) -> Option<&DiagnosticReport> {
        match self {
            LaunchError::Failed { report, .. } => Some(report),
            LaunchError::TimedOut { .. } => None,
        }
    }
}

/// Health monitor of a running target.
pub trait Monitor {
    /// Returns `false` once the target has crashed, hung or exited.
    fn is_healthy(&self) -> bool;

    /// Returns `true` if the target appears to have stopped making progress.
    ///
    /// # Arguments
    /// * `threshold`: Probe specific cutoff, for example a CPU usage percentage
    ///   below which the target counts as idle.
    fn is_idle(&self, threshold: u8) -> bool;
}

/// The application under test.
///
/// A `Target` is owned by a [`Runner`](crate::runner::Runner) for the duration
/// of its trials. It is started once with [`Target::launch`], then serves any
/// number of trials until it is closed; a closed target must be launched
/// again before reuse.
pub trait Target {
    /// Time allotted to a single launch attempt.
    fn launch_timeout(&self) -> Duration;

    /// Starts the target and points it at `location`.
    ///
    /// # Returns
    /// `Ok(())` once the target is running, otherwise a [`LaunchError`] telling
    /// apart fatal failures from retryable timeouts.
    fn launch(&mut self, location: &str) -> Result<(), LaunchError>;

    /// Stops the target and releases its resources.
    fn close(&mut self);

    /// Inspects the target for failures observed since launch.
    fn detect_failure(&mut self) -> FailureResult;

    /// Asks the target to write out collected coverage data.
    fn dump_coverage(&mut self) -> Result<(), anyhow::Error>;

    /// Returns a handle to the target's health monitor.
    fn monitor(&self) -> Arc<dyn Monitor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        let timeout = LaunchError::TimedOut {
            timeout: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.report().is_none());
        assert_eq!(timeout.to_string(), "Target launch timed out after 30s");

        let failed = LaunchError::Failed {
            reason: "binary missing".to_string(),
            report: DiagnosticReport {
                path: PathBuf::from("/tmp/logs"),
                summary: "exec failed".to_string(),
            },
        };
        assert!(!failed.is_retryable());
        assert_eq!(
            failed.report().map(|r| r.path.clone()),
            Some(PathBuf::from("/tmp/logs"))
        );
        assert!(failed.to_string().contains("binary missing"));
    }
}
