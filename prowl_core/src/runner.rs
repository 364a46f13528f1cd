use crate::clock::{Clock, MonotonicClock};
use crate::config::RunnerSettings;
use crate::idle::{IdleChecker, IdleSettings};
use crate::result::{RunResult, RunStatus};
use crate::serve::{ServeStatus, Server, ServerMap};
use crate::target::{FailureResult, LaunchError, Monitor, Target};
use crate::testcase::{TestCase, TestCaseError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Test case error: {0}")]
    TestCase(#[from] TestCaseError),

    #[error("Failed to create test directory: {0}")]
    TestDirectory(String),
}

/// Query parameters appended to a delivery location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocationOptions {
    /// Number of iterations before the harness closes the target.
    pub close_after: Option<u32>,
    /// Whether the harness forces the target closed between test cases.
    pub forced_close: Option<bool>,
    /// Time limit handed to the harness, sent as whole milliseconds.
    pub timeout: Option<Duration>,
}

/// Builds the URL the target is pointed at.
///
/// Parameters are appended in the fixed order `close_after`, `forced_close`,
/// `timeout`; unset ones are left out.
pub fn location(path: &str, port: u16, options: &LocationOptions) -> String {
    let mut location = format!("http://127.0.0.1:{}/{}", port, path.trim_start_matches('/'));
    let mut params = Vec::with_capacity(3);
    if let Some(close_after) = options.close_after {
        params.push(format!("close_after={close_after}"));
    }
    if let Some(forced_close) = options.forced_close {
        params.push(format!("forced_close={}", u8::from(forced_close)));
    }
    if let Some(timeout) = options.timeout {
        params.push(format!("timeout={}", timeout.as_millis()));
    }
    if !params.is_empty() {
        location.push('?');
        location.push_str(&params.join("&"));
    }
    location
}

/// What to do after one launch attempt.
#[derive(Debug)]
pub enum LaunchStep {
    Launched,
    /// The attempt timed out and the retry budget is not spent yet.
    Retry(LaunchError),
    Abort(LaunchError),
}

/// Decides the next step of the launch loop from the outcome of attempt
/// number `attempt` (starting at 1) out of `max_attempts`.
pub fn next_launch_step(
    outcome: Result<(), LaunchError>,
    attempt: u32,
    max_attempts: u32,
) -> LaunchStep {
    match outcome {
        Ok(()) => LaunchStep::Launched,
        Err(err) if err.is_retryable() && attempt < max_attempts => LaunchStep::Retry(err),
        Err(err) => LaunchStep::Abort(err),
    }
}

fn keep_waiting(monitor: &dyn Monitor, idle: Option<&mut IdleChecker>) -> bool {
    if !monitor.is_healthy() {
        return false;
    }
    match idle {
        Some(idle) => !idle.is_idle(),
        None => true,
    }
}

/// Classification of a finished trial; delivery failures take precedence
/// over anything the target reported.
fn classify(landing_page: &str, served: &[String], failure: FailureResult) -> RunStatus {
    if !served.iter().any(|item| item == landing_page) {
        return RunStatus::Error;
    }
    match failure {
        FailureResult::Failure => RunStatus::Failed,
        FailureResult::Ignored => RunStatus::Ignored,
        FailureResult::None => RunStatus::Complete,
    }
}

/// Directory the test case is served from during one trial.
enum TestRoot<'a> {
    Provided(&'a Path),
    Scratch(TempDir),
}

impl TestRoot<'_> {
    fn path(&self) -> &Path {
        match self {
            TestRoot::Provided(path) => path,
            TestRoot::Scratch(dir) => dir.path(),
        }
    }
}

/// Runs trials of test cases against a [`Target`], delivering content through
/// a [`Server`].
pub struct Runner<S, T> {
    server: S,
    target: T,
    idle: Option<IdleChecker>,
    clock: Arc<dyn Clock>,
    launch_retries: u32,
    coverage: bool,
}

impl<S: Server, T: Target> Runner<S, T> {
    pub fn new(server: S, target: T) -> Self {
        Self::with_clock(server, target, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(server: S, target: T, clock: Arc<dyn Clock>) -> Self {
        Self {
            server,
            target,
            idle: None,
            clock,
            launch_retries: 1,
            coverage: false,
        }
    }

    /// Builds a runner configured from the `[runner]` section.
    pub fn from_settings(server: S, target: T, settings: &RunnerSettings) -> Self {
        Self::new(server, target).with_settings(settings)
    }

    /// Applies the `[runner]` section. An idle threshold of `0` disables idle
    /// checking.
    pub fn with_settings(mut self, settings: &RunnerSettings) -> Self {
        self.launch_retries = settings.launch_retries;
        self.coverage = settings.coverage;
        match settings.idle_settings() {
            Some(idle) => self.with_idle_check(&idle),
            None => {
                self.idle = None;
                self
            }
        }
    }

    /// Enables idle detection backed by the target monitor's idle probe.
    pub fn with_idle_check(mut self, settings: &IdleSettings) -> Self {
        let monitor = self.target.monitor();
        let probe = move |threshold: u8| monitor.is_idle(threshold);
        self.idle = Some(IdleChecker::from_settings(
            probe,
            settings,
            self.clock.clone(),
        ));
        self
    }

    pub fn with_idle_checker(mut self, checker: IdleChecker) -> Self {
        self.idle = Some(checker);
        self
    }

    pub fn idle_checker(&self) -> Option<&IdleChecker> {
        self.idle.as_ref()
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn into_parts(self) -> (S, T) {
        (self.server, self.target)
    }

    pub fn launch_retries(&self) -> u32 {
        self.launch_retries
    }

    pub fn coverage(&self) -> bool {
        self.coverage
    }

    /// [`Runner::launch`] with the configured retry budget.
    pub fn start(&mut self, location: &str) -> Result<(), LaunchError> {
        self.launch(location, self.launch_retries)
    }

    /// [`Runner::run`] with the configured coverage setting.
    pub fn run_trial(
        &mut self,
        additional_files: &[String],
        server_map: &ServerMap,
        testcase: &mut TestCase,
        test_path: Option<&Path>,
    ) -> Result<RunResult, RunnerError> {
        self.run(
            additional_files,
            server_map,
            testcase,
            test_path,
            self.coverage,
        )
    }

    /// Starts the target at `location`.
    ///
    /// Launch timeouts are retried until `max_retries` attempts have been
    /// made; at least one attempt is always made. Fatal launch failures are
    /// returned right away.
    pub fn launch(&mut self, location: &str, max_retries: u32) -> Result<(), LaunchError> {
        let max_attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            info!(
                location,
                attempt,
                max_attempts,
                timeout = ?self.target.launch_timeout(),
                "Launching target"
            );
            match next_launch_step(self.target.launch(location), attempt, max_attempts) {
                LaunchStep::Launched => return Ok(()),
                LaunchStep::Retry(err) => {
                    warn!(attempt, max_attempts, "{err}, retrying");
                    attempt += 1;
                }
                LaunchStep::Abort(err) => return Err(err),
            }
        }
    }

    /// Returns `false` once the target is unhealthy or has gone idle.
    ///
    /// This is the predicate the server polls while delivering a test case.
    pub fn keep_waiting(&mut self) -> bool {
        let monitor = self.target.monitor();
        keep_waiting(monitor.as_ref(), self.idle.as_mut())
    }

    /// Runs one trial of `testcase`.
    ///
    /// # Arguments
    /// * `additional_files`: Items that must be served besides the landing page.
    /// * `server_map`: Includes available to the server. Served files found
    ///   under an include are recorded in `testcase`.
    /// * `testcase`: The test case to deliver.
    /// * `test_path`: Directory the test case was already dumped to. When
    ///   `None` the test case is dumped to a temporary directory.
    /// * `coverage`: Dump coverage data once the trial is over.
    ///
    /// # Returns
    /// The classified [`RunResult`]. The target is closed unless the trial
    /// completed. Errors are only returned for problems preparing the test
    /// case before anything is served, never for the trial outcome.
    pub fn run(
        &mut self,
        additional_files: &[String],
        server_map: &ServerMap,
        testcase: &mut TestCase,
        test_path: Option<&Path>,
        coverage: bool,
    ) -> Result<RunResult, RunnerError> {
        let start = self.clock.now();
        let root = match test_path {
            Some(path) => TestRoot::Provided(path),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("prowl_test_")
                    .tempdir()
                    .map_err(|e| RunnerError::TestDirectory(e.to_string()))?;
                testcase.dump(dir.path())?;
                TestRoot::Scratch(dir)
            }
        };
        if let Some(idle) = self.idle.as_mut() {
            idle.schedule_poll(true);
        }

        let mut required = Vec::with_capacity(additional_files.len() + 1);
        required.push(testcase.landing_page().to_string());
        required.extend(additional_files.iter().cloned());
        let optional: Vec<String> = testcase.optional().map(str::to_string).collect();

        let monitor = self.target.monitor();
        let idle = &mut self.idle;
        let (serve_status, served) = self.server.serve_path(
            root.path(),
            &required,
            &optional,
            server_map,
            &mut || keep_waiting(monitor.as_ref(), idle.as_mut()),
        );
        let duration = self.clock.now().saturating_sub(start);

        let failure = self.target.detect_failure();
        let status = classify(testcase.landing_page(), &served, failure);
        let timeout = serve_status == ServeStatus::Timeout;
        debug!(
            ?serve_status,
            ?failure,
            %status,
            served = served.len(),
            ?duration,
            "Trial finished"
        );

        if status != RunStatus::Complete {
            info!(%status, "Closing target");
            self.target.close();
        }
        if coverage {
            if let Err(e) = self.target.dump_coverage() {
                warn!("Coverage dump failed: {e:#}");
            }
        }

        for (url, include) in server_map.includes() {
            match testcase.add_batch(&include.target, &served, url) {
                Ok(0) => {}
                Ok(added) => debug!(url, added, "Recorded served includes"),
                Err(e) => warn!(url, "Failed to record served includes: {e}"),
            }
        }

        Ok(RunResult::new(status, served, duration, timeout))
    }
}
