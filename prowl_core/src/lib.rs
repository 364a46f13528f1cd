pub mod adapter;
pub mod clock;
pub mod config;
pub mod idle;
pub mod result;
pub mod runner;
pub mod serve;
pub mod target;
pub mod testcase;

pub use adapter::{Adapter, AdapterError, AdapterRegistry, CommandAdapter, LoadReport};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::ProwlConfig;
pub use idle::{IdleChecker, IdleProbe, IdleSettings};
pub use result::{RunResult, RunStatus};
pub use runner::{LaunchStep, LocationOptions, Runner, RunnerError, location};
pub use serve::{ServeStatus, Server, ServerMap, ServerMapError};
pub use target::{DiagnosticReport, FailureResult, LaunchError, Monitor, Target};
pub use testcase::{TestCase, TestCaseError};
