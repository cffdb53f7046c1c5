//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default concurrency ceiling.
pub const DEFAULT_MAX_TASKS: usize = 25;

/// Default sleep between daemon cycles, in minutes.
pub const DEFAULT_FREQUENCY_MINUTES: u64 = 30;

/// Default number of tasks launched by a single `run` batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Scheduler configuration, passed to `Scheduler::new`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of tasks allowed in RUNNING at once.
    pub max_tasks: usize,
    /// Sleep between daemon cycles.
    pub frequency: Duration,
    /// Executable consulted for every RUNNING task.
    pub checker: Option<PathBuf>,
    /// Upper bound on a single launch command (None = wait forever).
    pub launch_timeout: Option<Duration>,
    /// Upper bound on a single checker invocation (None = wait forever).
    pub check_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            frequency: Duration::from_secs(DEFAULT_FREQUENCY_MINUTES * 60),
            checker: None,
            launch_timeout: None,
            check_timeout: None,
        }
    }
}

impl SchedulerConfig {
    /// Builder: set the concurrency ceiling.
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    /// Builder: set the inter-cycle sleep in minutes.
    pub fn with_frequency_minutes(mut self, minutes: u64) -> Self {
        self.frequency = Duration::from_secs(minutes.saturating_mul(60));
        self
    }

    /// Builder: set the inter-cycle sleep.
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    /// Builder: set the checker executable.
    pub fn with_checker(mut self, path: impl Into<PathBuf>) -> Self {
        self.checker = Some(path.into());
        self
    }

    /// Builder: bound launch commands.
    pub fn with_launch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.launch_timeout = timeout;
        self
    }

    /// Builder: bound checker invocations.
    pub fn with_check_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Reject settings the daemon loop cannot make progress with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_tasks".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (key, timeout) in [
            ("launch_timeout", self.launch_timeout),
            ("check_timeout", self.check_timeout),
        ] {
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}
