//! The daemon loop that drives tasks through their lifecycle.
//!
//! One cycle:
//! 1. Check pass: ask the checker about every RUNNING task, committing each
//!    transition as soon as it is known.
//! 2. Re-read the RUNNING count.
//! 3. Slot budget: `max(0, max_tasks - running)`, fixed for the whole pass.
//! 4. Launch pass: launch up to that many PENDING tasks, oldest first,
//!    committing after every launch.
//! 5. Re-read the PENDING count; stop at zero, otherwise sleep and repeat.
//!
//! Everything runs sequentially in one control flow. The scheduler assumes it
//! is the only writer to its store: two daemons on one database can overshoot
//! `max_tasks`.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::checker::{CheckRequest, CompletionChecker, ScriptChecker};
use crate::config::SchedulerConfig;
use crate::error::{CheckError, ConfigError, DatabaseError, Result};
use crate::launcher::Launcher;
use crate::model::TaskStatus;
use crate::store::Store;

/// Slots available for launching, given the ceiling and the current RUNNING count.
pub fn available_slots(max_tasks: usize, running: usize) -> usize {
    max_tasks.saturating_sub(running)
}

/// Outcome of one check pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub checked: usize,
    pub still_running: usize,
    pub completed: usize,
    pub errored: usize,
}

/// Outcome of one launch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaunchReport {
    /// Tasks now RUNNING.
    pub launched: usize,
    /// Tasks whose launch failed (now ERROR).
    pub errored: usize,
}

impl LaunchReport {
    pub fn attempted(&self) -> usize {
        self.launched + self.errored
    }
}

/// Outcome of one daemon cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub check: CheckReport,
    /// RUNNING count sampled after the check pass.
    pub running: usize,
    /// Slot budget for this cycle's launch pass.
    pub slots: usize,
    pub launch: LaunchReport,
    /// PENDING count after the launch pass.
    pub pending: usize,
}

/// Outcome of a full daemon run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DaemonReport {
    pub cycles: usize,
    pub launched: usize,
    pub completed: usize,
    pub errored: usize,
}

/// Stateless scheduling service. Holds only its store handle, launcher, and configuration.
pub struct Scheduler {
    store: Arc<dyn Store>,
    launcher: Launcher,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler. Rejects configurations the loop cannot run with.
    pub fn new(store: Arc<dyn Store>, config: SchedulerConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let launcher = Launcher::new().with_timeout(config.launch_timeout);
        Ok(Self {
            store,
            launcher,
            config,
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The configured script checker.
    pub fn script_checker(&self) -> std::result::Result<ScriptChecker, CheckError> {
        let path = self.config.checker.clone().ok_or_else(|| CheckError::Unavailable {
            path: Default::default(),
            reason: "no checker configured".to_string(),
        })?;
        Ok(ScriptChecker::new(path).with_timeout(self.config.check_timeout))
    }

    /// Ask the checker about every RUNNING task, committing after each one.
    ///
    /// A checker error aborts the pass; transitions already committed stand.
    pub async fn check_running(&self, checker: &dyn CompletionChecker) -> Result<CheckReport> {
        checker.ensure_available().await.inspect_err(|e| {
            error!(error = %e, "Checker unavailable, check pass aborted");
        })?;

        let running = self
            .store
            .list_tasks_by_status(TaskStatus::Running, None)
            .await?;

        let mut report = CheckReport::default();
        for task in running {
            let entry = self
                .store
                .get_entry(task.entry_id)
                .await?
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "entry".to_string(),
                    id: task.entry_id.to_string(),
                })?;

            let outcome = checker
                .check(&CheckRequest::new(&entry, &task))
                .await
                .inspect_err(|e| {
                    error!(task_id = task.id, entry = %entry.name, error = %e, "Check failed, check pass aborted");
                })?;
            report.checked += 1;

            let Some((status, result)) = outcome.resolve() else {
                report.still_running += 1;
                continue;
            };

            self.store.record_execution(task.id, status, &result).await?;
            match status {
                TaskStatus::Completed => {
                    report.completed += 1;
                    info!(task_id = task.id, entry = %entry.name, "Task completed");
                }
                _ => {
                    report.errored += 1;
                    warn!(
                        task_id = task.id,
                        entry = %entry.name,
                        exit_code = result.exit_code,
                        "Task failed"
                    );
                }
            }
        }

        info!(
            checked = report.checked,
            still_running = report.still_running,
            completed = report.completed,
            errored = report.errored,
            "Check pass finished"
        );
        Ok(report)
    }

    /// Launch up to `limit` PENDING tasks, oldest first, committing after each.
    pub async fn launch_pending(&self, limit: usize) -> Result<LaunchReport> {
        let mut report = LaunchReport::default();
        if limit == 0 {
            return Ok(report);
        }

        let pending = self
            .store
            .list_tasks_by_status(TaskStatus::Pending, Some(limit))
            .await?;

        for task in pending {
            let launched = self.launcher.launch_task(self.store.as_ref(), &task).await?;
            match launched.status {
                TaskStatus::Running => report.launched += 1,
                _ => report.errored += 1,
            }
        }

        info!(
            limit,
            launched = report.launched,
            errored = report.errored,
            "Launch pass finished"
        );
        Ok(report)
    }

    /// One full cycle: check, recompute capacity, launch, re-count pending.
    pub async fn run_cycle(&self, checker: &dyn CompletionChecker) -> Result<CycleReport> {
        let check = self.check_running(checker).await?;

        let running = self.store.count_tasks_by_status(TaskStatus::Running).await?;
        let slots = available_slots(self.config.max_tasks, running);

        let launch = self.launch_pending(slots).await?;

        let pending = self.store.count_tasks_by_status(TaskStatus::Pending).await?;

        Ok(CycleReport {
            check,
            running,
            slots,
            launch,
            pending,
        })
    }

    /// Run cycles until no PENDING task remains, sleeping `frequency` between them.
    ///
    /// RUNNING tasks left at exit are picked up by a later check pass.
    pub async fn run(&self, checker: &dyn CompletionChecker) -> Result<DaemonReport> {
        info!(
            max_tasks = self.config.max_tasks,
            frequency_secs = self.config.frequency.as_secs(),
            "Daemon loop started"
        );

        let mut report = DaemonReport::default();
        loop {
            let cycle = self.run_cycle(checker).await?;
            report.cycles += 1;
            report.launched += cycle.launch.launched;
            report.completed += cycle.check.completed;
            report.errored += cycle.check.errored + cycle.launch.errored;

            info!(
                cycle = report.cycles,
                running = cycle.running,
                slots = cycle.slots,
                launched = cycle.launch.launched,
                pending = cycle.pending,
                "Cycle finished"
            );

            if cycle.pending == 0 {
                info!(cycles = report.cycles, "No pending tasks left, daemon loop finished");
                return Ok(report);
            }

            tokio::time::sleep(self.config.frequency).await;
        }
    }
}
