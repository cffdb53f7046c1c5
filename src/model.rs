//! Entries, templates, tasks, and the task state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of input data. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A command recipe rendered against an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    /// Unique name (the file name it was seeded from).
    pub name: String,
    /// Jinja-style command text, e.g. `run.sh {{ entry.name }}`.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be launched.
    Pending,
    /// Launched successfully; the underlying work may still be in flight.
    Running,
    /// The checker reported success.
    Completed,
    /// Launch failed or the checker reported failure.
    Error,
}

impl TaskStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Error,
    ];

    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Pending, Error) | (Running, Completed) | (Running, Error)
        )
    }

    /// Database / display representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Exit code plus captured output of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// A command that never produced an exit status (spawn failure, render
    /// failure, timeout). Recorded with exit code -1 and the reason on stderr.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(-1, String::new(), reason)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One scheduled execution pairing an entry with a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub entry_id: i64,
    pub template_id: i64,
    pub status: TaskStatus,
    /// Set exactly when the task leaves Pending.
    pub launch_result: Option<CommandResult>,
    /// Set exactly when the task leaves Running. A launch failure never sets it.
    pub execution_result: Option<CommandResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Error => self.error,
        }
    }

    pub fn set(&mut self, status: TaskStatus, count: usize) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::Running => self.running = count,
            TaskStatus::Completed => self.completed = count,
            TaskStatus::Error => self.error = count,
        }
    }

    /// Non-zero counts in lifecycle order.
    pub fn non_zero(&self) -> Vec<(TaskStatus, usize)> {
        TaskStatus::ALL
            .into_iter()
            .map(|s| (s, self.get(s)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Error));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Error));
    }

    #[test]
    fn forbidden_transitions() {
        use TaskStatus::*;
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Running));
        for terminal in [Completed, Error] {
            for target in TaskStatus::ALL {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn status_string_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("in_progress".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn failed_command_result() {
        let result = CommandResult::failed("boom");
        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr, "boom");
        assert!(!result.is_success());
    }

    #[test]
    fn counts_non_zero_in_order() {
        let mut counts = StatusCounts::default();
        counts.set(TaskStatus::Error, 2);
        counts.set(TaskStatus::Pending, 5);
        assert_eq!(
            counts.non_zero(),
            vec![(TaskStatus::Pending, 5), (TaskStatus::Error, 2)]
        );
    }
}
