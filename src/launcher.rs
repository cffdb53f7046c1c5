//! Renders a task's command and runs it through the shell.
//!
//! A launch only submits work: exit code 0 moves the task to RUNNING (the
//! command may be a fire-and-forget submission to a batch system), anything
//! else moves it to ERROR. Launch problems are recorded as data on the task,
//! never returned as errors. Only store failures propagate.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::DatabaseError;
use crate::model::{CommandResult, Entry, Task, TaskStatus, Template};
use crate::render::TemplateRenderer;
use crate::store::Store;

/// Spawns rendered task commands.
pub struct Launcher {
    renderer: TemplateRenderer,
    /// Upper bound on a single command (None = wait forever).
    timeout: Option<Duration>,
}

impl Launcher {
    /// Create a launcher with no command timeout.
    pub fn new() -> Self {
        Self {
            renderer: TemplateRenderer::new(),
            timeout: None,
        }
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `cmd` with `sh -c`, inheriting the environment, capturing output in full.
    pub async fn execute(&self, cmd: &str) -> CommandResult {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", cmd]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", cmd]);
            c
        };

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return CommandResult::failed(format!("Failed to spawn command: {e}")),
        };

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    return CommandResult::failed(format!("Command timed out after {timeout:?}"));
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => CommandResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) => CommandResult::failed(format!("Command execution failed: {e}")),
        }
    }

    /// Render `template` for `entry` and execute it.
    ///
    /// Returns the status the task should move to along with the captured result.
    pub async fn launch(&self, entry: &Entry, template: &Template) -> (TaskStatus, CommandResult) {
        let result = match self.renderer.render(&template.content, entry) {
            Ok(cmd) => self.execute(&cmd).await,
            Err(e) => {
                warn!(entry = %entry.name, template = %template.name, error = %e, "Render failed");
                CommandResult::failed(e.to_string())
            }
        };

        let status = if result.is_success() {
            TaskStatus::Running
        } else {
            TaskStatus::Error
        };
        (status, result)
    }

    /// Launch a PENDING task and commit the outcome. Returns the updated task.
    pub async fn launch_task(&self, store: &dyn Store, task: &Task) -> Result<Task, DatabaseError> {
        let entry = store
            .get_entry(task.entry_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "entry".to_string(),
                id: task.entry_id.to_string(),
            })?;
        let template = store
            .get_template(task.template_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "template".to_string(),
                id: task.template_id.to_string(),
            })?;

        let (status, result) = self.launch(&entry, &template).await;
        store.record_launch(task.id, status, &result).await?;

        match status {
            TaskStatus::Running => info!(task_id = task.id, entry = %entry.name, "Task launched"),
            _ => warn!(
                task_id = task.id,
                entry = %entry.name,
                exit_code = result.exit_code,
                "Task launch failed"
            ),
        }

        Ok(Task {
            status,
            launch_result: Some(result),
            ..task.clone()
        })
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let launcher = Launcher::new();
        let result = launcher.execute("echo hello").await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let launcher = Launcher::new();
        let result = launcher.execute("echo oops >&2; exit 3").await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn inherits_environment() {
        // SAFETY: test-only, no other thread reads this variable.
        unsafe { std::env::set_var("TOAD_LAUNCHER_TEST_VAR", "inherited") };
        let result = Launcher::new().execute("echo $TOAD_LAUNCHER_TEST_VAR").await;
        assert_eq!(result.stdout.trim(), "inherited");
    }

    #[tokio::test]
    async fn large_output_is_not_truncated() {
        let result = Launcher::new()
            .execute("i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done")
            .await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.len(), 20000 * 11);
    }

    #[tokio::test]
    async fn timeout_is_recorded_as_failure() {
        let launcher = Launcher::new().with_timeout(Some(Duration::from_millis(100)));
        let result = launcher.execute("sleep 10").await;
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn launch_task_success_moves_to_running() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let template = db.insert_template("t.j2", "echo Job '<{{ entry.id }}>'").await.unwrap();
        let entry = db.insert_entry("SRR1").await.unwrap();
        let task = db.insert_task(entry.id, template.id).await.unwrap();

        let launched = Launcher::new().launch_task(&db, &task).await.unwrap();
        assert_eq!(launched.status, TaskStatus::Running);

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        let launch = stored.launch_result.unwrap();
        assert_eq!(launch.exit_code, 0);
        assert_eq!(launch.stdout, format!("Job <{}>\n", entry.id));
        assert!(stored.execution_result.is_none());
    }

    #[tokio::test]
    async fn launch_task_failure_moves_to_error() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let template = db.insert_template("t.j2", "echo nope >&2; exit 2").await.unwrap();
        let entry = db.insert_entry("SRR1").await.unwrap();
        let task = db.insert_task(entry.id, template.id).await.unwrap();

        let launched = Launcher::new().launch_task(&db, &task).await.unwrap();
        assert_eq!(launched.status, TaskStatus::Error);

        let stored = db.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Error);
        assert_eq!(stored.launch_result, Some(CommandResult::new(2, "", "nope\n")));
        assert!(stored.execution_result.is_none());
    }

    #[tokio::test]
    async fn render_failure_is_task_local_error() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let template = db.insert_template("t.j2", "echo {{ entry.sample }}").await.unwrap();
        let entry = db.insert_entry("SRR1").await.unwrap();
        let task = db.insert_task(entry.id, template.id).await.unwrap();

        let launched = Launcher::new().launch_task(&db, &task).await.unwrap();
        assert_eq!(launched.status, TaskStatus::Error);

        let launch = db.get_task(task.id).await.unwrap().unwrap().launch_result.unwrap();
        assert_eq!(launch.exit_code, -1);
        assert!(launch.stderr.contains("sample"));
    }
}
