//! Completion checking for RUNNING tasks.
//!
//! The scheduler only talks to the `CompletionChecker` trait. The shipped
//! implementation, `ScriptChecker`, runs a user-supplied executable as a
//! separate process:
//!
//! - argv: `<entry_name> <launch_exit_code>`
//! - stdin: `{"entry_name", "launch_exit_code", "launch_stdout", "launch_stderr"}`
//! - stdout: `{"is_running": bool, "exit_code": int, "stdout": str, "stderr": str}`
//!
//! A typical checker parses a job id out of `launch_stdout`, asks the batch
//! system for its state, and verifies expected output files exist.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::CheckError;
use crate::model::{CommandResult, Entry, Task, TaskStatus};

/// What the checker is asked about one RUNNING task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRequest {
    pub entry_name: String,
    pub launch_exit_code: i32,
    pub launch_stdout: String,
    pub launch_stderr: String,
}

impl CheckRequest {
    pub fn new(entry: &Entry, task: &Task) -> Self {
        let launch = task.launch_result.clone().unwrap_or_default();
        Self {
            entry_name: entry.name.clone(),
            launch_exit_code: launch.exit_code,
            launch_stdout: launch.stdout,
            launch_stderr: launch.stderr,
        }
    }
}

/// The checker's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub is_running: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CheckOutcome {
    /// Work is still in flight.
    pub fn running() -> Self {
        Self {
            is_running: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Work finished with the given result.
    pub fn finished(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            is_running: false,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// The transition this verdict asks for, if any.
    ///
    /// While running, the remaining fields are ignored.
    pub fn resolve(self) -> Option<(TaskStatus, CommandResult)> {
        if self.is_running {
            return None;
        }
        let status = if self.exit_code == 0 {
            TaskStatus::Completed
        } else {
            TaskStatus::Error
        };
        Some((
            status,
            CommandResult::new(self.exit_code, self.stdout, self.stderr),
        ))
    }
}

/// Pluggable completion probe. Must only observe external state.
#[async_trait]
pub trait CompletionChecker: Send + Sync {
    /// Called once at the start of every check pass. An error aborts the pass.
    async fn ensure_available(&self) -> Result<(), CheckError> {
        Ok(())
    }

    /// Judge one RUNNING task. An error aborts the pass.
    async fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckError>;
}

/// Runs an external executable per RUNNING task.
#[derive(Debug, Clone)]
pub struct ScriptChecker {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl ScriptChecker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
        }
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unavailable(&self, reason: impl Into<String>) -> CheckError {
        CheckError::Unavailable {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn protocol(&self, reason: impl Into<String>) -> CheckError {
        CheckError::Protocol {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    async fn invoke(&self, request: &CheckRequest) -> Result<std::process::Output, CheckError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| self.protocol(format!("Failed to encode request: {e}")))?;

        let mut child = Command::new(&self.path)
            .arg(&request.entry_name)
            .arg(request.launch_exit_code.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckError::Spawn {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        // Feed stdin while draining stdout/stderr; either side may fill its pipe first.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A checker that ignores stdin may exit before reading it.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(error = %e, "Checker closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());

        output.map_err(|e| CheckError::Spawn {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CompletionChecker for ScriptChecker {
    async fn ensure_available(&self) -> Result<(), CheckError> {
        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        if !metadata.is_file() {
            return Err(self.unavailable("not a file"));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(self.unavailable("not executable"));
            }
        }

        Ok(())
    }

    async fn check(&self, request: &CheckRequest) -> Result<CheckOutcome, CheckError> {
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.invoke(request))
                .await
                .map_err(|_| CheckError::Timeout {
                    path: self.path.clone(),
                    timeout,
                })??,
            None => self.invoke(request).await?,
        };

        if !output.status.success() {
            return Err(self.protocol(format!(
                "exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(stdout.trim())
            .map_err(|e| self.protocol(format!("invalid verdict {:?}: {e}", stdout.trim())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write an executable shell script into `dir`.
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    fn request(name: &str) -> CheckRequest {
        CheckRequest {
            entry_name: name.to_string(),
            launch_exit_code: 0,
            launch_stdout: "Job <4242> is submitted".to_string(),
            launch_stderr: String::new(),
        }
    }

    #[test]
    fn running_outcome_resolves_to_nothing() {
        let outcome = CheckOutcome {
            is_running: true,
            exit_code: 9,
            stdout: "ignored".into(),
            stderr: "ignored".into(),
        };
        assert!(outcome.resolve().is_none());
    }

    #[test]
    fn finished_outcomes_resolve() {
        assert_eq!(
            CheckOutcome::finished(0, "", "").resolve(),
            Some((TaskStatus::Completed, CommandResult::new(0, "", "")))
        );
        assert_eq!(
            CheckOutcome::finished(1, "", "err").resolve(),
            Some((TaskStatus::Error, CommandResult::new(1, "", "err")))
        );
    }

    #[test]
    fn outcome_fields_default() {
        let outcome: CheckOutcome = serde_json::from_str(r#"{"is_running": false}"#).unwrap();
        assert_eq!(outcome, CheckOutcome::finished(0, "", ""));
    }

    #[tokio::test]
    async fn missing_script_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let checker = ScriptChecker::new(tmp.path().join("nope.sh"));
        let err = checker.ensure_available().await.unwrap_err();
        assert!(matches!(err, CheckError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn directory_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let checker = ScriptChecker::new(tmp.path());
        assert!(matches!(
            checker.ensure_available().await,
            Err(CheckError::Unavailable { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_is_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("check.sh");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        let checker = ScriptChecker::new(&path);
        assert!(matches!(
            checker.ensure_available().await,
            Err(CheckError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn script_receives_arguments_and_request() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(
            tmp.path(),
            "check.sh",
            r#"input=$(cat)
case "$input" in
  *'Job <4242>'*) printf '{"is_running": false, "exit_code": 0, "stdout": "%s-%s", "stderr": ""}' "$1" "$2" ;;
  *) printf '{"is_running": true}' ;;
esac"#,
        );
        let checker = ScriptChecker::new(&path);
        checker.ensure_available().await.unwrap();

        let outcome = checker.check(&request("SRR9")).await.unwrap();
        assert_eq!(outcome, CheckOutcome::finished(0, "SRR9-0", ""));
    }

    #[tokio::test]
    async fn script_reports_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(
            tmp.path(),
            "check.sh",
            r#"echo '{"is_running": false, "exit_code": 1, "stdout": "", "stderr": "Missing file: out.fasta"}'"#,
        );
        let outcome = ScriptChecker::new(&path).check(&request("a")).await.unwrap();
        assert_eq!(outcome.resolve().unwrap().0, TaskStatus::Error);
    }

    #[tokio::test]
    async fn garbage_output_is_protocol_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(tmp.path(), "check.sh", "echo not json");
        let err = ScriptChecker::new(&path).check(&request("a")).await.unwrap_err();
        assert!(matches!(err, CheckError::Protocol { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_is_protocol_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(tmp.path(), "check.sh", "echo broken >&2; exit 4");
        let err = ScriptChecker::new(&path).check(&request("a")).await.unwrap_err();
        assert!(matches!(err, CheckError::Protocol { ref reason, .. } if reason.contains("broken")));
    }

    #[tokio::test]
    async fn large_request_and_noisy_checker_do_not_deadlock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(
            tmp.path(),
            "check.sh",
            r#"head -c 300000 /dev/zero | tr '\0' x >&2
wc -c > /dev/null
echo '{"is_running": true}'"#,
        );
        let mut req = request("big");
        req.launch_stdout = "0123456789\n".repeat(30_000);

        let checker = ScriptChecker::new(&path).with_timeout(Some(Duration::from_secs(10)));
        let outcome = checker.check(&req).await.unwrap();
        assert!(outcome.is_running);
    }

    #[tokio::test]
    async fn slow_script_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_script(tmp.path(), "check.sh", "sleep 10");
        let checker = ScriptChecker::new(&path).with_timeout(Some(Duration::from_millis(100)));
        let err = checker.check(&request("a")).await.unwrap_err();
        assert!(matches!(err, CheckError::Timeout { .. }));
    }
}
