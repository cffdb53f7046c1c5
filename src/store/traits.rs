//! The repository interface the scheduler reads and writes through.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{CommandResult, Entry, StatusCounts, Task, TaskStatus, Template};

/// Backend-agnostic persistence for entries, templates, and tasks.
///
/// Every write is committed before the call returns.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Entries ─────────────────────────────────────────────────────

    /// Insert a new entry.
    async fn insert_entry(&self, name: &str) -> Result<Entry, DatabaseError>;

    /// Get an entry by ID.
    async fn get_entry(&self, id: i64) -> Result<Option<Entry>, DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    /// Insert a new template. Names are unique.
    async fn insert_template(&self, name: &str, content: &str) -> Result<Template, DatabaseError>;

    /// Get a template by ID.
    async fn get_template(&self, id: i64) -> Result<Option<Template>, DatabaseError>;

    /// Get a template by name.
    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, DatabaseError>;

    /// Replace the content of the named template.
    async fn update_template_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<Template, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a new PENDING task.
    async fn insert_task(&self, entry_id: i64, template_id: i64) -> Result<Task, DatabaseError>;

    /// Get a task by ID.
    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// Tasks in the given status, oldest first (ties broken by ascending id).
    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Number of tasks in the given status.
    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<usize, DatabaseError>;

    /// Task counts grouped by status.
    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError>;

    /// Move a PENDING task to `status` and record its launch result.
    async fn record_launch(
        &self,
        task_id: i64,
        status: TaskStatus,
        result: &CommandResult,
    ) -> Result<(), DatabaseError>;

    /// Move a RUNNING task to `status` and record its execution result.
    async fn record_execution(
        &self,
        task_id: i64,
        status: TaskStatus,
        result: &CommandResult,
    ) -> Result<(), DatabaseError>;
}
