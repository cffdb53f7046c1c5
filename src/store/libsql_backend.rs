//! libSQL implementation of the `Store` trait.
//!
//! Supports local file and in-memory databases. Each statement runs in
//! autocommit mode, so every transition is durable once the call returns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::model::{CommandResult, Entry, StatusCounts, Task, TaskStatus, Template};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Guarded status update: only applies while the task is still in `from`.
    async fn transition(
        &self,
        op: &str,
        task_id: i64,
        from: TaskStatus,
        to: TaskStatus,
        columns: [&str; 3],
        result: &CommandResult,
    ) -> Result<(), DatabaseError> {
        if !from.can_transition_to(to) {
            return Err(DatabaseError::InvalidTransition {
                id: task_id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let [code_col, stdout_col, stderr_col] = columns;
        let changed = self
            .conn()
            .execute(
                &format!(
                    "UPDATE tasks SET status = ?1, {code_col} = ?2, {stdout_col} = ?3, {stderr_col} = ?4, updated_at = ?5
                     WHERE id = ?6 AND status = ?7"
                ),
                params![
                    to.as_str(),
                    result.exit_code,
                    result.stdout.clone(),
                    result.stderr.clone(),
                    now_str(),
                    task_id,
                    from.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        if changed == 0 {
            return match self.get_task(task_id).await? {
                Some(task) => Err(DatabaseError::InvalidTransition {
                    id: task_id,
                    from: task.status.to_string(),
                    to: to.to_string(),
                }),
                None => Err(not_found("task", task_id)),
            };
        }

        debug!(task_id, from = %from, to = %to, exit_code = result.exit_code, "Task transition committed");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Current time in the canonical write format.
///
/// Fixed-width microsecond RFC 3339 so lexical order equals time order.
fn now_str() -> String {
    format_datetime(&Utc::now())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn not_found(entity: &str, id: impl ToString) -> DatabaseError {
    DatabaseError::NotFound {
        entity: entity.to_string(),
        id: id.to_string(),
    }
}

fn row_to_entry(row: &libsql::Row) -> Result<Entry, libsql::Error> {
    let created_str: String = row.get(2)?;
    Ok(Entry {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_template(row: &libsql::Row) -> Result<Template, libsql::Error> {
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        content: row.get(2)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Read a nullable (exit_code, stdout, stderr) column triple starting at `start`.
///
/// The exit code decides presence: NULL means the result was never recorded.
fn row_to_result(row: &libsql::Row, start: i32) -> Option<CommandResult> {
    let exit_code: i64 = row.get(start).ok()?;
    Some(CommandResult {
        exit_code: exit_code as i32,
        stdout: row.get::<String>(start + 1).unwrap_or_default(),
        stderr: row.get::<String>(start + 2).unwrap_or_default(),
    })
}

/// Map a libsql Row to a Task.
///
/// Column order matches TASK_COLUMNS.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    let status = status_str.parse::<TaskStatus>().map_err(|e| {
        libsql::Error::ToSqlConversionFailure(e.into())
    })?;

    Ok(Task {
        id: row.get(0)?,
        entry_id: row.get(1)?,
        template_id: row.get(2)?,
        status,
        launch_result: row_to_result(row, 4),
        execution_result: row_to_result(row, 7),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

async fn collect_tasks(mut rows: libsql::Rows, op: &str) -> Result<Vec<Task>, DatabaseError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        let task =
            row_to_task(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
        tasks.push(task);
    }
    Ok(tasks)
}

// ── Trait implementation ────────────────────────────────────────────

const ENTRY_COLUMNS: &str = "id, name, created_at";

const TEMPLATE_COLUMNS: &str = "id, name, content, created_at, updated_at";

const TASK_COLUMNS: &str = "id, entry_id, template_id, status, launch_exit_code, launch_stdout, launch_stderr, execution_exit_code, execution_stdout, execution_stderr, created_at, updated_at";

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Entries ─────────────────────────────────────────────────────

    async fn insert_entry(&self, name: &str) -> Result<Entry, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO entries (name, created_at) VALUES (?1, ?2)",
            params![name, format_datetime(&now)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_entry: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(entry_id = id, name, "Entry inserted into DB");
        Ok(Entry {
            id,
            name: name.to_string(),
            created_at: parse_datetime(&format_datetime(&now)),
        })
    }

    async fn get_entry(&self, id: i64) -> Result<Option<Entry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_entry: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let entry = row_to_entry(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_entry row parse: {e}")))?;
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_entry: {e}"))),
        }
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, name: &str, content: &str) -> Result<Template, DatabaseError> {
        let conn = self.conn();
        let now = now_str();
        conn.execute(
            "INSERT INTO templates (name, content, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![name, content, now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_template: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(template_id = id, name, "Template inserted into DB");
        Ok(Template {
            id,
            name: name.to_string(),
            content: content.to_string(),
            created_at: parse_datetime(&now),
            updated_at: parse_datetime(&now),
        })
    }

    async fn get_template(&self, id: i64) -> Result<Option<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let template = row_to_template(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_template row parse: {e}")))?;
                Ok(Some(template))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_template: {e}"))),
        }
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Option<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_template_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let template = row_to_template(&row).map_err(|e| {
                    DatabaseError::Query(format!("get_template_by_name row parse: {e}"))
                })?;
                Ok(Some(template))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_template_by_name: {e}"))),
        }
    }

    async fn update_template_content(
        &self,
        name: &str,
        content: &str,
    ) -> Result<Template, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE templates SET content = ?1, updated_at = ?2 WHERE name = ?3",
                params![content, now_str(), name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_template_content: {e}")))?;

        if changed == 0 {
            return Err(not_found("template", name));
        }

        info!(name, "Template content updated");
        self.get_template_by_name(name)
            .await?
            .ok_or_else(|| not_found("template", name))
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, entry_id: i64, template_id: i64) -> Result<Task, DatabaseError> {
        let conn = self.conn();
        let now = now_str();
        conn.execute(
            "INSERT INTO tasks (entry_id, template_id, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![entry_id, template_id, now.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;

        let id = conn.last_insert_rowid();
        debug!(task_id = id, entry_id, template_id, "Task inserted into DB");
        Ok(Task {
            id,
            entry_id,
            template_id,
            status: TaskStatus::Pending,
            launch_result: None,
            execution_result: None,
            created_at: parse_datetime(&now),
            updated_at: parse_datetime(&now),
        })
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        Ok(collect_tasks(rows, "get_task").await?.into_iter().next())
    }

    async fn list_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Task>, DatabaseError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT ?2"
                ),
                params![status.as_str(), limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks_by_status: {e}")))?;

        collect_tasks(rows, "list_tasks_by_status").await
    }

    async fn count_tasks_by_status(&self, status: TaskStatus) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM tasks WHERE status = ?1",
                params![status.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_tasks_by_status: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_tasks_by_status: {e}")))?;
                Ok(count as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_tasks_by_status: {e}"))),
        }
    }

    async fn status_counts(&self) -> Result<StatusCounts, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT status, COUNT(*) FROM tasks GROUP BY status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("status_counts: {e}")))?
        {
            let status_str: String = row.get(0).unwrap_or_default();
            let count: i64 = row.get(1).unwrap_or(0);
            match status_str.parse::<TaskStatus>() {
                Ok(status) => counts.set(status, count as usize),
                Err(e) => tracing::warn!("Skipping status row: {e}"),
            }
        }
        Ok(counts)
    }

    async fn record_launch(
        &self,
        task_id: i64,
        status: TaskStatus,
        result: &CommandResult,
    ) -> Result<(), DatabaseError> {
        self.transition(
            "record_launch",
            task_id,
            TaskStatus::Pending,
            status,
            ["launch_exit_code", "launch_stdout", "launch_stderr"],
            result,
        )
        .await
    }

    async fn record_execution(
        &self,
        task_id: i64,
        status: TaskStatus,
        result: &CommandResult,
    ) -> Result<(), DatabaseError> {
        self.transition(
            "record_execution",
            task_id,
            TaskStatus::Running,
            status,
            ["execution_exit_code", "execution_stdout", "execution_stderr"],
            result,
        )
        .await
    }
}
