//! Seeding: store a template, its entries, and one PENDING task per entry.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, DatabaseError, Error};
use crate::model::Template;
use crate::store::Store;

/// What a seeding run created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub template: Template,
    pub tasks_created: usize,
}

/// Insert `template_name`/`content`, then one entry and one PENDING task per
/// name, in input order.
pub async fn seed_tasks(
    store: &dyn Store,
    template_name: &str,
    content: &str,
    entries: &[String],
) -> Result<SeedReport, DatabaseError> {
    let template = store.insert_template(template_name, content).await?;
    info!(template_id = template.id, template = %template.name, "Template stored");

    for name in entries {
        let entry = store.insert_entry(name).await?;
        let task = store.insert_task(entry.id, template.id).await?;
        debug!(task_id = task.id, entry = %entry.name, "Task created");
    }

    info!(template = %template.name, tasks = entries.len(), "Seeding finished");
    Ok(SeedReport {
        template,
        tasks_created: entries.len(),
    })
}

/// Merge explicit entry names with the lines of `entries_file`.
///
/// Names are trimmed and blanks dropped. A file path that does not exist is
/// ignored.
pub fn collect_entries(
    explicit: &[String],
    entries_file: Option<&Path>,
) -> Result<Vec<String>, ConfigError> {
    let mut names: Vec<String> = explicit
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if let Some(path) = entries_file.filter(|p| p.exists()) {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        names.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }

    Ok(names)
}

/// File name of `path`, used as the template's name.
pub fn template_name(path: &Path) -> Result<String, ConfigError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "template".to_string(),
            message: format!("{} has no file name", path.display()),
        })
}

fn read_template(path: &Path) -> Result<(String, String), ConfigError> {
    let name = template_name(path)?;
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((name, content))
}

/// Seed from a template file plus entry names and an optional entries file.
pub async fn init_from_files(
    store: &dyn Store,
    template_path: &Path,
    entries: &[String],
    entries_file: Option<&Path>,
) -> Result<SeedReport, Error> {
    let (name, content) = read_template(template_path)?;
    let names = collect_entries(entries, entries_file)?;
    Ok(seed_tasks(store, &name, &content, &names).await?)
}

/// Replace the content of the template named after `template_path` with the
/// file's current contents.
pub async fn update_template_from_file(
    store: &dyn Store,
    template_path: &Path,
) -> Result<Template, Error> {
    let (name, content) = read_template(template_path)?;
    Ok(store.update_template_content(&name, &content).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use crate::store::LibSqlBackend;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn seeds_one_pending_task_per_entry() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let report = seed_tasks(&db, "run.j2", "echo {{ entry.name }}", &names(&["a", "b", "c"]))
            .await
            .unwrap();
        assert_eq!(report.tasks_created, 3);
        assert_eq!(report.template.name, "run.j2");

        let pending = db.list_tasks_by_status(TaskStatus::Pending, None).await.unwrap();
        assert_eq!(pending.len(), 3);
        let mut seeded = Vec::new();
        for task in &pending {
            assert_eq!(task.template_id, report.template.id);
            assert!(task.launch_result.is_none());
            seeded.push(db.get_entry(task.entry_id).await.unwrap().unwrap().name);
        }
        assert_eq!(seeded, vec!["a", "b", "c"]);
    }

    #[test]
    fn collects_explicit_and_file_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("entries.txt");
        std::fs::write(&file, "  SRR2 \n\n\tSRR3\n   \n").unwrap();

        let all = collect_entries(&names(&[" SRR1 ", ""]), Some(&file)).unwrap();
        assert_eq!(all, vec!["SRR1", "SRR2", "SRR3"]);
    }

    #[test]
    fn missing_entries_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let all = collect_entries(&names(&["x"]), Some(&tmp.path().join("absent.txt"))).unwrap();
        assert_eq!(all, vec!["x"]);
    }

    #[tokio::test]
    async fn init_uses_file_name_as_template_name() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("motus.j2");
        std::fs::write(&template, "motus profile {{ entry.name }}").unwrap();

        let db = LibSqlBackend::new_memory().await.unwrap();
        let report = init_from_files(&db, &template, &names(&["s1"]), None).await.unwrap();
        assert_eq!(report.template.name, "motus.j2");
        assert_eq!(report.template.content, "motus profile {{ entry.name }}");
        assert_eq!(report.tasks_created, 1);
    }

    #[tokio::test]
    async fn init_with_missing_template_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let db = LibSqlBackend::new_memory().await.unwrap();
        let err = init_from_files(&db, &tmp.path().join("none.j2"), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Io { .. })));
    }

    #[tokio::test]
    async fn update_replaces_content_by_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("run.j2");
        std::fs::write(&template, "echo old").unwrap();

        let db = LibSqlBackend::new_memory().await.unwrap();
        let seeded = init_from_files(&db, &template, &[], None).await.unwrap();

        std::fs::write(&template, "echo new {{ entry.id }}").unwrap();
        let updated = update_template_from_file(&db, &template).await.unwrap();
        assert_eq!(updated.id, seeded.template.id);
        assert_eq!(updated.content, "echo new {{ entry.id }}");
    }

    #[tokio::test]
    async fn update_of_unknown_template_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("other.j2");
        std::fs::write(&template, "echo").unwrap();

        let db = LibSqlBackend::new_memory().await.unwrap();
        let err = update_template_from_file(&db, &template).await.unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::NotFound { .. })));
    }
}
