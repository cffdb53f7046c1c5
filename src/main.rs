use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use toad::checker::CompletionChecker;
use toad::config::{DEFAULT_BATCH_SIZE, DEFAULT_FREQUENCY_MINUTES, DEFAULT_MAX_TASKS, SchedulerConfig};
use toad::scheduler::Scheduler;
use toad::seed;
use toad::store::{LibSqlBackend, Store};
use toad::summary::{SummaryFormat, render_summary};

#[derive(Parser)]
#[command(name = "toad", version, about = "Launch and track batch jobs rendered from a template")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a template and create one pending task per entry
    Init {
        /// Database file
        database: PathBuf,
        /// Template file; its file name becomes the template name
        #[arg(long)]
        template: PathBuf,
        /// Entry name (repeatable)
        #[arg(long = "entry")]
        entries: Vec<String>,
        /// File with one entry per line
        #[arg(long)]
        entries_file: Option<PathBuf>,
    },
    /// Replace a stored template's content with the file's
    UpdateTemplate {
        database: PathBuf,
        template: PathBuf,
    },
    /// Launch one batch of pending tasks
    Run {
        database: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[command(flatten)]
        timeouts: Timeouts,
    },
    /// Run the check script on every running task
    Check {
        database: PathBuf,
        #[arg(long, env = "TOAD_CHECK_SCRIPT")]
        check_script: PathBuf,
        #[command(flatten)]
        timeouts: Timeouts,
    },
    /// Number of tasks per status
    Summary {
        database: PathBuf,
        #[arg(long, value_enum, default_value_t = SummaryFormat::Table)]
        format: SummaryFormat,
    },
    /// Check and launch in cycles until no task is pending
    Daemon {
        database: PathBuf,
        #[arg(long, env = "TOAD_CHECK_SCRIPT")]
        check_script: PathBuf,
        /// Maximum number of running tasks
        #[arg(long, default_value_t = DEFAULT_MAX_TASKS, env = "TOAD_MAX_TASKS")]
        max_tasks: usize,
        /// Minutes to sleep between cycles
        #[arg(long, default_value_t = DEFAULT_FREQUENCY_MINUTES, env = "TOAD_FREQUENCY_MIN")]
        frequency: u64,
        #[command(flatten)]
        timeouts: Timeouts,
    },
}

#[derive(Args)]
struct Timeouts {
    /// Kill a launch command after this many seconds
    #[arg(long, env = "TOAD_LAUNCH_TIMEOUT_SECS")]
    launch_timeout: Option<u64>,
    /// Kill a checker invocation after this many seconds
    #[arg(long, env = "TOAD_CHECK_TIMEOUT_SECS")]
    check_timeout: Option<u64>,
}

impl Timeouts {
    fn apply(&self, config: SchedulerConfig) -> SchedulerConfig {
        config
            .with_launch_timeout(self.launch_timeout.map(Duration::from_secs))
            .with_check_timeout(self.check_timeout.map(Duration::from_secs))
    }
}

async fn open_store(path: &Path) -> Result<Arc<dyn Store>> {
    let db = LibSqlBackend::new_local(path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Init {
            database,
            template,
            entries,
            entries_file,
        } => {
            let store = open_store(&database).await?;
            let report =
                seed::init_from_files(store.as_ref(), &template, &entries, entries_file.as_deref())
                    .await
                    .context("Seeding failed")?;
            eprintln!(
                "Template '{}' stored, {} task(s) created",
                report.template.name, report.tasks_created
            );
        }

        Commands::UpdateTemplate { database, template } => {
            let store = open_store(&database).await?;
            let updated = seed::update_template_from_file(store.as_ref(), &template)
                .await
                .context("Template update failed")?;
            eprintln!("Done");
            println!("{}", updated.content);
        }

        Commands::Run {
            database,
            batch_size,
            timeouts,
        } => {
            let store = open_store(&database).await?;
            let scheduler = Scheduler::new(store, timeouts.apply(SchedulerConfig::default()))?;
            let report = scheduler.launch_pending(batch_size).await?;
            eprintln!(
                "Launched {} task(s), {} failed to launch",
                report.launched, report.errored
            );
        }

        Commands::Check {
            database,
            check_script,
            timeouts,
        } => {
            let store = open_store(&database).await?;
            let config = timeouts.apply(SchedulerConfig::default().with_checker(check_script));
            let scheduler = Scheduler::new(store, config)?;
            let checker = scheduler.script_checker()?;
            let report = scheduler.check_running(&checker).await?;
            eprintln!(
                "Checked {}: {} running, {} completed, {} error",
                report.checked, report.still_running, report.completed, report.errored
            );
        }

        Commands::Summary { database, format } => {
            let store = open_store(&database).await?;
            let counts = store.status_counts().await?;
            print!("{}", render_summary(&counts, format));
        }

        Commands::Daemon {
            database,
            check_script,
            max_tasks,
            frequency,
            timeouts,
        } => {
            let store = open_store(&database).await?;
            let config = timeouts.apply(
                SchedulerConfig::default()
                    .with_max_tasks(max_tasks)
                    .with_frequency_minutes(frequency)
                    .with_checker(check_script),
            );
            let scheduler = Scheduler::new(store, config)?;
            let checker = scheduler.script_checker()?;
            checker
                .ensure_available()
                .await
                .context("Check script is not usable")?;

            eprintln!("🐸 Toad v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Database: {}", database.display());
            eprintln!("   Checker: {}", checker.path().display());
            eprintln!("   Max tasks: {}", max_tasks);
            eprintln!("   Frequency: {} min\n", frequency);

            tokio::select! {
                result = scheduler.run(&checker) => {
                    let report = result?;
                    eprintln!(
                        "No pending tasks left after {} cycle(s): {} launched, {} completed, {} error",
                        report.cycles, report.launched, report.completed, report.errored
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("Interrupted, progress so far is saved");
                }
            }
        }
    }

    Ok(())
}
