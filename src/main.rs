//! # Codelore CLI (`lore`)
//!
//! ## Usage
//!
//! ```bash
//! lore --config ./config/lore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore project add <name> <source>` | Register a project (local path or git URL) |
//! | `lore project list` | List projects |
//! | `lore ingest <project> [source] [--no-queue]` | Sync files and git history into the index |
//! | `lore ask <project> "<question>"` | Stream an answer with its sources |
//! | `lore capture <project> <conversation>` | Distill a conversation into a knowledge note |
//! | `lore notes <project>` | List knowledge notes |
//! | `lore task add\|list\|status` | Manage tasks |
//! | `lore doc add\|list\|remove` | Manage uploaded documents |
//! | `lore stats <project>` | Index statistics |
//!
//! ## Examples
//!
//! ```bash
//! lore init
//! lore project add api ~/src/api
//! lore ingest api
//! lore ask api "How are sessions invalidated?"
//! lore ask api "And on password change?" --conversation 3
//! lore capture api 3
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use codelore::app::App;
use codelore::config::{self, Config};
use codelore::progress::StderrLogger;
use codelore::projects::{self, Project};
use codelore::queue::{IngestQueue, DEFAULT_QUEUE_DEPTH};
use codelore::tasks::{self, NewTask};
use codelore::{answer, documents, ingest, knowledge, migrate, stats};
use codelore_core::error::Error;
use codelore_core::models::TaskStatus;

/// Codelore: an incremental knowledge index over a software project.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lore.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "Codelore: index a project's files, history and decisions, then ask about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Register and list projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Sync a project's working tree and git history into the index.
    ///
    /// Unchanged files and already recorded commits are skipped, so this is
    /// cheap to re-run.
    Ingest {
        /// Project id or name.
        project: String,
        /// Source to ingest from. Defaults to the project's registered source.
        source: Option<String>,
        /// Run in this process instead of through the job queue.
        #[arg(long)]
        no_queue: bool,
    },

    /// Ask a question about a project.
    Ask {
        /// Project id or name.
        project: String,
        question: String,
        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<i64>,
    },

    /// Distill a conversation into a knowledge note.
    Capture {
        project: String,
        conversation: i64,
    },

    /// List knowledge notes.
    Notes { project: String },

    /// Manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Manage uploaded documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Show index statistics for a project.
    Stats { project: String },
}

#[derive(Subcommand)]
enum ProjectAction {
    Add { name: String, source: String },
    List,
}

#[derive(Subcommand)]
enum TaskAction {
    Add {
        project: String,
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: Option<String>,
    },
    List {
        project: String,
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    Status {
        project: String,
        number: i64,
        #[arg(value_enum)]
        status: StatusArg,
    },
}

#[derive(Subcommand)]
enum DocAction {
    Add { project: String, path: PathBuf },
    List { project: String },
    Remove { project: String, file_name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Open,
    InProgress,
    Done,
}

impl From<StatusArg> for TaskStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Open => TaskStatus::Open,
            StatusArg::InProgress => TaskStatus::InProgress,
            StatusArg::Done => TaskStatus::Done,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<Error>() {
                Some(Error::InsufficientContext) => {
                    eprintln!("Not enough indexed context to answer that. Ingest the project or rephrase.");
                }
                _ => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,sqlx=warn"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let cfg: Config = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized at {}.", cfg.db.path.display());
        return Ok(());
    }

    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Project { action } => match action {
            ProjectAction::Add { name, source } => {
                let project = projects::create_project(&app.pool, &name, &source).await?;
                println!("Project #{} {} -> {}", project.id, project.name, project.source);
            }
            ProjectAction::List => {
                for p in projects::list_projects(&app.pool).await? {
                    let ingested = if p.last_ingested_at.is_some() { "ingested" } else { "new" };
                    println!("{:>4}  {:<20} {:<9} {}", p.id, p.name, ingested, p.source);
                }
            }
        },
        Commands::Ingest {
            project,
            source,
            no_queue,
        } => {
            let project = resolve(&app, &project).await?;
            let source = source.unwrap_or_else(|| project.source.clone());

            let report = if no_queue {
                ingest::run_ingestion(&app, project.id, &source, &StderrLogger).await?
            } else {
                let (queue, worker) = IngestQueue::spawn(app.clone(), DEFAULT_QUEUE_DEPTH);
                let mut handle = queue.submit(project.id, source).await?;
                while let Some(line) = handle.logs.recv().await {
                    eprintln!("{}", line);
                }
                let report = handle.wait().await?;
                drop(queue);
                worker.await?;
                report
            };

            let commits = report
                .history
                .as_ref()
                .map(|h| h.commits_added)
                .unwrap_or(0);
            println!(
                "Ingested {}: {} files indexed, {} commits added, {} failures.",
                project.name,
                report.files.indexed,
                commits,
                report.failures()
            );
        }
        Commands::Ask {
            project,
            question,
            conversation,
        } => {
            let project = resolve(&app, &project).await?;
            let turn = answer::ask(&app, project.id, &question, conversation, |delta| {
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            })
            .await?;
            println!();
            if !turn.sources.is_empty() {
                println!();
                println!("Sources:");
                for s in &turn.sources {
                    println!("  [{}] {}", s.source_type.as_str(), s.title);
                }
            }
            eprintln!("(conversation {})", turn.conversation_id);
        }
        Commands::Capture {
            project,
            conversation,
        } => {
            let project = resolve(&app, &project).await?;
            match knowledge::capture_knowledge(&app, project.id, conversation).await? {
                Some(note) => println!("Note #{} ({} links): {}", note.id, note.links, note.content),
                None => println!("Nothing worth recording in conversation {}.", conversation),
            }
        }
        Commands::Notes { project } => {
            let project = resolve(&app, &project).await?;
            for note in knowledge::list_notes(&app.pool, project.id).await? {
                println!("{:>4}  {}", note.id, note.content);
            }
        }
        Commands::Task { action } => task_command(&app, action).await?,
        Commands::Doc { action } => doc_command(&app, action).await?,
        Commands::Stats { project } => {
            let project = resolve(&app, &project).await?;
            let s = stats::project_stats(&app.pool, project.id).await?;
            stats::print_stats(&app.config, &project, &s);
        }
    }

    app.pool.close().await;
    Ok(())
}

async fn resolve(app: &App, key: &str) -> Result<Project> {
    projects::find_project(&app.pool, key).await
}

async fn task_command(app: &App, action: TaskAction) -> Result<()> {
    match action {
        TaskAction::Add {
            project,
            title,
            description,
            category,
        } => {
            let project = resolve(app, &project).await?;
            let mut new = NewTask::open(title, description);
            new.category = category;
            let task = tasks::create_task(
                &app.pool,
                app.gateway.as_ref(),
                app.config.ingest.max_embed_chars,
                project.id,
                new,
            )
            .await?;
            println!("Task #{} created: {}", task.task_number, task.title);
        }
        TaskAction::List { project, status } => {
            let project = resolve(app, &project).await?;
            for t in tasks::list_tasks(&app.pool, project.id, status.map(Into::into)).await? {
                println!(
                    "#{:<4} {:<11} {}{}",
                    t.task_number,
                    t.status.as_str(),
                    t.title,
                    t.category
                        .as_deref()
                        .map(|c| format!("  [{}]", c))
                        .unwrap_or_default()
                );
            }
        }
        TaskAction::Status {
            project,
            number,
            status,
        } => {
            let project = resolve(app, &project).await?;
            let task = tasks::set_task_status(&app.pool, project.id, number, status.into()).await?;
            println!("Task #{} is now {}.", task.task_number, task.status.as_str());
        }
    }
    Ok(())
}

async fn doc_command(app: &App, action: DocAction) -> Result<()> {
    match action {
        DocAction::Add { project, path } => {
            let project = resolve(app, &project).await?;
            let doc = documents::add_document(app, project.id, &path).await?;
            println!(
                "Stored {} ({} chars, {} chunks).",
                doc.file_name, doc.char_count, doc.chunk_count
            );
        }
        DocAction::List { project } => {
            let project = resolve(app, &project).await?;
            for d in documents::list_documents(&app.pool, project.id).await? {
                println!("{:<40} {:>8} chars {:>4} chunks", d.file_name, d.char_count, d.chunk_count);
            }
        }
        DocAction::Remove { project, file_name } => {
            let project = resolve(app, &project).await?;
            if documents::remove_document(&app.pool, project.id, &file_name).await? {
                println!("Removed {}.", file_name);
            } else {
                println!("No document named {}.", file_name);
            }
        }
    }
    Ok(())
}
