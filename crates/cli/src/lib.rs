pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::complaints::ListOptions;

#[derive(Debug, Parser)]
#[command(
    name = "trustline",
    about = "Trustline operator CLI",
    long_about = "Operate the Trustline support engine: configuration, readiness, migrations, demo data, knowledge indexing, complaints, and a terminal chat.",
    after_help = "Examples:\n  trustline doctor --json\n  trustline index knowledge/\n  trustline complaints list --status open\n  trustline chat"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM client, database, and knowledge snapshot readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo orders (idempotent)")]
    Seed,
    #[command(about = "Index .md and .txt policy documents into a new knowledge snapshot")]
    Index {
        #[arg(help = "Source directory; defaults to knowledge.source_dir")]
        dir: Option<PathBuf>,
    },
    #[command(about = "Talk to the support engine from the terminal (/attach <file>, /quit)")]
    Chat,
    #[command(about = "Review and update filed complaints")]
    Complaints {
        #[command(subcommand)]
        action: ComplaintsAction,
    },
}

#[derive(Debug, Subcommand)]
enum ComplaintsAction {
    #[command(about = "List complaints, newest first")]
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "order")]
        order_id: Option<String>,
        #[arg(long, help = "Created at or after (RFC 3339 or YYYY-MM-DD)")]
        from: Option<String>,
        #[arg(long, help = "Created before (RFC 3339 or YYYY-MM-DD)")]
        to: Option<String>,
    },
    #[command(about = "Show one complaint with its audit trail")]
    Show { id: String },
    #[command(about = "Move a complaint to a new status, appending to its audit trail")]
    Update {
        id: String,
        #[arg(long)]
        status: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, help = "Recorded actor; defaults to `operator`")]
        actor: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Index { dir } => commands::index::run(dir),
        Command::Chat => commands::chat::run(),
        Command::Complaints { action } => match action {
            ComplaintsAction::List { status, category, order_id, from, to } => {
                commands::complaints::list(ListOptions { status, category, order_id, from, to })
            }
            ComplaintsAction::Show { id } => commands::complaints::show(id),
            ComplaintsAction::Update { id, status, notes, actor } => {
                commands::complaints::update(id, status, notes, actor)
            }
        },
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
