use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use trustline_agent::{
    client_from_config, embedder_from_config, PlainTextExtractor, RuntimeDeps, SupportRuntime,
    TurnReply,
};
use trustline_core::audit::TracingAuditSink;
use trustline_core::config::AppConfig;
use trustline_core::knowledge::{KnowledgeBase, KnowledgeIndex};
use trustline_db::{
    DbPool, KnowledgeRepository, SqlComplaintRepository, SqlKnowledgeRepository,
    SqlOrderRepository,
};

use crate::commands::{async_runtime, load_config, migrated_pool, CommandResult, StepError};

const QUIT_COMMANDS: [&str; 2] = ["/quit", "/exit"];
const ATTACH_COMMAND: &str = "/attach";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub turns: usize,
    pub complaints_filed: Vec<String>,
}

pub fn run() -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let setup = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let support = build_runtime(&config, &pool).await?;
        Ok::<_, StepError>((pool, support))
    });
    let (pool, support) = match setup {
        Ok(setup) => setup,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("chat", error_class, message, exit_code);
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let outcome = converse(&runtime, &support, stdin.lock(), &mut stdout);
    runtime.block_on(pool.close());

    match outcome {
        Ok(summary) => CommandResult::success(
            "chat",
            format!(
                "chat closed after {} turns; complaints filed: {}",
                summary.turns,
                if summary.complaints_filed.is_empty() {
                    "none".to_string()
                } else {
                    summary.complaints_filed.join(", ")
                }
            ),
        ),
        Err(error) => CommandResult::failure("chat", "terminal_io", error.to_string(), 1),
    }
}

/// Wires a support runtime over the SQLite repositories and the latest
/// compatible knowledge snapshot.
pub async fn build_runtime(config: &AppConfig, pool: &DbPool) -> Result<SupportRuntime, StepError> {
    let embedder =
        embedder_from_config(config).map_err(|error| ("embedder", error.to_string(), 7u8))?;
    let llm = client_from_config(&config.llm).map_err(|error| ("llm_client", error.to_string(), 7u8))?;

    let index = SqlKnowledgeRepository::new(pool.clone())
        .load_latest()
        .await
        .map_err(|error| ("snapshot_load", error.to_string(), 5u8))?
        .filter(|index| {
            index.embedding_model == embedder.model_id() && index.dimensions == embedder.dimensions()
        })
        .unwrap_or_else(|| KnowledgeIndex::empty(embedder.model_id(), embedder.dimensions()));

    SupportRuntime::new(
        config,
        RuntimeDeps {
            llm,
            embedder,
            knowledge: Arc::new(KnowledgeBase::new(index)),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            complaints: Arc::new(SqlComplaintRepository::new(pool.clone())),
            extractor: Arc::new(PlainTextExtractor),
            audit: Arc::new(TracingAuditSink),
        },
    )
    .map_err(|error| ("runtime_init", error.to_string(), 7u8))
}

/// Reads customer lines from `input` until EOF or `/quit`. `/attach <path>`
/// uploads a file into the complaint being drafted.
pub fn converse(
    runtime: &tokio::runtime::Runtime,
    support: &SupportRuntime,
    input: impl BufRead,
    output: &mut impl Write,
) -> io::Result<ChatSummary> {
    let mut summary = ChatSummary::default();
    let greeting = runtime.block_on(support.open_session());
    let mut session = greeting.session_id.clone();
    render(output, &greeting)?;

    for line in input.lines() {
        let line = line?;
        let text = line.trim();
        if QUIT_COMMANDS.contains(&text) {
            break;
        }
        if text.is_empty() {
            continue;
        }

        let turn = match text.strip_prefix(ATTACH_COMMAND) {
            Some(path) => match fs::read(path.trim()) {
                Ok(bytes) => runtime.block_on(support.handle_attachment(
                    &session,
                    &bytes,
                    media_type_for(Path::new(path.trim())),
                )),
                Err(error) => {
                    writeln!(output, "! cannot read {}: {error}", path.trim())?;
                    continue;
                }
            },
            None => runtime.block_on(support.handle_message(Some(&session), text)),
        };

        match turn {
            Ok(reply) => {
                summary.turns += 1;
                if let Some(complaint) = &reply.complaint_id {
                    summary.complaints_filed.push(complaint.0.clone());
                }
                session = reply.session_id.clone();
                render(output, &reply)?;
            }
            Err(error) => {
                // Expired or closed: carry on in a fresh session.
                writeln!(output, "! {error}")?;
                let reopened = runtime.block_on(support.open_session());
                session = reopened.session_id.clone();
                render(output, &reopened)?;
            }
        }
    }

    runtime.block_on(support.close_session(&session));
    Ok(summary)
}

fn render(output: &mut impl Write, reply: &TurnReply) -> io::Result<()> {
    writeln!(output, "assistant [{}]> {}", reply.state, reply.reply)?;
    for citation in &reply.citations {
        match &citation.section_title {
            Some(section) => writeln!(output, "    source: {} ({section})", citation.document_id)?,
            None => writeln!(output, "    source: {}", citation.document_id)?,
        }
    }
    output.flush()
}

fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some(extension) if extension.eq_ignore_ascii_case("txt") => "text/plain",
        Some(extension) if extension.eq_ignore_ascii_case("md") => "text/markdown",
        Some(extension) if extension.eq_ignore_ascii_case("pdf") => "application/pdf",
        Some(extension) if extension.eq_ignore_ascii_case("png") => "image/png",
        Some(extension) if extension.eq_ignore_ascii_case("jpg") || extension.eq_ignore_ascii_case("jpeg") => {
            "image/jpeg"
        }
        _ => "application/octet-stream",
    }
}
