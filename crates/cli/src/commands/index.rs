use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use trustline_agent::embedder_from_config;
use trustline_core::domain::knowledge::{DocumentId, SourceDocument};
use trustline_core::knowledge::{content_hash, IndexReport, KnowledgeIndexer};
use trustline_db::{KnowledgeRepository, RepositoryError, SqlKnowledgeRepository};
use tracing::info;
use walkdir::WalkDir;

use crate::commands::{async_runtime, load_config, migrated_pool, CommandResult, StepError};

const INDEXABLE_EXTENSIONS: [&str; 2] = ["md", "txt"];

pub fn run(source: Option<PathBuf>) -> CommandResult {
    let config = match load_config("index") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let source_dir = source.unwrap_or_else(|| config.knowledge.source_dir.clone());

    let documents = match collect_documents(&source_dir) {
        Ok(documents) if documents.is_empty() => {
            return CommandResult::failure(
                "index",
                "knowledge_source",
                format!("no .md or .txt documents under `{}`", source_dir.display()),
                7,
            );
        }
        Ok(documents) => documents,
        Err(error) => {
            return CommandResult::failure(
                "index",
                "knowledge_source",
                format!("cannot read `{}`: {error}", source_dir.display()),
                7,
            );
        }
    };

    let runtime = match async_runtime("index") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let embedder = embedder_from_config(&config)
            .map_err(|error| ("embedder", error.to_string(), 7u8))?;
        let indexer = KnowledgeIndexer::new(embedder, config.knowledge.chunking());
        let pool = migrated_pool(&config).await?;
        let snapshots = SqlKnowledgeRepository::new(pool.clone());

        let report: Result<IndexReport, StepError> = index_documents(&indexer, &snapshots, &documents)
            .await
            .map_err(|error| ("snapshot_persistence", error.to_string(), 5u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => CommandResult::success("index", summarize(&report)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("index", error_class, message, exit_code)
        }
    }
}

/// Every `.md` and `.txt` file under `root`, keyed by its relative path without
/// extension. Hidden entries are ignored.
pub fn collect_documents(root: &Path) -> io::Result<Vec<SourceDocument>> {
    let mut documents = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_indexable(entry.path()) {
            continue;
        }
        let body = fs::read(entry.path())?;
        let id = document_id(root, entry.path());
        documents.push(SourceDocument {
            title: document_title(&body, entry.path()),
            version: content_hash(&body).trim_start_matches("sha256:").chars().take(12).collect(),
            id,
            body,
        });
    }
    Ok(documents)
}

/// Refreshes the latest snapshot with `documents` as the complete source set:
/// unchanged documents keep their chunks and documents no longer present are
/// retired. The result is persisted as a new snapshot version.
pub async fn index_documents(
    indexer: &KnowledgeIndexer,
    snapshots: &dyn KnowledgeRepository,
    documents: &[SourceDocument],
) -> Result<IndexReport, RepositoryError> {
    let base = snapshots.load_latest().await?.unwrap_or_else(|| indexer.empty_index());
    let removed: Vec<DocumentId> = base
        .documents
        .keys()
        .filter(|id| documents.iter().all(|document| &document.id != *id))
        .cloned()
        .collect();

    let (mut index, mut report) = indexer.refresh_index(&base, documents).await;
    if !removed.is_empty() {
        let (retired_index, retired) = indexer.retire_documents(&index, &removed, Utc::now());
        index = retired_index;
        report.version = index.version;
        report.retired.extend(retired.retired);
        report.chunks_retired += retired.chunks_retired;
    }

    snapshots.save_snapshot(&index).await?;
    info!(
        event_name = "cli.index.snapshot_saved",
        version = index.version,
        documents = index.documents.len(),
        chunks = index.chunks.len(),
        skipped = report.skipped.len(),
        "knowledge snapshot saved"
    );
    Ok(report)
}

fn summarize(report: &IndexReport) -> String {
    let mut lines = vec![format!(
        "knowledge snapshot v{}: {} indexed, {} unchanged, {} retired, {} skipped ({} chunks created, {} retired)",
        report.version,
        report.indexed.len(),
        report.retained.len(),
        report.retired.len(),
        report.skipped.len(),
        report.chunks_created,
        report.chunks_retired,
    )];
    for skipped in &report.skipped {
        lines.push(format!("  - skipped {}: {}", skipped.document_id, skipped.reason));
    }
    lines.join("\n")
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn is_indexable(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| {
            INDEXABLE_EXTENSIONS.iter().any(|known| extension.eq_ignore_ascii_case(known))
        })
}

fn document_id(root: &Path, path: &Path) -> DocumentId {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    DocumentId(parts.join("/"))
}

/// First markdown heading, else the file stem.
fn document_title(body: &[u8], path: &Path) -> String {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use trustline_core::knowledge::{ChunkingSettings, HashingEmbedder, KnowledgeIndexer};
    use trustline_db::{InMemoryKnowledgeRepository, KnowledgeRepository};

    use super::{collect_documents, index_documents};

    fn indexer() -> KnowledgeIndexer {
        KnowledgeIndexer::new(
            Arc::new(HashingEmbedder::new(64)),
            ChunkingSettings { max_chars: 200, overlap_chars: 20 },
        )
    }

    #[test]
    fn collects_markdown_and_text_with_relative_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("ar")).expect("mkdir");
        fs::create_dir_all(dir.path().join(".drafts")).expect("mkdir");
        fs::write(dir.path().join("refund-policy.md"), "# Refund policy\n\nRefunds within 14 days.")
            .expect("write");
        fs::write(dir.path().join("ar/delivery.txt"), "التوصيل خلال يومين").expect("write");
        fs::write(dir.path().join("logo.png"), [0x89, 0x50]).expect("write");
        fs::write(dir.path().join(".drafts/secret.md"), "# Draft").expect("write");

        let documents = collect_documents(dir.path()).expect("collect");
        let ids: Vec<&str> = documents.iter().map(|document| document.id.0.as_str()).collect();

        assert_eq!(ids, vec!["ar/delivery", "refund-policy"]);
        assert_eq!(documents[1].title, "Refund policy");
        assert_eq!(documents[0].title, "delivery");
        assert_eq!(documents[0].version.len(), 12);
    }

    #[tokio::test]
    async fn reindexing_keeps_unchanged_documents_and_retires_removed_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("refund.md"), "# Refunds\n\nRefunds are issued within 14 days.")
            .expect("write");
        fs::write(dir.path().join("privacy.md"), "# Privacy\n\nPhone numbers are masked.")
            .expect("write");
        let indexer = indexer();
        let snapshots = InMemoryKnowledgeRepository::default();

        let first = index_documents(&indexer, &snapshots, &collect_documents(dir.path()).expect("collect"))
            .await
            .expect("first run");
        assert_eq!(first.indexed.len(), 2);

        fs::remove_file(dir.path().join("privacy.md")).expect("remove");
        let second = index_documents(&indexer, &snapshots, &collect_documents(dir.path()).expect("collect"))
            .await
            .expect("second run");
        assert!(second.indexed.is_empty());
        assert_eq!(second.retained.len(), 1);
        assert_eq!(second.retired.len(), 1);

        let latest = snapshots.load_latest().await.expect("load").expect("snapshot");
        assert_eq!(latest.version, second.version);
        assert_eq!(latest.documents.len(), 1);
        assert!(latest.chunks.iter().all(|chunk| chunk.document_id.0 == "refund"));
    }
}
