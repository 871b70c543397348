use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use crate::domain::knowledge::SourceDocument;
use crate::knowledge::index::KnowledgeIndex;
use crate::knowledge::indexer::{IndexReport, KnowledgeIndexer};

/// Shared handle to the current index snapshot.
///
/// Readers clone the `Arc` and keep using that snapshot for the whole query;
/// a refresh builds a new snapshot off to the side and swaps the handle in one
/// step. Refreshes are serialized so two of them never race on the same base
/// version.
pub struct KnowledgeBase {
    current: RwLock<Arc<KnowledgeIndex>>,
    refresh_lock: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(index: KnowledgeIndex) -> Self {
        Self { current: RwLock::new(Arc::new(index)), refresh_lock: Mutex::new(()) }
    }

    pub fn snapshot(&self) -> Arc<KnowledgeIndex> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Publishes `index` and returns the snapshot it replaced.
    pub fn swap(&self, index: KnowledgeIndex) -> Arc<KnowledgeIndex> {
        let next = Arc::new(index);
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = std::mem::replace(&mut *guard, next);
        info!(
            event_name = "knowledge.snapshot_swapped",
            previous_version = previous.version,
            version = guard.version,
            "knowledge snapshot published"
        );
        previous
    }

    pub async fn refresh(
        &self,
        indexer: &KnowledgeIndexer,
        changed: &[SourceDocument],
    ) -> (Arc<KnowledgeIndex>, IndexReport) {
        let _serialized = self.refresh_lock.lock().await;
        let base = self.snapshot();
        let (next, report) = indexer.refresh_index(&base, changed).await;
        self.swap(next);
        (self.snapshot(), report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::KnowledgeBase;
    use crate::domain::knowledge::SourceDocument;
    use crate::knowledge::chunker::ChunkingSettings;
    use crate::knowledge::embedding::HashingEmbedder;
    use crate::knowledge::indexer::KnowledgeIndexer;

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_a_refresh() {
        let indexer =
            KnowledgeIndexer::new(Arc::new(HashingEmbedder::new(32)), ChunkingSettings::default());
        let base = KnowledgeBase::new(indexer.empty_index());
        let before = base.snapshot();

        let (after, report) = base
            .refresh(
                &indexer,
                &[SourceDocument::from_text("faq", "FAQ", "v1", "We deliver across Jordan.")],
            )
            .await;

        assert!(report.is_clean());
        assert!(before.is_empty(), "held snapshot is never mutated");
        assert_eq!(before.version, 0);
        assert_eq!(after.version, 1);
        assert_eq!(base.snapshot().chunks.len(), after.chunks.len());
    }

    #[tokio::test]
    async fn concurrent_refreshes_each_advance_the_version() {
        let indexer = Arc::new(KnowledgeIndexer::new(
            Arc::new(HashingEmbedder::new(32)),
            ChunkingSettings::default(),
        ));
        let base = Arc::new(KnowledgeBase::new(indexer.empty_index()));

        let mut handles = Vec::new();
        for index in 0..4 {
            let base = Arc::clone(&base);
            let indexer = Arc::clone(&indexer);
            handles.push(tokio::spawn(async move {
                let document = SourceDocument::from_text(
                    format!("doc-{index}"),
                    "Doc",
                    "v1",
                    format!("Policy number {index} applies."),
                );
                base.refresh(&indexer, &[document]).await;
            }));
        }
        for handle in handles {
            handle.await.expect("refresh task completes");
        }

        let snapshot = base.snapshot();
        assert_eq!(snapshot.version, 4);
        assert_eq!(snapshot.documents.len(), 4);
    }
}
