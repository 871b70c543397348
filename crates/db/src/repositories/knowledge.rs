use std::collections::BTreeMap;

use sqlx::Row;
use tracing::info;

use trustline_core::domain::knowledge::{
    ChunkId, ChunkMetadata, DocumentId, KnowledgeChunk,
};
use trustline_core::knowledge::{IndexedDocument, KnowledgeIndex};

use super::{format_timestamp, parse_timestamp, KnowledgeRepository, RepositoryError};
use crate::DbPool;

/// Persists index snapshots as a chunk table plus a vector table, keyed by
/// snapshot version. Saved snapshots are never modified.
pub struct SqlKnowledgeRepository {
    pool: DbPool,
}

impl SqlKnowledgeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Decode(format!("{what} out of range")))
}

#[async_trait::async_trait]
impl KnowledgeRepository for SqlKnowledgeRepository {
    async fn save_snapshot(&self, index: &KnowledgeIndex) -> Result<(), RepositoryError> {
        let version = to_i64(index.version, "snapshot version")?;
        let documents: Vec<&IndexedDocument> = index.documents.values().collect();
        let documents_json = serde_json::to_string(&documents)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO knowledge_snapshot (version, built_at, embedding_model, dimensions, documents_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(version)
        .bind(format_timestamp(index.built_at))
        .bind(&index.embedding_model)
        .bind(to_i64(index.dimensions as u64, "dimensions")?)
        .bind(&documents_json)
        .execute(&mut *tx)
        .await?;

        for chunk in &index.chunks {
            sqlx::query(
                "INSERT INTO knowledge_chunk
                     (snapshot_version, chunk_id, document_id, ordinal, text, section_title,
                      document_version, indexed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(version)
            .bind(&chunk.id.0)
            .bind(&chunk.document_id.0)
            .bind(i64::from(chunk.metadata.ordinal))
            .bind(&chunk.text)
            .bind(&chunk.metadata.section_title)
            .bind(&chunk.metadata.document_version)
            .bind(format_timestamp(chunk.metadata.indexed_at))
            .execute(&mut *tx)
            .await?;

            let vector_json = serde_json::to_string(&chunk.embedding)
                .map_err(|error| RepositoryError::Decode(error.to_string()))?;
            sqlx::query(
                "INSERT INTO knowledge_vector (snapshot_version, chunk_id, vector_json)
                 VALUES (?, ?, ?)",
            )
            .bind(version)
            .bind(&chunk.id.0)
            .bind(&vector_json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            event_name = "knowledge.snapshot_saved",
            version = index.version,
            chunks = index.chunks.len(),
            "knowledge snapshot persisted"
        );
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<KnowledgeIndex>, RepositoryError> {
        let latest: Option<i64> =
            sqlx::query("SELECT MAX(version) AS version FROM knowledge_snapshot")
                .fetch_one(&self.pool)
                .await?
                .try_get("version")?;
        match latest {
            Some(version) => self.load_version(version as u64).await,
            None => Ok(None),
        }
    }

    async fn load_version(&self, version: u64) -> Result<Option<KnowledgeIndex>, RepositoryError> {
        let version_key = to_i64(version, "snapshot version")?;
        let Some(snapshot) = sqlx::query(
            "SELECT version, built_at, embedding_model, dimensions, documents_json
             FROM knowledge_snapshot WHERE version = ?",
        )
        .bind(version_key)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let built_at: String = snapshot.try_get("built_at")?;
        let dimensions: i64 = snapshot.try_get("dimensions")?;
        let documents_json: String = snapshot.try_get("documents_json")?;
        let documents: Vec<IndexedDocument> = serde_json::from_str(&documents_json)
            .map_err(|error| RepositoryError::Decode(format!("documents_json: {error}")))?;

        let rows = sqlx::query(
            "SELECT c.chunk_id, c.document_id, c.ordinal, c.text, c.section_title,
                    c.document_version, c.indexed_at, v.vector_json
             FROM knowledge_chunk c
             JOIN knowledge_vector v
               ON v.snapshot_version = c.snapshot_version AND v.chunk_id = c.chunk_id
             WHERE c.snapshot_version = ?
             ORDER BY c.document_id ASC, c.ordinal ASC",
        )
        .bind(version_key)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let ordinal: i64 = row.try_get("ordinal")?;
            let indexed_at: String = row.try_get("indexed_at")?;
            let vector_json: String = row.try_get("vector_json")?;
            chunks.push(KnowledgeChunk {
                id: ChunkId(row.try_get("chunk_id")?),
                document_id: DocumentId(row.try_get("document_id")?),
                text: row.try_get("text")?,
                embedding: serde_json::from_str(&vector_json)
                    .map_err(|error| RepositoryError::Decode(format!("vector_json: {error}")))?,
                metadata: ChunkMetadata {
                    section_title: row.try_get("section_title")?,
                    document_version: row.try_get("document_version")?,
                    indexed_at: parse_timestamp(&indexed_at, "indexed_at")?,
                    ordinal: u32::try_from(ordinal)
                        .map_err(|_| RepositoryError::Decode("ordinal out of range".to_owned()))?,
                },
            });
        }

        Ok(Some(KnowledgeIndex {
            version,
            built_at: parse_timestamp(&built_at, "built_at")?,
            embedding_model: snapshot.try_get("embedding_model")?,
            dimensions: usize::try_from(dimensions)
                .map_err(|_| RepositoryError::Decode("dimensions out of range".to_owned()))?,
            documents: documents
                .into_iter()
                .map(|document| (document.id.clone(), document))
                .collect::<BTreeMap<_, _>>(),
            chunks,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trustline_core::domain::knowledge::SourceDocument;
    use trustline_core::knowledge::{ChunkingSettings, HashingEmbedder, KnowledgeIndexer};

    use super::SqlKnowledgeRepository;
    use crate::repositories::KnowledgeRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn latest_snapshot_round_trips_chunks_and_vectors() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlKnowledgeRepository::new(pool);
        assert!(repo.load_latest().await.expect("load").is_none());

        let indexer = KnowledgeIndexer::new(
            Arc::new(HashingEmbedder::new(16)),
            ChunkingSettings { max_chars: 60, overlap_chars: 10 },
        );
        let (first, _) = indexer
            .build_index(&[
                SourceDocument::from_text(
                    "refunds",
                    "Refunds",
                    "v1",
                    "# Refunds\nRefunds are issued within 14 days. Items must be unused and boxed.",
                ),
                SourceDocument::from_text("faq", "FAQ", "v1", "We deliver across Jordan."),
            ])
            .await;
        repo.save_snapshot(&first).await.expect("save v1");

        let (second, _) = indexer
            .refresh_index(
                &first,
                &[SourceDocument::from_text("faq", "FAQ", "v2", "We deliver across Jordan daily.")],
            )
            .await;
        repo.save_snapshot(&second).await.expect("save v2");

        let loaded = repo.load_latest().await.expect("load").expect("snapshot exists");
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.documents, second.documents);
        assert_eq!(loaded.chunks.len(), second.chunks.len());
        for (stored, original) in loaded.chunks.iter().zip(&second.chunks) {
            assert_eq!(stored.id, original.id);
            assert_eq!(stored.text, original.text);
            assert_eq!(stored.embedding, original.embedding);
            assert_eq!(stored.metadata.section_title, original.metadata.section_title);
        }

        let older = repo.load_version(1).await.expect("load v1").expect("v1 kept");
        assert_eq!(older.chunks.len(), first.chunks.len());
    }
}
