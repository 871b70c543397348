use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use trustline_agent::llm::{client_from_config, embedder_from_config, LlmError};
use trustline_agent::{PlainTextExtractor, RuntimeDeps, RuntimeError, SupportRuntime};
use trustline_core::audit::TracingAuditSink;
use trustline_core::config::{AppConfig, ConfigError, LoadOptions};
use trustline_core::knowledge::{Embedder, KnowledgeBase, KnowledgeIndex};
use trustline_db::{
    connect_from_config, migrations, ComplaintRepository, DbPool, KnowledgeRepository,
    RepositoryError, SqlComplaintRepository, SqlKnowledgeRepository, SqlOrderRepository,
};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<SupportRuntime>,
    pub complaints: Arc<dyn ComplaintRepository>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("knowledge snapshot could not be loaded: {0}")]
    Knowledge(#[source] RepositoryError),
    #[error("text generation client could not be built: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let embedder = embedder_from_config(&config)?;
    let snapshots = SqlKnowledgeRepository::new(db_pool.clone());
    let index = load_knowledge(&snapshots, embedder.as_ref()).await?;
    info!(
        event_name = "system.bootstrap.knowledge_loaded",
        correlation_id = "bootstrap",
        version = index.version,
        chunks = index.chunks.len(),
        "knowledge snapshot loaded"
    );

    let complaints: Arc<dyn ComplaintRepository> =
        Arc::new(SqlComplaintRepository::new(db_pool.clone()));
    let runtime = SupportRuntime::new(
        &config,
        RuntimeDeps {
            llm: client_from_config(&config.llm)?,
            embedder,
            knowledge: Arc::new(KnowledgeBase::new(index)),
            orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
            complaints: Arc::clone(&complaints),
            extractor: Arc::new(PlainTextExtractor),
            audit: Arc::new(TracingAuditSink),
        },
    )?;

    Ok(Application { config, db_pool, runtime: Arc::new(runtime), complaints })
}

/// Latest persisted snapshot, or an empty index when none exists or the
/// snapshot was embedded with a different model.
async fn load_knowledge(
    snapshots: &dyn KnowledgeRepository,
    embedder: &dyn Embedder,
) -> Result<KnowledgeIndex, BootstrapError> {
    let latest = snapshots.load_latest().await.map_err(BootstrapError::Knowledge)?;
    match latest {
        Some(index)
            if index.embedding_model == embedder.model_id()
                && index.dimensions == embedder.dimensions() =>
        {
            Ok(index)
        }
        Some(index) => {
            warn!(
                event_name = "system.bootstrap.knowledge_incompatible",
                correlation_id = "bootstrap",
                snapshot_model = %index.embedding_model,
                embedder_model = %embedder.model_id(),
                "knowledge snapshot was built with another embedder; run `trustline index` again"
            );
            Ok(KnowledgeIndex::empty(embedder.model_id(), embedder.dimensions()))
        }
        None => Ok(KnowledgeIndex::empty(embedder.model_id(), embedder.dimensions())),
    }
}
