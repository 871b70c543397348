use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use trustline_agent::SupportRuntime;
use trustline_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    runtime: Arc<SupportRuntime>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, runtime: Arc<SupportRuntime>) -> Self {
        Self { db_pool, runtime }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub knowledge: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Readiness follows the database only. An empty knowledge base still serves
/// the complaint flow and answers policy questions with the fixed fallback.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "trustline-server runtime initialized".to_string(),
        },
        database,
        knowledge: knowledge_check(&state.runtime),
        active_sessions: state.runtime.active_sessions().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn knowledge_check(runtime: &SupportRuntime) -> HealthCheck {
    let index = runtime.knowledge().snapshot();
    if index.is_empty() {
        HealthCheck {
            status: "empty",
            detail: "no knowledge snapshot loaded; run `trustline index`".to_string(),
        }
    } else {
        HealthCheck {
            status: "ready",
            detail: format!(
                "snapshot v{} with {} chunks from {} documents",
                index.version,
                index.chunks.len(),
                index.documents.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use trustline_agent::{PlainTextExtractor, RuntimeDeps, ScriptedLlmClient, SupportRuntime};
    use trustline_core::audit::InMemoryAuditSink;
    use trustline_core::config::AppConfig;
    use trustline_core::knowledge::{Embedder, HashingEmbedder, KnowledgeBase, KnowledgeIndex};
    use trustline_db::{
        connect_with_settings, InMemoryComplaintRepository, InMemoryOrderRepository,
    };

    use crate::health::{health, HealthState};

    fn runtime() -> Arc<SupportRuntime> {
        let config = AppConfig::default();
        let embedder = Arc::new(HashingEmbedder::new(config.embedding.dimensions));
        let runtime = SupportRuntime::new(
            &config,
            RuntimeDeps {
                llm: Arc::new(ScriptedLlmClient::new(Vec::new())),
                knowledge: Arc::new(KnowledgeBase::new(KnowledgeIndex::empty(
                    embedder.model_id(),
                    embedder.dimensions(),
                ))),
                embedder,
                orders: Arc::new(InMemoryOrderRepository::default()),
                complaints: Arc::new(InMemoryComplaintRepository::default()),
                extractor: Arc::new(PlainTextExtractor),
                audit: Arc::new(InMemoryAuditSink::default()),
            },
        )
        .expect("runtime");
        Arc::new(runtime)
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        let runtime = runtime();
        runtime.open_session().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool.clone(), runtime))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");
        assert_eq!(payload.knowledge.status, "empty");
        assert_eq!(payload.active_sessions, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool, runtime()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
