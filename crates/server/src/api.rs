//! JSON API.
//!
//! Chat endpoints:
//! - `POST   /api/sessions`                       open a session, returns the greeting
//! - `POST   /api/sessions/{id}/messages`         one customer turn
//! - `POST   /api/sessions/{id}/attachments`      raw attachment body, media type from `Content-Type`
//! - `DELETE /api/sessions/{id}`                  close a session
//!
//! Admin endpoints (read everything, write status only):
//! - `GET    /api/admin/complaints`               filter by status, category, date range, order
//! - `GET    /api/admin/complaints/{id}`          record plus audit trail
//! - `POST   /api/admin/complaints/{id}/status`   status change with optional notes

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use trustline_agent::attachments::MAX_ATTACHMENT_BYTES;
use trustline_agent::{SupportRuntime, TurnReply};
use trustline_core::dialogue::SessionId;
use trustline_core::domain::complaint::{
    ComplaintAuditEntry, ComplaintCategory, ComplaintFilter, ComplaintId, ComplaintRecord,
    ComplaintStatus,
};
use trustline_core::domain::order::OrderId;
use trustline_core::errors::{ApplicationError, InterfaceError};
use trustline_db::ComplaintRepository;

const ADMIN_ACTOR: &str = "admin";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<SupportRuntime>,
    complaints: Arc<dyn ComplaintRepository>,
}

impl ApiState {
    pub fn new(runtime: Arc<SupportRuntime>, complaints: Arc<dyn ComplaintRepository>) -> Self {
        Self { runtime, complaints }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComplaintQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    pub notes: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ComplaintDetail {
    pub complaint: ComplaintRecord,
    pub audit_trail: Vec<ComplaintAuditEntry>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: Option<String>,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: Uuid::new_v4().to_string(),
        })
    }
}

impl<E> From<E> for ApiError
where
    E: Into<ApplicationError>,
{
    fn from(error: E) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        let error: ApplicationError = error.into();
        warn!(
            event_name = "api.request_failed",
            correlation_id = %correlation_id,
            error = %error,
            "request failed"
        );
        Self(error.into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            InterfaceError::BadRequest { message, .. } | InterfaceError::NotFound { message, .. } => {
                Some(message.clone())
            }
            _ => None,
        };
        let body = ErrorBody {
            error: self.0.user_message(),
            detail,
            correlation_id: self.0.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/sessions", post(open_session))
        .route("/api/sessions/{id}", delete(close_session))
        .route("/api/sessions/{id}/messages", post(post_message))
        .route(
            "/api/sessions/{id}/attachments",
            post(post_attachment).layer(DefaultBodyLimit::max(MAX_ATTACHMENT_BYTES * 2)),
        )
        .route("/api/admin/complaints", get(list_complaints))
        .route("/api/admin/complaints/{id}", get(show_complaint))
        .route("/api/admin/complaints/{id}/status", post(update_complaint_status))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

async fn open_session(State(state): State<ApiState>) -> (StatusCode, Json<TurnReply>) {
    let reply = state.runtime.open_session().await;
    (StatusCode::CREATED, Json(reply))
}

async fn post_message(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let reply = state.runtime.handle_message(Some(&SessionId(id)), &request.text).await?;
    Ok(Json(reply))
}

async fn post_attachment(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TurnReply>, ApiError> {
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let reply = state.runtime.handle_attachment(&SessionId(id), &body, media_type).await?;
    Ok(Json(reply))
}

async fn close_session(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<StatusCode, ApiError> {
    if state.runtime.close_session(&SessionId(id.clone())).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApplicationError::NotFound { entity: "session", id }.into())
    }
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

impl ComplaintQuery {
    fn into_filter(self) -> Result<ComplaintFilter, ApiError> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(
                ComplaintStatus::parse(raw)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown status `{raw}`")))?,
            ),
            None => None,
        };
        let category = match self.category.as_deref() {
            Some(raw) => Some(
                ComplaintCategory::parse(raw)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown category `{raw}`")))?,
            ),
            None => None,
        };
        Ok(ComplaintFilter {
            status,
            category,
            created_from: self.created_from,
            created_to: self.created_to,
            order_id: self.order_id.map(OrderId),
        })
    }
}

async fn list_complaints(
    State(state): State<ApiState>,
    Query(query): Query<ComplaintQuery>,
) -> Result<Json<Vec<ComplaintRecord>>, ApiError> {
    let filter = query.into_filter()?;
    let records = state.complaints.list(&filter).await?;
    Ok(Json(records))
}

async fn show_complaint(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<ComplaintDetail>, ApiError> {
    let id = ComplaintId(id);
    let complaint = state
        .complaints
        .find_by_id(&id)
        .await?
        .ok_or_else(|| ApplicationError::NotFound { entity: "complaint", id: id.0.clone() })?;
    let audit_trail = state.complaints.audit_trail(&id).await?;
    Ok(Json(ComplaintDetail { complaint, audit_trail }))
}

async fn update_complaint_status(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<ComplaintAuditEntry>, ApiError> {
    let status = ComplaintStatus::parse(&request.status)
        .ok_or_else(|| ApiError::bad_request(format!("unknown status `{}`", request.status)))?;
    let actor = request
        .actor
        .as_deref()
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .unwrap_or(ADMIN_ACTOR)
        .to_owned();
    let notes = request.notes.filter(|notes| !notes.trim().is_empty());

    let entry = state.complaints.update_status(&ComplaintId(id), status, notes, &actor).await?;
    info!(
        event_name = "admin.complaint_status_updated",
        complaint_id = %entry.complaint_id,
        to_status = %entry.to_status,
        sequence = entry.sequence,
        actor = %entry.actor,
        "complaint status updated"
    );
    Ok(Json(entry))
}
