//! HTTP surface for the Story orchestration service (§6). Thin: every
//! handler in `routes` validates a request body, calls one `StoryService`
//! method, and maps the result onto JSON. No business logic lives here.

pub mod routes;
pub mod sse;

use aura_core::{AuraError, EventBus};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

use crate::story_service::StoryService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StoryService>,
    pub events: Arc<EventBus>,
}

/// Newtype so we can `impl IntoResponse` for a foreign error type without
/// running afoul of the orphan rule.
pub struct ApiError(pub AuraError);

impl From<AuraError> for ApiError {
    fn from(e: AuraError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ProblemDetail {
    r#type: &'static str,
    title: String,
    status: u16,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ProblemDetail {
            r#type: self.0.problem_type(),
            title: status.canonical_reason().unwrap_or("error").to_string(),
            status: status.as_u16(),
            detail: self.0.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/developer/stories",
            post(routes::create_story).get(routes::list_stories),
        )
        .route(
            "/api/developer/stories/:id",
            get(routes::get_story).delete(routes::delete_story),
        )
        .route("/api/developer/stories/:id/analyze", post(routes::analyze))
        .route("/api/developer/stories/:id/plan", post(routes::plan))
        .route("/api/developer/stories/:id/decompose", post(routes::decompose))
        .route("/api/developer/stories/:id/run", post(routes::run))
        .route("/api/developer/stories/:id/cancel", post(routes::cancel))
        .route("/api/developer/stories/:id/complete", post(routes::complete))
        .route("/api/developer/stories/:id/finalize", post(routes::finalize))
        .route("/api/developer/stories/:id/chat", post(routes::chat))
        .route("/api/developer/stories/:id/stream", get(sse::stream))
        .route("/api/developer/stories/:id/status", patch(routes::reset_status))
        .route("/api/developer/stories/:id/orchestrator", patch(routes::reset_orchestrator))
        .route("/api/developer/stories/:id/steps", post(routes::add_step))
        .route("/api/developer/stories/:id/steps/:step_id", delete(routes::remove_step))
        .route(
            "/api/developer/stories/:id/steps/:step_id/description",
            put(routes::update_step_description),
        )
        .route("/api/developer/stories/:id/steps/:step_id/execute", post(routes::execute_step))
        .route("/api/developer/stories/:id/steps/:step_id/approve", post(routes::approve_step))
        .route("/api/developer/stories/:id/steps/:step_id/reject", post(routes::reject_step))
        .route("/api/developer/stories/:id/steps/:step_id/skip", post(routes::skip_step))
        .route("/api/developer/stories/:id/steps/:step_id/reset", post(routes::reset_step))
        .route("/api/developer/stories/:id/steps/:step_id/chat", post(routes::chat_with_step))
        .route("/api/developer/stories/:id/steps/:step_id/reassign", post(routes::reassign_step))
        .with_state(state)
}
