//! Request/response DTOs and handlers for `/api/developer/stories*` (§6).

use super::{ApiError, ApiResult, AppState};
use aura_core::{AutomationMode, DispatchTarget, IssueLink, Step, Story, StoryStatus};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

fn parse_issue_url(url: &str) -> Option<IssueLink> {
    // Expected shape: https://github.com/{owner}/{repo}/issues/{n}
    let trimmed = url.trim_end_matches('/');
    let parts: Vec<&str> = trimmed.rsplitn(4, '/').collect();
    if parts.len() < 4 || parts[1] != "issues" {
        return None;
    }
    let issue_number: u64 = parts[0].parse().ok()?;
    Some(IssueLink {
        provider: "github".into(),
        owner: parts[3].to_string(),
        repo: parts[2].to_string(),
        issue_number,
        url: url.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStoryBody {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repository_path: String,
    #[serde(default)]
    pub automation_mode: Option<AutomationMode>,
    #[serde(default)]
    pub dispatch_target: Option<DispatchTarget>,
    #[serde(default)]
    pub issue_url: Option<String>,
}

pub async fn create_story(
    State(state): State<AppState>,
    Json(body): Json<CreateStoryBody>,
) -> ApiResult<(StatusCode, Json<Story>)> {
    let story = state
        .service
        .create(
            body.title,
            body.description,
            body.repository_path,
            body.automation_mode.unwrap_or(AutomationMode::Assisted),
            body.dispatch_target.unwrap_or(DispatchTarget::Internal),
            body.issue_url.as_deref().and_then(parse_issue_url),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(story)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListStoriesQuery {
    pub status: Option<StoryStatus>,
    pub repository_path: Option<String>,
}

pub async fn list_stories(
    State(state): State<AppState>,
    Query(query): Query<ListStoriesQuery>,
) -> Json<Vec<Story>> {
    Json(state.service.list(query.status, query.repository_path.as_deref()).await)
}

#[derive(Debug, Serialize)]
pub struct StoryWithSteps {
    #[serde(flatten)]
    pub story: Story,
    pub steps: Vec<Step>,
}

pub async fn get_story(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryWithSteps>> {
    let (story, steps) = state.service.get_with_steps(&id).await?;
    Ok(Json(StoryWithSteps { story, steps }))
}

pub async fn delete_story(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct StoryOpResponse {
    pub message: String,
    pub story: Story,
}

fn op_response(message: impl Into<String>, story: Story) -> Json<StoryOpResponse> {
    Json(StoryOpResponse {
        message: message.into(),
        story,
    })
}

pub async fn analyze(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    let story = state.service.analyze(&id).await?;
    Ok(op_response("story analyzed", story))
}

pub async fn plan(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    let story = state.service.plan(&id).await?;
    Ok(op_response("plan generated", story))
}

pub async fn decompose(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    let story = state.service.decompose(&id).await?;
    Ok(op_response("plan decomposed into waves", story))
}

pub async fn run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    state.service.run(&id).await?;
    let story = state.service.get(&id).await?;
    Ok(op_response("run started", story))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    state.service.cancel(&id).await?;
    let story = state.service.get(&id).await?;
    Ok(op_response("run cancelled", story))
}

pub async fn complete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<StoryOpResponse>> {
    let story = state.service.complete(&id).await?;
    Ok(op_response("story marked complete", story))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeBody {
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub create_pr: bool,
    #[serde(default)]
    pub labels: Vec<String>,
}

pub async fn finalize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<FinalizeBody>,
) -> ApiResult<Json<StoryOpResponse>> {
    let story = state
        .service
        .finalize(&id, body.commit_message, body.create_pr, body.labels)
        .await?;
    Ok(op_response("story finalized", story))
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
}

pub async fn chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<crate::story_service::ChatOutcome>> {
    let outcome = state.service.chat(&id, body.message).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ResetStatusBody {
    pub target: StoryStatus,
}

pub async fn reset_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResetStatusBody>,
) -> ApiResult<Json<Story>> {
    let story = state.service.reset_status(&id, body.target).await?;
    Ok(Json(story))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResetOrchestratorBody {
    #[serde(default)]
    pub reset_failed_tasks: bool,
}

pub async fn reset_orchestrator(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResetOrchestratorBody>,
) -> ApiResult<Json<Story>> {
    let story = state.service.reset_orchestrator(&id, body.reset_failed_tasks).await?;
    Ok(Json(story))
}

#[derive(Debug, Deserialize)]
pub struct AddStepBody {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub description: String,
}

pub async fn add_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AddStepBody>,
) -> ApiResult<(StatusCode, Json<Step>)> {
    let step = state
        .service
        .add_step(&id, body.name, body.capability, body.language, body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(step)))
}

pub async fn remove_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.service.remove_step(&id, &step_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateDescriptionBody {
    pub description: String,
}

pub async fn update_step_description(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<UpdateDescriptionBody>,
) -> ApiResult<Json<Step>> {
    let step = state.service.update_step_description(&id, &step_id, body.description).await?;
    Ok(Json(step))
}

pub async fn execute_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
) -> ApiResult<Json<Step>> {
    let step = state.service.execute_step(&id, &step_id).await?;
    Ok(Json(step))
}

#[derive(Debug, Deserialize, Default)]
pub struct ApprovalBody {
    #[serde(default)]
    pub feedback: Option<String>,
}

pub async fn approve_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<ApprovalBody>,
) -> ApiResult<Json<Step>> {
    let step = state.service.approve_step(&id, &step_id, body.feedback).await?;
    Ok(Json(step))
}

pub async fn reject_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<ApprovalBody>,
) -> ApiResult<StatusCode> {
    state.service.reject_step(&id, &step_id, body.feedback).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
pub struct SkipBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn skip_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<SkipBody>,
) -> ApiResult<Json<Step>> {
    let step = state.service.skip_step(&id, &step_id, body.reason).await?;
    Ok(Json(step))
}

pub async fn reset_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
) -> ApiResult<Json<Step>> {
    let step = state.service.reset_step(&id, &step_id).await?;
    Ok(Json(step))
}

pub async fn chat_with_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<String>> {
    let response = state.service.chat_with_step(&id, &step_id, body.message).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignBody {
    pub agent_id: String,
}

pub async fn reassign_step(
    State(state): State<AppState>,
    Path((id, step_id)): Path<(String, String)>,
    Json(body): Json<ReassignBody>,
) -> ApiResult<Json<Step>> {
    let step = state.service.reassign_step(&id, &step_id, &body.agent_id).await?;
    Ok(Json(step))
}
