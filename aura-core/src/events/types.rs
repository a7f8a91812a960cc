//! SSE event shapes (§4.6, §6). Scoped to a single Story; every event carries
//! `{type, storyId, timestamp, wave?, totalWaves?, stepId?, stepName?,
//! output?, error?, gateResult?}`.

use crate::model::GateResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EventId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StoryEvent {
    #[serde(rename_all = "camelCase")]
    StoryCreated {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryAnalyzed {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryPlanned {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryDecomposed {
        story_id: String,
        total_waves: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    WaveStarted {
        story_id: String,
        wave: u32,
        total_waves: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepStarted {
        story_id: String,
        step_id: String,
        step_name: String,
        wave: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepProgress {
        story_id: String,
        step_id: String,
        step_name: String,
        observation: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        story_id: String,
        step_id: String,
        step_name: String,
        output: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepFailed {
        story_id: String,
        step_id: String,
        step_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StepRejected {
        story_id: String,
        step_id: String,
        step_name: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    WaveCompleted {
        story_id: String,
        wave: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GateRunning {
        story_id: String,
        wave: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GatePassed {
        story_id: String,
        wave: u32,
        gate_result: GateResult,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GateFailed {
        story_id: String,
        wave: u32,
        gate_result: GateResult,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    GatePending {
        story_id: String,
        wave: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryCompleted {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryCancelled {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    StoryFailed {
        story_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ChatResponse {
        story_id: String,
        response: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        story_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        story_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl StoryEvent {
    pub fn story_id(&self) -> &str {
        match self {
            StoryEvent::StoryCreated { story_id, .. }
            | StoryEvent::StoryAnalyzed { story_id, .. }
            | StoryEvent::StoryPlanned { story_id, .. }
            | StoryEvent::StoryDecomposed { story_id, .. }
            | StoryEvent::WaveStarted { story_id, .. }
            | StoryEvent::StepStarted { story_id, .. }
            | StoryEvent::StepProgress { story_id, .. }
            | StoryEvent::StepCompleted { story_id, .. }
            | StoryEvent::StepFailed { story_id, .. }
            | StoryEvent::StepRejected { story_id, .. }
            | StoryEvent::WaveCompleted { story_id, .. }
            | StoryEvent::GateRunning { story_id, .. }
            | StoryEvent::GatePassed { story_id, .. }
            | StoryEvent::GateFailed { story_id, .. }
            | StoryEvent::GatePending { story_id, .. }
            | StoryEvent::StoryCompleted { story_id, .. }
            | StoryEvent::StoryCancelled { story_id, .. }
            | StoryEvent::StoryFailed { story_id, .. }
            | StoryEvent::ChatResponse { story_id, .. }
            | StoryEvent::Done { story_id, .. }
            | StoryEvent::Error { story_id, .. } => story_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            StoryEvent::StoryCreated { .. } => "story-created",
            StoryEvent::StoryAnalyzed { .. } => "story-analyzed",
            StoryEvent::StoryPlanned { .. } => "story-planned",
            StoryEvent::StoryDecomposed { .. } => "story-decomposed",
            StoryEvent::WaveStarted { .. } => "wave-started",
            StoryEvent::StepStarted { .. } => "step-started",
            StoryEvent::StepProgress { .. } => "step-progress",
            StoryEvent::StepCompleted { .. } => "step-completed",
            StoryEvent::StepFailed { .. } => "step-failed",
            StoryEvent::StepRejected { .. } => "step-rejected",
            StoryEvent::WaveCompleted { .. } => "wave-completed",
            StoryEvent::GateRunning { .. } => "gate-running",
            StoryEvent::GatePassed { .. } => "gate-passed",
            StoryEvent::GateFailed { .. } => "gate-failed",
            StoryEvent::GatePending { .. } => "gate-pending",
            StoryEvent::StoryCompleted { .. } => "story-completed",
            StoryEvent::StoryCancelled { .. } => "story-cancelled",
            StoryEvent::StoryFailed { .. } => "story-failed",
            StoryEvent::ChatResponse { .. } => "chat-response",
            StoryEvent::Done { .. } => "done",
            StoryEvent::Error { .. } => "error",
        }
    }

    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}
