use super::story::{ChatMessage, StepId, StoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Step's lifecycle position. See aura_core::state_machine::step_sm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Cancelled
                | StepStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    Approved,
    Rejected,
}

/// One atomic unit of work inside a Story.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: StepId,
    pub story_id: StoryId,
    pub order: u32,
    /// Steps with the same wave run concurrently. 0 means "not yet decomposed".
    pub wave: u32,
    pub name: String,
    pub capability: String,
    pub language: Option<String>,
    pub description: String,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub status: StepStatus,
    pub agent_id: Option<String>,
    pub attempts: u32,
    pub approval: Option<Approval>,
    pub approval_feedback: Option<String>,
    pub skip_reason: Option<String>,
    pub needs_rework: bool,
    pub previous_output: Option<serde_json::Value>,
    pub chat_history: Vec<ChatMessage>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        story_id: StoryId,
        order: u32,
        name: String,
        capability: String,
        language: Option<String>,
        description: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            story_id,
            order,
            wave: 0,
            name,
            capability,
            language,
            description,
            input: None,
            output: None,
            error: None,
            status: StepStatus::Pending,
            agent_id: None,
            attempts: 0,
            approval: None,
            approval_feedback: None,
            skip_reason: None,
            needs_rework: false,
            previous_output: None,
            chat_history: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }
}
