use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StoryId = String;
pub type StepId = String;

/// Human-gated vs machine-gated wave advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationMode {
    Assisted,
    Autonomous,
}

/// Where a Story's work is actually carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchTarget {
    Internal,
    CopilotCli,
}

/// Whether the Scheduler stops for a human between waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    AutoProceed,
    ManualApproval,
}

/// A Story's lifecycle position. See aura_core::state_machine::story_sm for the
/// transition table that governs how these change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Created,
    Analyzing,
    Analyzed,
    Planning,
    Planned,
    Running,
    GatePending,
    GateFailed,
    Failed,
    Completed,
    Cancelled,
}

impl StoryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StoryStatus::Completed | StoryStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLink {
    pub provider: String,
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// One development task. The Story State Machine (C5) is the sole writer of
/// this struct's mutable fields; everything else borrows a reference for the
/// duration of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub description: String,
    pub issue_link: Option<IssueLink>,
    pub repository_path: String,
    pub worktree_path: Option<String>,
    pub git_branch: Option<String>,
    pub automation_mode: AutomationMode,
    pub dispatch_target: DispatchTarget,
    pub status: StoryStatus,
    pub analyzed_context: Option<serde_json::Value>,
    pub plan: Option<serde_json::Value>,
    /// Ids of this Story's Steps, in creation order. Steps are persisted
    /// separately keyed by (storyId, stepId) — arena+index, not object
    /// references — so that Story never holds a cycle back to its Steps.
    pub step_ids: Vec<StepId>,
    pub current_wave: u32,
    pub max_parallelism: u32,
    pub gate_mode: GateMode,
    pub last_gate_result: Option<super::gate::GateResult>,
    pub chat_history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pull_request_url: Option<String>,
}

impl Story {
    pub fn new(
        title: String,
        description: String,
        repository_path: String,
        automation_mode: AutomationMode,
        dispatch_target: DispatchTarget,
        issue_link: Option<IssueLink>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description,
            issue_link,
            repository_path,
            worktree_path: None,
            git_branch: None,
            automation_mode,
            dispatch_target,
            status: StoryStatus::Created,
            analyzed_context: None,
            plan: None,
            step_ids: Vec::new(),
            current_wave: 0,
            max_parallelism: 4,
            gate_mode: GateMode::AutoProceed,
            last_gate_result: None,
            chat_history: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            pull_request_url: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
