//! Typed error taxonomy shared by every component of the Story orchestration engine.
//!
//! One variant per row of the error taxonomy. Surfaces map 1:1 onto the HTTP
//! problem-detail shape of the external interface; `AuraError::http_status`
//! and `AuraError::problem_type` are the only two things a transport layer
//! needs to render a response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuraError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("missing or malformed field: {0}")]
    MissingField(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no agent registered for capability `{capability}`{}", .language.as_deref().map(|l| format!(" in language `{l}`")).unwrap_or_default())]
    NoAgentForCapability {
        capability: String,
        language: Option<String>,
    },

    #[error("llm request failed after retries: {0}")]
    LlmTransient(String),

    #[error("tool `{tool_id}` failed: {message}")]
    ToolError { tool_id: String, message: String },

    #[error("gate failed")]
    GateFailure(Box<crate::model::GateResult>),

    #[error("git operation failed: {0}")]
    GitError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuraError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn missing_field(msg: impl Into<String>) -> Self {
        Self::MissingField(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn no_agent_for_capability(capability: impl Into<String>, language: Option<String>) -> Self {
        Self::NoAgentForCapability {
            capability: capability.into(),
            language,
        }
    }

    pub fn git_error(msg: impl Into<String>) -> Self {
        Self::GitError(msg.into())
    }

    /// The `type` field of the HTTP problem-detail body (§6).
    pub fn problem_type(&self) -> &'static str {
        match self {
            AuraError::InvalidState(_) => "invalid-state",
            AuraError::MissingField(_) => "missing-field",
            AuraError::NotFound(_) => "story-not-found",
            AuraError::NoAgentForCapability { .. } => "no-agent-for-capability",
            AuraError::LlmTransient(_) => "llm-error",
            AuraError::ToolError { .. } => "llm-error",
            AuraError::GateFailure(_) => "gate-failed",
            AuraError::GitError(_) => "git-error",
            AuraError::Cancelled => "cancelled",
            AuraError::Internal(_) => "internal-error",
        }
    }

    /// HTTP status code implied by the taxonomy row this error belongs to.
    pub fn http_status(&self) -> u16 {
        match self {
            AuraError::InvalidState(_) => 400,
            AuraError::MissingField(_) => 400,
            AuraError::NotFound(_) => 404,
            AuraError::NoAgentForCapability { .. } => 400,
            AuraError::LlmTransient(_) => 502,
            AuraError::ToolError { .. } => 502,
            AuraError::GateFailure(_) => 409,
            AuraError::GitError(_) => 502,
            AuraError::Cancelled => 499,
            AuraError::Internal(_) => 500,
        }
    }
}

impl From<std::io::Error> for AuraError {
    fn from(e: std::io::Error) -> Self {
        AuraError::Internal(format!("io: {e}"))
    }
}

impl From<serde_json::Error> for AuraError {
    fn from(e: serde_json::Error) -> Self {
        AuraError::Internal(format!("serde_json: {e}"))
    }
}

impl From<serde_yaml::Error> for AuraError {
    fn from(e: serde_yaml::Error) -> Self {
        AuraError::MissingField(format!("agent frontmatter: {e}"))
    }
}

pub type AuraResult<T> = Result<T, AuraError>;
