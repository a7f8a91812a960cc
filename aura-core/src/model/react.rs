use serde::{Deserialize, Serialize};

/// One Thought/Action/Observation iteration inside a ReAct trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactStep {
    pub step_number: u32,
    pub thought: String,
    pub action: Option<String>,
    pub action_input: Option<serde_json::Value>,
    pub observation: String,
    pub duration_ms: u64,
}

/// Per-Step execution record produced by the ReAct Executor (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactTrace {
    pub steps: Vec<ReactStep>,
    pub total_tokens: Option<u64>,
    pub total_duration_ms: u64,
    pub success: bool,
    pub final_answer: Option<String>,
    pub error: Option<String>,
}

impl ReactTrace {
    pub fn empty() -> Self {
        Self {
            steps: Vec::new(),
            total_tokens: None,
            total_duration_ms: 0,
            success: false,
            final_answer: None,
            error: None,
        }
    }
}

/// What the LLM's structured response parses into for one ReAct iteration.
/// Fail-closed on unparseable output: treated as one wasted step with a
/// diagnostic observation, never a hard error (§9 design note).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ReactDirective {
    Final {
        #[serde(rename = "finalAnswer")]
        final_answer: String,
    },
    Act {
        thought: String,
        action: String,
        #[serde(rename = "actionInput", default)]
        action_input: serde_json::Value,
    },
}
