use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Descriptor for a capability-providing executor. Loaded from definition
/// files at startup and hot-reloadable thereafter (§4.1); never mutated by
/// in-flight executions, which hold the snapshot they started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub capabilities: BTreeSet<String>,
    /// Lower = more specialized, selected first.
    pub priority: i32,
    /// Empty set = polyglot; matches any language hint.
    pub languages: BTreeSet<String>,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// Tool ids this agent may invoke. `None` means "no restriction" — the
    /// Step Runner falls back to the full registry minus confirmation-gated
    /// tools under Autonomous mode.
    pub tools: Option<Vec<String>>,
    pub tags: Vec<String>,
    pub system_prompt: String,
}

impl Agent {
    pub fn is_polyglot(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn matches_capability(&self, capability: &str, language_hint: Option<&str>) -> bool {
        if !self.capabilities.contains(capability) {
            return false;
        }
        match language_hint {
            None => true,
            Some(lang) => self.is_polyglot() || self.languages.contains(lang),
        }
    }

    /// Whether this agent's capability set implies tool use (ReAct dispatch)
    /// rather than a direct LLM call (§4.3 step 5).
    pub fn uses_tools(&self) -> bool {
        self.tools.is_some() || self.capabilities.iter().any(|c| c == "coding" || c == "fixing" || c == "testing")
    }
}

/// Default priority assigned to an agent definition that omits one.
pub const DEFAULT_PRIORITY: i32 = 50;
