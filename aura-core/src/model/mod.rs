//! The data model of §3: Story, Step, Agent, GateResult, ReAct trace.

pub mod agent;
pub mod gate;
pub mod react;
pub mod step;
pub mod story;

pub use agent::{Agent, DEFAULT_PRIORITY};
pub use gate::{AlwaysPassGate, GatePolicy, GateResult, GateType};
pub use react::{ReactDirective, ReactStep, ReactTrace};
pub use step::{Approval, Step, StepStatus};
pub use story::{
    AutomationMode, ChatMessage, ChatRole, DispatchTarget, GateMode, IssueLink, StepId, Story,
    StoryId, StoryStatus,
};

/// Fixed capability vocabulary (§Glossary). Agents and Steps may use values
/// outside this set (unknown capabilities are accepted but logged, §4.1);
/// this list exists for validation warnings only, not enforcement.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "analysis",
    "planning",
    "coding",
    "testing",
    "review",
    "documentation",
    "chat",
    "fixing",
];

pub fn is_known_capability(capability: &str) -> bool {
    KNOWN_CAPABILITIES.contains(&capability) || capability.starts_with("ingest:")
}
