//! Data model, state machines, and deterministic policy for Aura Story
//! orchestration: the parts of the system that hold no I/O and no LLM calls.
//!
//! `aura-core` owns:
//! - the Story/Step/Agent/GateResult/ReAct data model (§3)
//! - the Story and Step state machines as pure functions (§4.3, §4.5)
//! - the Agent Registry, including hot-reload and agent definition parsing (§4.1)
//! - the SSE event bus and event shapes (§4.6)
//! - the error taxonomy (§7) and retry/gate policy seams (§4.2, §4.4)
//!
//! Everything that calls an LLM, runs a tool, shells out to git, or serves
//! HTTP lives one crate up, in `aura-story`.

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use config::Config;
pub use error::{AuraError, AuraResult};
pub use events::{EventBus, EventId, SharedEventBus, StoryEvent};
pub use model::{
    is_known_capability, Agent, AlwaysPassGate, Approval, AutomationMode, ChatMessage, ChatRole,
    DispatchTarget, GateMode, GatePolicy, GateResult, GateType, IssueLink, ReactDirective,
    ReactStep, ReactTrace, Step, StepId, StepStatus, Story, StoryId, StoryStatus, DEFAULT_PRIORITY,
    KNOWN_CAPABILITIES,
};
pub use registry::{AgentRegistry, ReloadDiff};
pub use retry::{step_retry_exhausted, LlmRetryPolicy, MAX_STEP_ATTEMPTS};
pub use state_machine::{step_sm, story_sm, StepTransition, StoryTransition};
