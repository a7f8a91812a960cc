//! SSE Event Bus (C6): per-Story pub/sub of orchestration events.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusError, EventBusResult, SharedEventBus};
pub use types::{EventId, StoryEvent};
