//! Story lifecycle transition table (§4.5). Pure guard functions: given a
//! current status and a requested operation, decide whether the transition
//! is legal and what the resulting status is. Mutating the Story itself is
//! the caller's job — these functions never touch a `Story` value, so they
//! can be unit tested in isolation from persistence.

use crate::error::{AuraError, AuraResult};
use crate::model::StoryStatus;

/// Every operation the Story State Machine exposes that moves `Status`.
/// Operations with no status effect (Chat, AddStep, …) are not represented
/// here; they're validated against a *set* of allowed statuses instead, via
/// [`require_status_in`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryTransition {
    Analyze,
    AnalyzeOk,
    Plan,
    PlanOk,
    Run,
    WaveDrainMoreWaves,
    GatePendingManualApproval,
    ApproveGate,
    GateFail,
    AllWavesDone,
    ResetOrchestrator,
    Cancel,
    Finalize,
}

/// One row of the transition table: `(from, transition) -> to`.
fn table(from: StoryStatus, transition: StoryTransition) -> Option<StoryStatus> {
    use StoryStatus::*;
    use StoryTransition::*;
    match (from, transition) {
        (Created, Analyze) => Some(Analyzing),
        (Analyzing, AnalyzeOk) => Some(Analyzed),
        (Analyzed, Plan) => Some(Planning),
        (Planning, PlanOk) => Some(Planned),
        (Planned, Run) => Some(Running),
        (Running, WaveDrainMoreWaves) => Some(Running),
        (Running, GatePendingManualApproval) => Some(GatePending),
        (GatePending, ApproveGate) => Some(Running),
        (Running, GateFail) => Some(GateFailed),
        (Running, AllWavesDone) => Some(Completed),
        // ResetOrchestrator may return to Planned (full reset) or straight
        // back to Running (resume mid-flight); the caller decides which via
        // the `resetFailedSteps` flag and passes the resulting status to
        // `force_transition` — this table only validates the *source*.
        (GateFailed, ResetOrchestrator) => Some(Planned),
        (Failed, ResetOrchestrator) => Some(Planned),
        (Running, Cancel) | (GateFailed, Cancel) | (Failed, Cancel) => Some(Cancelled),
        (Completed, Finalize) => Some(Completed),
        _ => None,
    }
}

/// Apply `transition` to `from`, returning the new status or an
/// `invalid-state` error. Never mutates anything; the caller persists the
/// result only after this returns Ok.
pub fn advance(from: StoryStatus, transition: StoryTransition) -> AuraResult<StoryStatus> {
    table(from, transition).ok_or_else(|| {
        AuraError::invalid_state(format!(
            "cannot apply {transition:?} to Story in status {from:?}"
        ))
    })
}

/// Guard for operations that don't move `Status` but require it to be one of
/// a fixed set (Chat, AddStep, ApproveStep, …).
pub fn require_status_in(status: StoryStatus, allowed: &[StoryStatus]) -> AuraResult<()> {
    if allowed.contains(&status) {
        Ok(())
    } else {
        Err(AuraError::invalid_state(format!(
            "operation requires status in {allowed:?}, Story is {status:?}"
        )))
    }
}

/// `Delete` is legal from any non-terminal status per §4.5.
pub fn can_delete(status: StoryStatus) -> bool {
    !status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use StoryStatus::*;
    use StoryTransition::*;

    #[test]
    fn happy_path_sequence() {
        let mut s = Created;
        s = advance(s, Analyze).unwrap();
        assert_eq!(s, Analyzing);
        s = advance(s, AnalyzeOk).unwrap();
        assert_eq!(s, Analyzed);
        s = advance(s, Plan).unwrap();
        assert_eq!(s, Planning);
        s = advance(s, PlanOk).unwrap();
        assert_eq!(s, Planned);
        s = advance(s, Run).unwrap();
        assert_eq!(s, Running);
        s = advance(s, AllWavesDone).unwrap();
        assert_eq!(s, Completed);
    }

    #[test]
    fn illegal_transition_rejected() {
        assert!(advance(Created, Run).is_err());
        assert!(advance(Completed, Run).is_err());
    }

    #[test]
    fn terminal_statuses_cannot_be_deleted() {
        assert!(!can_delete(Completed));
        assert!(!can_delete(Cancelled));
        assert!(can_delete(Running));
    }

    #[test]
    fn gate_failed_recoverable_via_reset() {
        let s = advance(GateFailed, ResetOrchestrator).unwrap();
        assert_eq!(s, Planned);
    }
}
