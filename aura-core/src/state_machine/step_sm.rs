//! Step lifecycle transition table (§4.3).
//!
//! ```text
//! Pending ──start──▶ Running ─┬─success──▶ Completed
//!                             │
//!                             ├─failure──▶ Failed
//!                             │
//!                             └─cancel───▶ Cancelled
//! Completed ──reject──▶ Rejected          (NeedsRework=true, PreviousOutput=Output)
//! Rejected  ──reset ──▶ Pending
//! Any non-terminal ──skip──▶ Skipped      (with skipReason)
//! Any                ──reset──▶ Pending   (clears Output, Error, PreviousOutput)
//! ```

use crate::error::{AuraError, AuraResult};
use crate::model::StepStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepTransition {
    Start,
    Success,
    Failure,
    Cancel,
    Reject,
    Reset,
    Skip,
}

fn table(from: StepStatus, transition: StepTransition) -> Option<StepStatus> {
    use StepStatus::*;
    use StepTransition::*;
    match (from, transition) {
        (Pending, Start) => Some(Running),
        (Running, Success) => Some(Completed),
        (Running, Failure) => Some(Failed),
        (Running, Cancel) => Some(Cancelled),
        (Completed, Reject) => Some(Rejected),
        (Rejected, Reset) => Some(Pending),
        // `Reset` is legal from any status, terminal or not (§4.3 table).
        (_, Reset) => Some(Pending),
        // `Skip` is legal from any non-terminal status.
        (s, Skip) if !s.is_terminal() => Some(Skipped),
        _ => None,
    }
}

pub fn advance(from: StepStatus, transition: StepTransition) -> AuraResult<StepStatus> {
    table(from, transition).ok_or_else(|| {
        AuraError::invalid_state(format!(
            "cannot apply {transition:?} to Step in status {from:?}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use StepStatus::*;
    use StepTransition::*;

    #[test]
    fn full_success_path() {
        let mut s = Pending;
        s = advance(s, Start).unwrap();
        assert_eq!(s, Running);
        s = advance(s, Success).unwrap();
        assert_eq!(s, Completed);
    }

    #[test]
    fn rejection_and_reset_cycle() {
        let s = advance(Completed, Reject).unwrap();
        assert_eq!(s, Rejected);
        let s = advance(s, Reset).unwrap();
        assert_eq!(s, Pending);
    }

    #[test]
    fn skip_blocked_from_terminal_status() {
        assert!(advance(Completed, Skip).is_err());
        assert!(advance(Pending, Skip).is_ok());
        assert!(advance(Running, Skip).is_ok());
    }

    #[test]
    fn reset_always_legal() {
        assert_eq!(advance(Failed, Reset).unwrap(), Pending);
        assert_eq!(advance(Skipped, Reset).unwrap(), Pending);
        assert_eq!(advance(Running, Reset).unwrap(), Pending);
    }

    #[test]
    fn completed_cannot_go_straight_to_pending() {
        assert!(matches!(advance(Completed, Start), Err(_)));
    }
}
