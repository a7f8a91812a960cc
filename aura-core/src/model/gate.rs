use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Build,
    Test,
    Composite,
}

/// Summary of an inter-wave validation. The Scheduler never inspects
/// `build_output`/`test_output` text; it trusts `passed` (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub passed: bool,
    pub gate_type: GateType,
    pub wave: u32,
    pub build_output: Option<String>,
    pub test_output: Option<String>,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub was_cancelled: bool,
    pub error: Option<String>,
}

impl GateResult {
    pub fn passed(wave: u32, gate_type: GateType) -> Self {
        Self {
            passed: true,
            gate_type,
            wave,
            build_output: None,
            test_output: None,
            tests_passed: 0,
            tests_failed: 0,
            was_cancelled: false,
            error: None,
        }
    }

    pub fn failed(wave: u32, gate_type: GateType, error: impl Into<String>) -> Self {
        Self {
            passed: false,
            gate_type,
            wave,
            build_output: None,
            test_output: None,
            tests_passed: 0,
            tests_failed: 0,
            was_cancelled: false,
            error: Some(error.into()),
        }
    }
}

/// Caller-supplied policy for what "pass the gate" means between waves. The
/// Scheduler is policy-free (§9 open question): it invokes this trait and
/// trusts the `passed` field of the result it gets back.
#[async_trait::async_trait]
pub trait GatePolicy: Send + Sync {
    async fn run(&self, story_id: &str, worktree_path: &str, wave: u32) -> GateResult;
}

/// A gate policy that always passes trivially; useful for Stories whose
/// worktree has no build/test tooling, and for tests.
pub struct AlwaysPassGate;

#[async_trait::async_trait]
impl GatePolicy for AlwaysPassGate {
    async fn run(&self, _story_id: &str, _worktree_path: &str, wave: u32) -> GateResult {
        GateResult::passed(wave, GateType::Composite)
    }
}
