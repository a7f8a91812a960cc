//! Wave Scheduler (C4): drives a Planned/Running Story to completion one
//! wave at a time, with bounded parallelism, inter-wave gates, and
//! cascade rework on rejection (§4.4). Policy-free: gate composition is
//! entirely the caller-supplied `GatePolicy` (§9 open question).

use crate::step_runner::StepRunner;
use crate::store::StoryStore;
use aura_core::state_machine::story_sm::{self, StoryTransition};
use aura_core::{
    step_retry_exhausted, AuraError, AuraResult, AutomationMode, EventBus, GateMode, GatePolicy,
    Step, StepStatus, Story, StoryEvent, StoryStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub started: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub current_wave: u32,
    pub gate_result: Option<aura_core::GateResult>,
    pub status: StoryStatus,
}

#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub current_wave: u32,
    pub total_waves: u32,
    pub max_parallelism: u32,
    pub steps: Vec<Step>,
}

pub struct WaveScheduler {
    store: Arc<dyn StoryStore>,
    step_runner: Arc<StepRunner>,
    events: Arc<EventBus>,
    gate: Arc<dyn GatePolicy>,
}

impl WaveScheduler {
    pub fn new(
        store: Arc<dyn StoryStore>,
        step_runner: Arc<StepRunner>,
        events: Arc<EventBus>,
        gate: Arc<dyn GatePolicy>,
    ) -> Self {
        Self {
            store,
            step_runner,
            events,
            gate,
        }
    }

    pub async fn get_status(&self, story_id: &str) -> AuraResult<SchedulerStatus> {
        let story = self.store.get_story(story_id).await?;
        let steps = self.store.list_steps(story_id).await?;
        let total_waves = steps.iter().map(|s| s.wave).max().unwrap_or(0);
        Ok(SchedulerStatus {
            current_wave: story.current_wave,
            total_waves,
            max_parallelism: story.max_parallelism,
            steps,
        })
    }

    /// `ResetOrchestrator(storyId, resetFailedSteps)` (§4.4).
    pub async fn reset_orchestrator(&self, story_id: &str, reset_failed_steps: bool) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        if story.status.is_terminal() {
            return Err(AuraError::invalid_state(format!(
                "cannot reset a terminal story ({:?})",
                story.status
            )));
        }
        let new_status = if matches!(story.status, StoryStatus::GateFailed | StoryStatus::Failed) {
            story_sm::advance(story.status, StoryTransition::ResetOrchestrator)?
        } else {
            StoryStatus::Planned
        };

        if reset_failed_steps {
            self.store
                .with_all_steps_mut(story_id, |steps| {
                    for step in steps.values_mut() {
                        if step.status == StepStatus::Failed {
                            step.status = StepStatus::Pending;
                            step.error = None;
                        }
                    }
                })
                .await?;
        }

        self.store
            .with_story_mut(story_id, |s| {
                s.status = new_status;
                s.last_gate_result = None;
                Ok(())
            })
            .await?;
        self.store.get_story(story_id).await
    }

    /// `RejectStep(stepId)` plus its cascade (§4.4 Cascade rework). This is
    /// a Scheduler-privileged mutation: it bypasses the per-Step transition
    /// guard's `Completed -> Rejected` restriction for steps that have not
    /// yet run, because the cascade rule applies uniformly to "every
    /// later-wave Step" regardless of their current status.
    pub async fn reject_step(&self, story_id: &str, step_id: &str) -> AuraResult<()> {
        let rejected = self.store.get_step(story_id, step_id).await?;
        let rejected_wave = rejected.wave;

        let mut affected_ids = Vec::new();
        self.store
            .with_all_steps_mut(story_id, |steps| {
                for step in steps.values_mut() {
                    if step.id == step_id || step.wave > rejected_wave {
                        step.previous_output = step.output.clone();
                        step.output = None;
                        step.needs_rework = true;
                        step.status = StepStatus::Rejected;
                        affected_ids.push(step.id.clone());
                    }
                }
            })
            .await?;

        self.store
            .with_story_mut(story_id, |s| {
                s.status = StoryStatus::Running;
                s.current_wave = rejected_wave;
                Ok(())
            })
            .await?;

        for id in &affected_ids {
            if let Ok(step) = self.store.get_step(story_id, id).await {
                self.events
                    .publish(StoryEvent::StepRejected {
                        story_id: story_id.to_string(),
                        step_id: step.id,
                        step_name: step.name,
                        timestamp: Utc::now(),
                    })
                    .ok();
            }
        }
        Ok(())
    }

    /// `Run(storyId, authHints)`: runs waves until the Story completes, a
    /// gate pauses it for manual approval, or a Step failure exhausts the
    /// Autonomous retry budget (§4.4).
    pub async fn run(&self, story_id: &str, cancel: CancellationToken) -> AuraResult<RunResult> {
        let story = self.store.get_story(story_id).await?;
        if story.status == StoryStatus::Planned {
            let wave = if story.current_wave == 0 { 1 } else { story.current_wave };
            self.store
                .with_story_mut(story_id, |s| {
                    s.status = story_sm::advance(s.status, StoryTransition::Run)?;
                    s.current_wave = wave;
                    Ok(())
                })
                .await?;
        } else if story.status != StoryStatus::Running {
            return Err(AuraError::invalid_state(format!(
                "story {} is not runnable from status {:?}",
                story_id, story.status
            )));
        }

        let mut result = RunResult::default();

        loop {
            if cancel.is_cancelled() {
                self.finish_cancelled(story_id).await?;
                result.status = StoryStatus::Cancelled;
                return Ok(result);
            }

            let story = self.store.get_story(story_id).await?;
            let wave = story.current_wave;
            let all_steps = self.store.list_steps(story_id).await?;
            let total_waves = all_steps.iter().map(|s| s.wave).max().unwrap_or(0);
            let wave_steps: Vec<Step> = all_steps.iter().filter(|s| s.wave == wave).cloned().collect();

            self.events
                .publish(StoryEvent::WaveStarted {
                    story_id: story_id.to_string(),
                    wave,
                    total_waves,
                    timestamp: Utc::now(),
                })
                .ok();

            let autonomous = matches!(story.automation_mode, AutomationMode::Autonomous);
            let mut runnable = Vec::new();
            let mut wave_blocked = false;

            for step in &wave_steps {
                match step.status {
                    StepStatus::Completed | StepStatus::Skipped => {}
                    StepStatus::Pending => runnable.push(step.id.clone()),
                    StepStatus::Rejected => {
                        self.store
                            .with_step_mut(story_id, &step.id, |s| {
                                s.status = StepStatus::Pending;
                                Ok(())
                            })
                            .await?;
                        runnable.push(step.id.clone());
                    }
                    StepStatus::Failed if autonomous && !step_retry_exhausted(step.attempts) => {
                        self.store
                            .with_step_mut(story_id, &step.id, |s| {
                                s.status = StepStatus::Pending;
                                Ok(())
                            })
                            .await?;
                        runnable.push(step.id.clone());
                    }
                    StepStatus::Failed => wave_blocked = true,
                    StepStatus::Running | StepStatus::Cancelled => {}
                }
            }

            if wave_blocked {
                return self.finish_wave_blocked(story_id, result).await;
            }

            if !runnable.is_empty() {
                result.started.extend(runnable.iter().cloned());
                let semaphore = Arc::new(Semaphore::new(story.max_parallelism.max(1) as usize));
                let mut handles = Vec::new();
                for step_id in runnable {
                    let semaphore = semaphore.clone();
                    let runner = self.step_runner.clone();
                    let story_id = story_id.to_string();
                    let cancel = cancel.clone();
                    handles.push(tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                        let outcome = runner.run_step(&story_id, &step_id, None, cancel).await;
                        (step_id, outcome)
                    }));
                }
                for handle in handles {
                    if let Ok((step_id, outcome)) = handle.await {
                        match outcome {
                            Ok(()) => result.completed.push(step_id),
                            Err(_) => result.failed.push(step_id),
                        }
                    }
                }
            }

            let drained = self.store.list_steps(story_id).await?;
            let wave_now: Vec<&Step> = drained.iter().filter(|s| s.wave == wave).collect();

            let still_failed: Vec<&&Step> = wave_now.iter().filter(|s| s.status == StepStatus::Failed).collect();
            if !still_failed.is_empty() {
                if !autonomous || still_failed.iter().all(|s| step_retry_exhausted(s.attempts)) {
                    return self.finish_wave_blocked(story_id, result).await;
                }
                continue;
            }
            if wave_now.iter().any(|s| s.status == StepStatus::Pending) {
                result.status = self.store.get_story(story_id).await?.status;
                result.current_wave = wave;
                return Ok(result);
            }

            self.events
                .publish(StoryEvent::WaveCompleted {
                    story_id: story_id.to_string(),
                    wave,
                    timestamp: Utc::now(),
                })
                .ok();

            self.events
                .publish(StoryEvent::GateRunning {
                    story_id: story_id.to_string(),
                    wave,
                    timestamp: Utc::now(),
                })
                .ok();

            let worktree = story.worktree_path.clone().unwrap_or_default();
            let gate_result = self.gate.run(story_id, &worktree, wave).await;

            if !gate_result.passed {
                self.store
                    .with_story_mut(story_id, |s| {
                        s.status = story_sm::advance(s.status, StoryTransition::GateFail)?;
                        s.last_gate_result = Some(gate_result.clone());
                        Ok(())
                    })
                    .await?;
                self.events
                    .publish(StoryEvent::GateFailed {
                        story_id: story_id.to_string(),
                        wave,
                        gate_result: gate_result.clone(),
                        timestamp: Utc::now(),
                    })
                    .ok();
                result.status = StoryStatus::GateFailed;
                result.current_wave = wave;
                result.gate_result = Some(gate_result);
                self.emit_done(story_id).await;
                return Ok(result);
            }

            self.events
                .publish(StoryEvent::GatePassed {
                    story_id: story_id.to_string(),
                    wave,
                    gate_result: gate_result.clone(),
                    timestamp: Utc::now(),
                })
                .ok();

            match story.gate_mode {
                GateMode::ManualApproval => {
                    self.store
                        .with_story_mut(story_id, |s| {
                            s.status = story_sm::advance(s.status, StoryTransition::GatePendingManualApproval)?;
                            s.last_gate_result = Some(gate_result.clone());
                            Ok(())
                        })
                        .await?;
                    self.events
                        .publish(StoryEvent::GatePending {
                            story_id: story_id.to_string(),
                            wave,
                            timestamp: Utc::now(),
                        })
                        .ok();
                    result.status = StoryStatus::GatePending;
                    result.current_wave = wave;
                    result.gate_result = Some(gate_result);
                    self.emit_done(story_id).await;
                    return Ok(result);
                }
                GateMode::AutoProceed => {
                    if wave >= total_waves {
                        self.store
                            .with_story_mut(story_id, |s| {
                                s.status = story_sm::advance(s.status, StoryTransition::AllWavesDone)?;
                                s.completed_at = Some(Utc::now());
                                Ok(())
                            })
                            .await?;
                        self.events
                            .publish(StoryEvent::StoryCompleted {
                                story_id: story_id.to_string(),
                                timestamp: Utc::now(),
                            })
                            .ok();
                        result.status = StoryStatus::Completed;
                        result.current_wave = wave;
                        self.emit_done(story_id).await;
                        return Ok(result);
                    } else {
                        self.store
                            .with_story_mut(story_id, |s| {
                                s.status = story_sm::advance(s.status, StoryTransition::WaveDrainMoreWaves)?;
                                s.current_wave = wave + 1;
                                Ok(())
                            })
                            .await?;
                        // loop continues to the next wave
                    }
                }
            }
        }
    }

    async fn finish_wave_blocked(&self, story_id: &str, mut result: RunResult) -> AuraResult<RunResult> {
        self.events
            .publish(StoryEvent::StoryFailed {
                story_id: story_id.to_string(),
                error: "wave blocked: a step failed and retries are exhausted or mode is assisted".to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        let story = self
            .store
            .with_story_mut(story_id, |s| {
                s.status = StoryStatus::Failed;
                Ok(s.clone())
            })
            .await?;
        result.status = story.status;
        result.current_wave = story.current_wave;
        self.emit_done(story_id).await;
        Ok(result)
    }

    async fn finish_cancelled(&self, story_id: &str) -> AuraResult<()> {
        self.store
            .with_story_mut(story_id, |s| {
                s.status = story_sm::advance(s.status, StoryTransition::Cancel).unwrap_or(StoryStatus::Cancelled);
                Ok(())
            })
            .await?;
        self.events
            .publish(StoryEvent::StoryCancelled {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        self.emit_done(story_id).await;
        Ok(())
    }

    async fn emit_done(&self, story_id: &str) {
        self.events
            .publish(StoryEvent::Done {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::store::InMemoryStoryStore;
    use crate::tools::ToolRegistry;
    use aura_core::{Agent, AlwaysPassGate, DispatchTarget, GateResult, GateType};
    use std::collections::BTreeSet;

    struct AlwaysFailGate;

    #[async_trait::async_trait]
    impl GatePolicy for AlwaysFailGate {
        async fn run(&self, _story_id: &str, _worktree_path: &str, wave: u32) -> GateResult {
            GateResult::failed(wave, GateType::Composite, "tests failed")
        }
    }

    fn coder_agent() -> Agent {
        Agent {
            id: "coder".into(),
            display_name: "Coder".into(),
            description: String::new(),
            capabilities: BTreeSet::from(["coding".to_string(), "testing".to_string()]),
            priority: 10,
            languages: BTreeSet::new(),
            provider: "test".into(),
            model: "test-model".into(),
            temperature: 0.1,
            tools: Some(Vec::new()),
            tags: Vec::new(),
            system_prompt: "You write code.".into(),
        }
    }

    async fn setup_two_wave_story() -> (Arc<InMemoryStoryStore>, Arc<WaveScheduler>, String) {
        setup_two_wave_story_with_gate(Arc::new(AlwaysPassGate)).await
    }

    async fn setup_two_wave_story_with_gate(
        gate: Arc<dyn GatePolicy>,
    ) -> (Arc<InMemoryStoryStore>, Arc<WaveScheduler>, String) {
        let store = Arc::new(InMemoryStoryStore::new());
        let registry = Arc::new(aura_core::AgentRegistry::new());
        registry.register(coder_agent());
        let events = Arc::new(EventBus::new());
        let tools = Arc::new(ToolRegistry::new());
        let llm = Arc::new(ScriptedLlmClient::new(vec![r#"{"finalAnswer":"done"}"#]));
        let step_runner = Arc::new(StepRunner::new(store.clone(), registry, events.clone(), tools, llm));
        let scheduler = Arc::new(WaveScheduler::new(store.clone(), step_runner, events, gate));

        let mut story = Story::new(
            "Add Fibonacci".into(),
            "desc".into(),
            "/repo".into(),
            AutomationMode::Autonomous,
            DispatchTarget::Internal,
            None,
        );
        story.status = StoryStatus::Planned;
        story.current_wave = 1;
        let story_id = story.id.clone();
        store.insert_story(story).await;

        let mut step1 = Step::new(story_id.clone(), 1, "Write fib".into(), "coding".into(), None, "write fib".into());
        step1.wave = 1;
        let mut step2 = Step::new(story_id.clone(), 2, "Add tests".into(), "testing".into(), None, "add tests".into());
        step2.wave = 2;
        store.insert_step(step1).await.unwrap();
        store.insert_step(step2).await.unwrap();

        (store, scheduler, story_id)
    }

    #[tokio::test]
    async fn happy_path_completes_both_waves() {
        let (store, scheduler, story_id) = setup_two_wave_story().await;
        let result = scheduler.run(&story_id, CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, StoryStatus::Completed);

        let story = store.get_story(&story_id).await.unwrap();
        assert_eq!(story.status, StoryStatus::Completed);
        let steps = store.list_steps(&story_id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
        assert!(steps.iter().all(|s| s.attempts == 1));
    }

    #[tokio::test]
    async fn gate_failure_halts_after_first_wave() {
        let (store, scheduler, story_id) = setup_two_wave_story_with_gate(Arc::new(AlwaysFailGate)).await;
        let result = scheduler.run(&story_id, CancellationToken::new()).await.unwrap();

        assert_eq!(result.status, StoryStatus::GateFailed);
        let gate_result = result.gate_result.expect("gate result recorded on failure");
        assert!(!gate_result.passed);

        let story = store.get_story(&story_id).await.unwrap();
        assert_eq!(story.status, StoryStatus::GateFailed);
        assert_eq!(story.current_wave, 1);

        let steps = store.list_steps(&story_id).await.unwrap();
        let wave1 = steps.iter().find(|s| s.wave == 1).unwrap();
        let wave2 = steps.iter().find(|s| s.wave == 2).unwrap();
        assert_eq!(wave1.status, StepStatus::Completed);
        assert_eq!(wave2.status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn cascade_rejects_all_later_wave_steps() {
        let (store, scheduler, story_id) = setup_two_wave_story().await;
        scheduler.run(&story_id, CancellationToken::new()).await.unwrap();

        let steps = store.list_steps(&story_id).await.unwrap();
        let wave1 = steps.iter().find(|s| s.wave == 1).unwrap();
        scheduler.reject_step(&story_id, &wave1.id).await.unwrap();

        let steps = store.list_steps(&story_id).await.unwrap();
        assert!(steps.iter().all(|s| s.status == StepStatus::Rejected));
        assert!(steps.iter().all(|s| s.needs_rework));

        let story = store.get_story(&story_id).await.unwrap();
        assert_eq!(story.status, StoryStatus::Running);
        assert_eq!(story.current_wave, 1);
    }

    #[tokio::test]
    async fn reset_orchestrator_rejects_from_terminal_story() {
        let (store, scheduler, story_id) = setup_two_wave_story().await;
        store
            .with_story_mut(&story_id, |s| {
                s.status = StoryStatus::Completed;
                Ok(())
            })
            .await
            .unwrap();
        let err = scheduler.reset_orchestrator(&story_id, false).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reset_orchestrator_from_gate_failed_returns_planned() {
        let (store, scheduler, story_id) = setup_two_wave_story().await;
        store
            .with_story_mut(&story_id, |s| {
                s.status = StoryStatus::GateFailed;
                Ok(())
            })
            .await
            .unwrap();
        let story = scheduler.reset_orchestrator(&story_id, false).await.unwrap();
        assert_eq!(story.status, StoryStatus::Planned);
    }
}
