//! Story State Machine (C5): owns Story lifecycle, persistence, chat-driven
//! plan edits, cascade-rework delegation, cancellation, and finalization
//! (§4.5). Composes the Agent Registry (C1), Wave Scheduler (C4), and Event
//! Bus (C6); the Scheduler and Step Runner own everything that happens
//! *inside* a Run.

use crate::llm::LlmClient;
use crate::scheduler::{RunResult, WaveScheduler};
use crate::step_runner::StepRunner;
use crate::store::StoryStore;
use crate::worktree_bridge::WorktreeBridge;
use aura_core::state_machine::step_sm::{self, StepTransition};
use aura_core::state_machine::story_sm::{self, StoryTransition};
use aura_core::{
    is_known_capability, Approval, AuraError, AuraResult, AutomationMode, ChatMessage, ChatRole,
    DispatchTarget, EventBus, IssueLink, Step, StepStatus, Story, StoryEvent, StoryStatus,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Seam for the "create a pull request" sub-step of Finalize. Concretely
/// backing this (talking to a forge API) is the git service tool's job,
/// out of scope here; Finalize only needs somewhere to call into.
#[async_trait::async_trait]
pub trait PullRequestCreator: Send + Sync {
    async fn create(
        &self,
        worktree_path: &str,
        branch: &str,
        title: &str,
        labels: &[String],
    ) -> Result<String, String>;
}

/// Result of a Story-level `chat()` call, shaped to match the HTTP chat
/// response body directly (§6 `POST .../chat`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOutcome {
    pub response: String,
    pub plan_modified: bool,
    pub steps_added: Vec<String>,
    pub steps_removed: Vec<String>,
    pub analysis_updated: bool,
}

pub struct StoryService {
    store: Arc<dyn StoryStore>,
    registry: Arc<aura_core::AgentRegistry>,
    events: Arc<EventBus>,
    scheduler: Arc<WaveScheduler>,
    step_runner: Arc<StepRunner>,
    llm: Arc<dyn LlmClient>,
    worktrees: Option<Arc<WorktreeBridge>>,
    issues: Option<Arc<dyn crate::beads_bridge::IssueTracker + Send + Sync>>,
    pull_requests: Option<Arc<dyn PullRequestCreator>>,
    active_runs: Mutex<HashMap<String, CancellationToken>>,
}

impl StoryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StoryStore>,
        registry: Arc<aura_core::AgentRegistry>,
        events: Arc<EventBus>,
        scheduler: Arc<WaveScheduler>,
        step_runner: Arc<StepRunner>,
        llm: Arc<dyn LlmClient>,
        worktrees: Option<Arc<WorktreeBridge>>,
        issues: Option<Arc<dyn crate::beads_bridge::IssueTracker + Send + Sync>>,
        pull_requests: Option<Arc<dyn PullRequestCreator>>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            scheduler,
            step_runner,
            llm,
            worktrees,
            issues,
            pull_requests,
            active_runs: Mutex::new(HashMap::new()),
        }
    }

    // ---- Create / Get / List / Delete ---------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        title: String,
        description: String,
        repository_path: String,
        automation_mode: AutomationMode,
        dispatch_target: DispatchTarget,
        issue_link: Option<IssueLink>,
    ) -> AuraResult<Story> {
        if title.trim().is_empty() {
            return Err(AuraError::missing_field("title"));
        }
        let mut story = Story::new(
            title,
            description,
            repository_path,
            automation_mode,
            dispatch_target,
            issue_link,
        );

        if let Some(bridge) = self.worktrees.clone() {
            let key = story.id.clone();
            let wt_path = tokio::task::spawn_blocking(move || bridge.create(&key))
                .await
                .map_err(|e| AuraError::git_error(format!("worktree task panicked: {e}")))?
                .map_err(|e| AuraError::git_error(e.to_string()))?;
            story.worktree_path = Some(wt_path.display().to_string());
            story.git_branch = Some(format!("swarm/{}", story.id));
        }

        let story_id = story.id.clone();
        self.store.insert_story(story).await;
        self.events
            .publish(StoryEvent::StoryCreated {
                story_id: story_id.clone(),
                timestamp: Utc::now(),
            })
            .ok();
        self.store.get_story(&story_id).await
    }

    pub async fn get(&self, story_id: &str) -> AuraResult<Story> {
        self.store.get_story(story_id).await
    }

    pub async fn get_with_steps(&self, story_id: &str) -> AuraResult<(Story, Vec<Step>)> {
        let story = self.store.get_story(story_id).await?;
        let steps = self.store.list_steps(story_id).await?;
        Ok((story, steps))
    }

    pub async fn list(&self, status: Option<StoryStatus>, repository_path: Option<&str>) -> Vec<Story> {
        self.store.list_stories(status, repository_path).await
    }

    pub async fn delete(&self, story_id: &str) -> AuraResult<()> {
        let story = self.store.get_story(story_id).await?;
        if !story_sm::can_delete(story.status) {
            return Err(AuraError::invalid_state(format!(
                "cannot delete story in terminal status {:?}",
                story.status
            )));
        }
        self.store.delete_story(story_id).await
    }

    // ---- Analyze / Plan / Decompose ------------------------------------

    /// Routes to the best `analysis` agent. Idempotent on re-entry: a
    /// second call while already `Analyzed` overwrites `AnalyzedContext`
    /// without moving `Status`.
    pub async fn analyze(&self, story_id: &str) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        story_sm::require_status_in(story.status, &[StoryStatus::Created, StoryStatus::Analyzed])?;

        let agent = self
            .registry
            .get_best_for_capability("analysis", None)
            .ok_or_else(|| AuraError::no_agent_for_capability("analysis", None))?;

        if story.status == StoryStatus::Created {
            self.store
                .with_story_mut(story_id, |s| {
                    s.status = story_sm::advance(s.status, StoryTransition::Analyze)?;
                    Ok(())
                })
                .await?;
        }

        let prompt = format!("Title: {}\n\nDescription:\n{}", story.title, story.description);
        let completion = self
            .llm
            .complete(&agent.system_prompt, &prompt, &agent.model, agent.temperature)
            .await
            .map_err(|e| AuraError::LlmTransient(e.to_string()))?;
        let analyzed_context = serde_json::Value::String(completion.text);

        self.store
            .with_story_mut(story_id, |s| {
                s.analyzed_context = Some(analyzed_context.clone());
                if s.status != StoryStatus::Analyzed {
                    s.status = story_sm::advance(s.status, StoryTransition::AnalyzeOk)?;
                }
                Ok(())
            })
            .await?;

        self.events
            .publish(StoryEvent::StoryAnalyzed {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        self.store.get_story(story_id).await
    }

    /// Routes to the best `planning` agent, falling back to `analysis`.
    /// Replaces any existing plan and the Steps that came from it.
    pub async fn plan(&self, story_id: &str) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        story_sm::require_status_in(story.status, &[StoryStatus::Analyzed, StoryStatus::Planned])?;

        let agent = self
            .registry
            .get_best_for_capability("planning", None)
            .or_else(|| self.registry.get_best_for_capability("analysis", None))
            .ok_or_else(|| AuraError::no_agent_for_capability("planning", None))?;

        if story.status == StoryStatus::Analyzed {
            self.store
                .with_story_mut(story_id, |s| {
                    s.status = story_sm::advance(s.status, StoryTransition::Plan)?;
                    Ok(())
                })
                .await?;
        }

        let context = story
            .analyzed_context
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let prompt = format!(
            "Analyzed context:\n{context}\n\n\
             Produce an ordered JSON array of Steps, each \
             {{\"name\":\"...\",\"capability\":\"...\",\"language\":null,\"description\":\"...\"}}."
        );
        let completion = self
            .llm
            .complete(&agent.system_prompt, &prompt, &agent.model, agent.temperature)
            .await
            .map_err(|e| AuraError::LlmTransient(e.to_string()))?;
        let descriptors = parse_step_descriptors(&completion.text);

        for d in &descriptors {
            if !is_known_capability(&d.capability) {
                tracing::warn!(capability = %d.capability, "plan references unknown capability, retaining anyway");
            }
        }

        let existing = self.store.list_steps(story_id).await?;
        for step in existing {
            self.store.delete_step(story_id, &step.id).await.ok();
        }
        let plan_value = serde_json::to_value(&descriptors).unwrap_or_default();
        for (i, d) in descriptors.iter().enumerate() {
            let step = Step::new(
                story_id.to_string(),
                (i + 1) as u32,
                d.name.clone(),
                d.capability.clone(),
                d.language.clone(),
                d.description.clone(),
            );
            self.store.insert_step(step).await?;
        }

        self.store
            .with_story_mut(story_id, |s| {
                s.plan = Some(plan_value.clone());
                if s.status != StoryStatus::Planned {
                    s.status = story_sm::advance(s.status, StoryTransition::PlanOk)?;
                }
                Ok(())
            })
            .await?;

        self.events
            .publish(StoryEvent::StoryPlanned {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        self.store.get_story(story_id).await
    }

    /// Upgrades the flat plan into wave-annotated Steps. No dependency DAG
    /// is modeled (§9 open question — the cascade fallback "every
    /// later-wave Step" is extended here too): Steps are laid out as a
    /// linear chain in `Order`, so `Wave` ends up equal to position.
    pub async fn decompose(&self, story_id: &str) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        story_sm::require_status_in(story.status, &[StoryStatus::Planned])?;

        let mut steps = self.store.list_steps(story_id).await?;
        steps.sort_by_key(|s| s.order);
        for (i, step) in steps.iter().enumerate() {
            let wave = (i + 1) as u32;
            if step.wave != wave {
                self.store
                    .with_step_mut(story_id, &step.id, |s| {
                        s.wave = wave;
                        Ok(())
                    })
                    .await?;
            }
        }

        let total_waves = steps.len() as u32;
        self.events
            .publish(StoryEvent::StoryDecomposed {
                story_id: story_id.to_string(),
                total_waves,
                timestamp: Utc::now(),
            })
            .ok();
        self.store.get_story(story_id).await
    }

    // ---- Run / Cancel / Complete ---------------------------------------

    /// Runs the Scheduler to completion, a gate pause, or a blocked wave.
    /// Registers a `CancellationToken` for the duration so a concurrent
    /// `cancel()` call can interrupt it.
    pub async fn run(&self, story_id: &str) -> AuraResult<RunResult> {
        let cancel = CancellationToken::new();
        self.active_runs.lock().await.insert(story_id.to_string(), cancel.clone());
        let result = self.scheduler.run(story_id, cancel).await;
        self.active_runs.lock().await.remove(story_id);
        result
    }

    /// Exposes the same token `run()` uses, so a streaming HTTP handler can
    /// drive the Scheduler directly and still be cancellable.
    pub async fn run_token(&self, story_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.active_runs.lock().await.insert(story_id.to_string(), token.clone());
        token
    }

    pub async fn finish_run(&self, story_id: &str) {
        self.active_runs.lock().await.remove(story_id);
    }

    /// Cancels an in-flight Run via its token; otherwise transitions the
    /// Story directly (it was never running, or the Run already finished).
    pub async fn cancel(&self, story_id: &str) -> AuraResult<()> {
        let token = self.active_runs.lock().await.get(story_id).cloned();
        if let Some(token) = token {
            token.cancel();
            return Ok(());
        }
        self.store
            .with_story_mut(story_id, |s| {
                s.status = story_sm::advance(s.status, StoryTransition::Cancel)?;
                Ok(())
            })
            .await?;
        self.events
            .publish(StoryEvent::StoryCancelled {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        self.events
            .publish(StoryEvent::Done {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        Ok(())
    }

    /// Administrative completion, used when a Story is dispatched
    /// externally (`DispatchTarget::CopilotCli`) and the client reports
    /// completion rather than the Scheduler driving waves itself.
    pub async fn complete(&self, story_id: &str) -> AuraResult<Story> {
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
        self.events
            .publish(StoryEvent::Done {
                story_id: story_id.to_string(),
                timestamp: Utc::now(),
            })
            .ok();
        self.store.get_story(story_id).await
    }

    pub async fn reset_orchestrator(&self, story_id: &str, reset_failed_steps: bool) -> AuraResult<Story> {
        self.scheduler.reset_orchestrator(story_id, reset_failed_steps).await
    }

    /// Administrative status override (§6 `PATCH .../status`). Rejects
    /// overriding a terminal Story; otherwise bypasses the per-operation
    /// transition table, since this endpoint exists precisely to recover
    /// from a Story stuck outside the table's normal paths.
    pub async fn reset_status(&self, story_id: &str, target: StoryStatus) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        if story.status.is_terminal() {
            return Err(AuraError::invalid_state(format!(
                "cannot override status of a terminal story ({:?})",
                story.status
            )));
        }
        if target.is_terminal() {
            return Err(AuraError::invalid_state(format!(
                "{target:?} is not a legal administrative override target; use complete/cancel/finalize instead"
            )));
        }
        self.store
            .with_story_mut(story_id, |s| {
                s.status = target;
                Ok(())
            })
            .await?;
        self.store.get_story(story_id).await
    }

    // ---- Chat -----------------------------------------------------------

    /// Story-level chat. Dispatches to a planning/analysis agent with the
    /// current plan and analyzed context as additional context; applies
    /// any structured plan delta the agent's response carries.
    pub async fn chat(&self, story_id: &str, message: String) -> AuraResult<ChatOutcome> {
        let story = self.store.get_story(story_id).await?;
        story_sm::require_status_in(
            story.status,
            &[
                StoryStatus::Analyzed,
                StoryStatus::Planned,
                StoryStatus::Running,
                StoryStatus::GatePending,
                StoryStatus::GateFailed,
            ],
        )?;

        self.store
            .with_story_mut(story_id, |s| {
                s.chat_history.push(ChatMessage {
                    role: ChatRole::User,
                    content: message.clone(),
                    timestamp: Utc::now(),
                });
                Ok(())
            })
            .await?;

        let agent = self
            .registry
            .get_best_for_capability("planning", None)
            .or_else(|| self.registry.get_best_for_capability("analysis", None))
            .ok_or_else(|| AuraError::no_agent_for_capability("planning", None))?;

        let context = story
            .analyzed_context
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default();
        let plan = story.plan.as_ref().map(|v| v.to_string()).unwrap_or_default();
        let prompt = format!(
            "Analyzed context:\n{context}\n\nCurrent plan:\n{plan}\n\nUser message:\n{message}\n\n\
             Respond as JSON: {{\"response\":\"...\",\"stepsAdded\":[],\"stepsRemoved\":[],\
             \"analysisUpdated\":false,\"analysis\":null}}."
        );
        let completion = self
            .llm
            .complete(&agent.system_prompt, &prompt, &agent.model, agent.temperature)
            .await
            .map_err(|e| AuraError::LlmTransient(e.to_string()))?;
        let delta = parse_chat_delta(&completion.text);

        let mut steps_added = Vec::new();
        if !delta.steps_added.is_empty() {
            let existing = self.store.list_steps(story_id).await?;
            let mut next_order = existing.iter().map(|s| s.order).max().unwrap_or(0);
            for d in &delta.steps_added {
                next_order += 1;
                let step = Step::new(
                    story_id.to_string(),
                    next_order,
                    d.name.clone(),
                    d.capability.clone(),
                    d.language.clone(),
                    d.description.clone(),
                );
                self.store.insert_step(step.clone()).await?;
                steps_added.push(step.id);
            }
        }
        for step_id in &delta.steps_removed {
            self.store.delete_step(story_id, step_id).await.ok();
        }

        self.store
            .with_story_mut(story_id, |s| {
                if delta.analysis_updated {
                    s.analyzed_context = delta.analysis.clone();
                }
                s.chat_history.push(ChatMessage {
                    role: ChatRole::Agent,
                    content: delta.response.clone(),
                    timestamp: Utc::now(),
                });
                Ok(())
            })
            .await?;

        self.events
            .publish(StoryEvent::ChatResponse {
                story_id: story_id.to_string(),
                response: delta.response.clone(),
                timestamp: Utc::now(),
            })
            .ok();

        let plan_modified = !steps_added.is_empty() || !delta.steps_removed.is_empty();
        Ok(ChatOutcome {
            response: delta.response,
            plan_modified,
            steps_added,
            steps_removed: delta.steps_removed,
            analysis_updated: delta.analysis_updated,
        })
    }

    /// Per-Step chat, used to feed reviewer feedback into a rework cycle;
    /// appended to `Step::chat_history` and read back by the Step Runner's
    /// prompt rendering (§4.3 step 4).
    pub async fn chat_with_step(&self, story_id: &str, step_id: &str, message: String) -> AuraResult<String> {
        let step = self.store.get_step(story_id, step_id).await?;
        let agent_id = step
            .agent_id
            .clone()
            .ok_or_else(|| AuraError::invalid_state("step has not yet been assigned an agent"))?;
        let agent = self
            .registry
            .get(&agent_id)
            .ok_or_else(|| AuraError::not_found(format!("agent {agent_id}")))?;

        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.chat_history.push(ChatMessage {
                    role: ChatRole::User,
                    content: message.clone(),
                    timestamp: Utc::now(),
                });
                Ok(())
            })
            .await?;

        let prompt = format!("Step: {}\n\n{}\n\nUser message:\n{}", step.name, step.description, message);
        let completion = self
            .llm
            .complete(&agent.system_prompt, &prompt, &agent.model, agent.temperature)
            .await
            .map_err(|e| AuraError::LlmTransient(e.to_string()))?;

        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.chat_history.push(ChatMessage {
                    role: ChatRole::Agent,
                    content: completion.text.clone(),
                    timestamp: Utc::now(),
                });
                Ok(())
            })
            .await?;

        Ok(completion.text)
    }

    // ---- Step editing ----------------------------------------------------

    pub async fn add_step(
        &self,
        story_id: &str,
        name: String,
        capability: String,
        language: Option<String>,
        description: String,
    ) -> AuraResult<Step> {
        if !is_known_capability(&capability) {
            tracing::warn!(capability = %capability, "adding step with unknown capability");
        }
        let existing = self.store.list_steps(story_id).await?;
        let order = existing.iter().map(|s| s.order).max().unwrap_or(0) + 1;
        let step = Step::new(story_id.to_string(), order, name, capability, language, description);
        self.store.insert_step(step.clone()).await?;
        Ok(step)
    }

    /// Runs a single Step outside of a Story-wide `Run`, via the Step
    /// Runner directly. For manual dispatch of one Step (e.g. a rerun
    /// after `reset_step`) without advancing the rest of the wave.
    pub async fn execute_step(&self, story_id: &str, step_id: &str) -> AuraResult<Step> {
        self.step_runner
            .run_step(story_id, step_id, None, CancellationToken::new())
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    pub async fn remove_step(&self, story_id: &str, step_id: &str) -> AuraResult<()> {
        let step = self.store.get_step(story_id, step_id).await?;
        if matches!(step.status, StepStatus::Running | StepStatus::Completed) {
            return Err(AuraError::invalid_state(format!(
                "cannot remove step in status {:?}",
                step.status
            )));
        }
        self.store.delete_step(story_id, step_id).await
    }

    pub async fn update_step_description(&self, story_id: &str, step_id: &str, description: String) -> AuraResult<Step> {
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.description = description;
                Ok(())
            })
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    pub async fn approve_step(&self, story_id: &str, step_id: &str, feedback: Option<String>) -> AuraResult<Step> {
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.approval = Some(Approval::Approved);
                s.approval_feedback = feedback;
                Ok(())
            })
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    /// Records the rejection's approval/feedback, then hands the cascade
    /// off to the Scheduler, which owns the rework propagation rules.
    pub async fn reject_step(&self, story_id: &str, step_id: &str, feedback: Option<String>) -> AuraResult<()> {
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.approval = Some(Approval::Rejected);
                s.approval_feedback = feedback;
                Ok(())
            })
            .await?;
        self.scheduler.reject_step(story_id, step_id).await
    }

    pub async fn skip_step(&self, story_id: &str, step_id: &str, reason: Option<String>) -> AuraResult<Step> {
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.status = step_sm::advance(s.status, StepTransition::Skip)?;
                s.skip_reason = reason;
                Ok(())
            })
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    pub async fn reset_step(&self, story_id: &str, step_id: &str) -> AuraResult<Step> {
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.status = step_sm::advance(s.status, StepTransition::Reset)?;
                s.output = None;
                s.error = None;
                s.previous_output = None;
                s.needs_rework = false;
                Ok(())
            })
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    pub async fn reassign_step(&self, story_id: &str, step_id: &str, agent_id: &str) -> AuraResult<Step> {
        self.registry
            .get(agent_id)
            .ok_or_else(|| AuraError::not_found(format!("agent {agent_id}")))?;
        self.store
            .with_step_mut(story_id, step_id, |s| {
                s.agent_id = Some(agent_id.to_string());
                Ok(())
            })
            .await?;
        self.store.get_step(story_id, step_id).await
    }

    // ---- Finalize ---------------------------------------------------------

    /// Precondition: Story `Completed`, or all Steps `Completed`/`Skipped`.
    /// Commits a dirty worktree, pushes the branch, and optionally opens a
    /// pull request. On any sub-step failure, Story state is untouched
    /// except `PullRequestUrl`, which is only ever set on full success.
    pub async fn finalize(
        &self,
        story_id: &str,
        commit_message: Option<String>,
        create_pr: bool,
        labels: Vec<String>,
    ) -> AuraResult<Story> {
        let story = self.store.get_story(story_id).await?;
        let steps = self.store.list_steps(story_id).await?;
        let all_done = !steps.is_empty()
            && steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped));
        if story.status != StoryStatus::Completed && !all_done {
            return Err(AuraError::invalid_state(
                "story must be Completed, or have every Step Completed/Skipped, before Finalize",
            ));
        }

        let worktree_path = story
            .worktree_path
            .clone()
            .ok_or_else(|| AuraError::invalid_state("story has no worktree"))?;
        let branch = story
            .git_branch
            .clone()
            .ok_or_else(|| AuraError::invalid_state("story has no git branch"))?;
        let message = commit_message.unwrap_or_else(|| format!("feat: {}", story.title));

        let wt = worktree_path.clone();
        let msg = message.clone();
        tokio::task::spawn_blocking(move || commit_if_dirty(&wt, &msg))
            .await
            .map_err(|e| AuraError::git_error(format!("commit task panicked: {e}")))?
            .map_err(AuraError::git_error)?;

        let wt = worktree_path.clone();
        let br = branch.clone();
        tokio::task::spawn_blocking(move || push_branch(&wt, &br))
            .await
            .map_err(|e| AuraError::git_error(format!("push task panicked: {e}")))?
            .map_err(AuraError::git_error)?;

        let mut pr_url = None;
        if create_pr {
            let creator = self
                .pull_requests
                .clone()
                .ok_or_else(|| AuraError::invalid_state("no pull request creator configured"))?;
            let url = creator
                .create(&worktree_path, &branch, &story.title, &labels)
                .await
                .map_err(AuraError::git_error)?;
            pr_url = Some(url);
        }

        self.store
            .with_story_mut(story_id, |s| {
                if let Some(url) = &pr_url {
                    s.pull_request_url = Some(url.clone());
                }
                Ok(())
            })
            .await?;
        self.store.get_story(story_id).await
    }

    // ---- Issue integration (thin adapters) --------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_from_issue(
        &self,
        title: String,
        description: String,
        repository_path: String,
        issue_link: IssueLink,
        automation_mode: AutomationMode,
        dispatch_target: DispatchTarget,
    ) -> AuraResult<Story> {
        self.create(title, description, repository_path, automation_mode, dispatch_target, Some(issue_link))
            .await
    }

    pub async fn refresh_from_issue(&self, story_id: &str, title: String, description: String) -> AuraResult<Story> {
        self.store
            .with_story_mut(story_id, |s| {
                s.title = title;
                s.description = description;
                Ok(())
            })
            .await?;
        self.store.get_story(story_id).await
    }

    pub async fn post_update_to_issue(&self, story_id: &str, status: &str) -> AuraResult<()> {
        let story = self.store.get_story(story_id).await?;
        let link = story
            .issue_link
            .ok_or_else(|| AuraError::invalid_state("story has no linked issue"))?;
        let tracker = self
            .issues
            .clone()
            .ok_or_else(|| AuraError::invalid_state("no issue tracker configured"))?;
        let id = link.issue_number.to_string();
        let status = status.to_string();
        tokio::task::spawn_blocking(move || tracker.update_status(&id, &status))
            .await
            .map_err(|e| AuraError::Internal(format!("issue tracker task panicked: {e}")))?
            .map_err(|e| AuraError::Internal(e.to_string()))
    }

    pub async fn close_linked_issue(&self, story_id: &str, reason: Option<String>) -> AuraResult<()> {
        let story = self.store.get_story(story_id).await?;
        let link = story
            .issue_link
            .ok_or_else(|| AuraError::invalid_state("story has no linked issue"))?;
        let tracker = self
            .issues
            .clone()
            .ok_or_else(|| AuraError::invalid_state("no issue tracker configured"))?;
        let id = link.issue_number.to_string();
        tokio::task::spawn_blocking(move || tracker.close(&id, reason.as_deref()))
            .await
            .map_err(|e| AuraError::Internal(format!("issue tracker task panicked: {e}")))?
            .map_err(|e| AuraError::Internal(e.to_string()))
    }
}

fn commit_if_dirty(worktree_path: &str, message: &str) -> Result<(), String> {
    let status = std::process::Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| format!("git status failed: {e}"))?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        return Ok(());
    }

    let add = std::process::Command::new("git")
        .args(["add", "-A"])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| format!("git add failed: {e}"))?;
    if !add.status.success() {
        return Err(format!("git add failed: {}", String::from_utf8_lossy(&add.stderr)));
    }

    let commit = std::process::Command::new("git")
        .args(["commit", "--no-verify", "-m", message])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| format!("git commit failed: {e}"))?;
    if !commit.status.success() {
        return Err(format!("git commit failed: {}", String::from_utf8_lossy(&commit.stderr)));
    }
    Ok(())
}

fn push_branch(worktree_path: &str, branch: &str) -> Result<(), String> {
    let push = std::process::Command::new("git")
        .args(["push", "-u", "origin", branch])
        .current_dir(worktree_path)
        .output()
        .map_err(|e| format!("git push failed: {e}"))?;
    if !push.status.success() {
        return Err(format!("git push failed: {}", String::from_utf8_lossy(&push.stderr)));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StepDescriptor {
    name: String,
    capability: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PlanBody {
    #[serde(default)]
    steps: Vec<StepDescriptor>,
}

/// The planning agent may wrap its array in `{"steps": [...]}` or emit the
/// bare array; accept either.
fn parse_step_descriptors(text: &str) -> Vec<StepDescriptor> {
    let trimmed = text.trim();
    if let Some(slice) = extract_json_array(trimmed) {
        if let Ok(list) = serde_json::from_str::<Vec<StepDescriptor>>(slice) {
            return list;
        }
    }
    if let Some(slice) = extract_json_object(trimmed) {
        if let Ok(body) = serde_json::from_str::<PlanBody>(slice) {
            return body.steps;
        }
    }
    Vec::new()
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ChatDelta {
    #[serde(default)]
    response: String,
    #[serde(rename = "stepsAdded", default)]
    steps_added: Vec<StepDescriptor>,
    #[serde(rename = "stepsRemoved", default)]
    steps_removed: Vec<String>,
    #[serde(rename = "analysisUpdated", default)]
    analysis_updated: bool,
    #[serde(default)]
    analysis: Option<serde_json::Value>,
}

fn parse_chat_delta(text: &str) -> ChatDelta {
    let trimmed = text.trim();
    if let Some(slice) = extract_json_object(trimmed) {
        if let Ok(delta) = serde_json::from_str::<ChatDelta>(slice) {
            return delta;
        }
    }
    ChatDelta {
        response: trimmed.to_string(),
        ..Default::default()
    }
}

/// The model may wrap its JSON in prose or a code fence; pull out the first
/// balanced `{...}` block rather than requiring an exact match (mirrors the
/// ReAct Executor's own tolerant parsing).
fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, '{', '}')
}

fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, '[', ']')
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0i32;
    for (i, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + i + 1]);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::scheduler::WaveScheduler;
    use crate::step_runner::StepRunner;
    use crate::store::InMemoryStoryStore;
    use crate::tools::ToolRegistry;
    use aura_core::{Agent, AgentRegistry, AlwaysPassGate};
    use std::collections::BTreeSet;

    fn analyst_agent() -> Agent {
        Agent {
            id: "analyst".into(),
            display_name: "Analyst".into(),
            description: String::new(),
            capabilities: BTreeSet::from(["analysis".to_string(), "planning".to_string()]),
            priority: 10,
            languages: BTreeSet::new(),
            provider: "test".into(),
            model: "test-model".into(),
            temperature: 0.1,
            tools: None,
            tags: Vec::new(),
            system_prompt: "You plan work.".into(),
        }
    }

    fn service(llm_responses: Vec<&str>) -> StoryService {
        let store = Arc::new(InMemoryStoryStore::new());
        let registry = Arc::new(AgentRegistry::new());
        registry.register(analyst_agent());
        let events = Arc::new(EventBus::new());
        let tools = Arc::new(ToolRegistry::new());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::new(llm_responses));
        let step_runner = Arc::new(StepRunner::new(
            store.clone(),
            registry.clone(),
            events.clone(),
            tools,
            llm.clone(),
        ));
        let gate = Arc::new(AlwaysPassGate);
        let scheduler = Arc::new(WaveScheduler::new(store.clone(), step_runner.clone(), events.clone(), gate));
        StoryService::new(store, registry, events, scheduler, step_runner, llm, None, None, None)
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let svc = service(vec![]);
        let err = svc
            .create(
                "  ".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn analyze_then_plan_then_decompose_lays_out_waves() {
        let svc = service(vec![
            "the repo has a fib module",
            r#"[{"name":"Write fib","capability":"coding","description":"implement"},{"name":"Add tests","capability":"testing","description":"cover it"}]"#,
        ]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();

        let story = svc.analyze(&story.id).await.unwrap();
        assert_eq!(story.status, StoryStatus::Analyzed);
        assert!(story.analyzed_context.is_some());

        let story = svc.plan(&story.id).await.unwrap();
        assert_eq!(story.status, StoryStatus::Planned);
        let (_, steps) = svc.get_with_steps(&story.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.wave == 0));

        let story = svc.decompose(&story.id).await.unwrap();
        assert_eq!(story.status, StoryStatus::Planned);
        let (_, steps) = svc.get_with_steps(&story.id).await.unwrap();
        assert_eq!(steps[0].wave, 1);
        assert_eq!(steps[1].wave, 2);
    }

    #[tokio::test]
    async fn chat_appends_a_step_and_relayout_picks_it_up() {
        let svc = service(vec![
            "analysis",
            r#"[{"name":"X","capability":"coding","description":"x"},{"name":"Y","capability":"coding","description":"y"}]"#,
            r#"{"response":"added a migration step","stepsAdded":[{"name":"Write migration","capability":"coding","description":"migrate"}]}"#,
        ]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();
        svc.analyze(&story.id).await.unwrap();
        svc.plan(&story.id).await.unwrap();
        svc.decompose(&story.id).await.unwrap();

        let outcome = svc.chat(&story.id, "Also add a migration step before Y".into()).await.unwrap();
        assert_eq!(outcome.response, "added a migration step");
        assert!(outcome.plan_modified);
        assert_eq!(outcome.steps_added.len(), 1);

        let (_, steps) = svc.get_with_steps(&story.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].name, "Write migration");
        assert_eq!(steps[2].wave, 0);

        svc.decompose(&story.id).await.unwrap();
        let (_, steps) = svc.get_with_steps(&story.id).await.unwrap();
        assert_eq!(steps[0].wave, 1);
        assert_eq!(steps[1].wave, 2);
        assert_eq!(steps[2].wave, 3);
    }

    #[tokio::test]
    async fn delete_rejects_terminal_story() {
        let svc = service(vec![]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();
        svc.store
            .with_story_mut(&story.id, |s| {
                s.status = StoryStatus::Completed;
                Ok(())
            })
            .await
            .unwrap();
        assert!(svc.delete(&story.id).await.is_err());
    }

    #[tokio::test]
    async fn reset_status_rejects_terminal_targets() {
        let svc = service(vec![]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();
        let err = svc.reset_status(&story.id, StoryStatus::Completed).await;
        assert!(err.is_err());
        let err = svc.reset_status(&story.id, StoryStatus::Cancelled).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn reset_status_accepts_a_legal_override_target() {
        let svc = service(vec![]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();
        let story = svc.reset_status(&story.id, StoryStatus::Analyzed).await.unwrap();
        assert_eq!(story.status, StoryStatus::Analyzed);
    }

    #[tokio::test]
    async fn finalize_rejects_story_with_incomplete_steps() {
        let svc = service(vec![]);
        let story = svc
            .create(
                "Add Fibonacci".into(),
                "desc".into(),
                "/repo".into(),
                AutomationMode::Autonomous,
                DispatchTarget::Internal,
                None,
            )
            .await
            .unwrap();
        svc.add_step(&story.id, "Write fib".into(), "coding".into(), None, "x".into())
            .await
            .unwrap();
        let err = svc.finalize(&story.id, None, false, Vec::new()).await;
        assert!(err.is_err());
    }
}
