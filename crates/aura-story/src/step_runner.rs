//! Step Runner (C3): executes one Step via a direct agent call or the
//! ReAct Executor, persisting outputs/diagnostics and publishing events
//! (§4.3).

use crate::llm::LlmClient;
use crate::react_executor::{ReactExecutor, ReactOptions};
use crate::store::StoryStore;
use crate::tools::ToolRegistry;
use aura_core::{AgentRegistry, AuraError, AuraResult, EventBus, StepStatus, Story, StoryEvent};
use aura_core::state_machine::step_sm::{self, StepTransition};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Predecessor output passed into an agent's context (§4.3 step 4).
pub struct PriorStep {
    pub id: String,
    pub name: String,
    pub output: Option<serde_json::Value>,
}

pub struct StepRunner {
    store: Arc<dyn StoryStore>,
    registry: Arc<AgentRegistry>,
    events: Arc<EventBus>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    config: Arc<aura_core::Config>,
}

impl StepRunner {
    pub fn new(
        store: Arc<dyn StoryStore>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventBus>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self::with_config(store, registry, events, tools, llm, Arc::new(aura_core::Config::default()))
    }

    pub fn with_config(
        store: Arc<dyn StoryStore>,
        registry: Arc<AgentRegistry>,
        events: Arc<EventBus>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmClient>,
        config: Arc<aura_core::Config>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            tools,
            llm,
            config,
        }
    }

    /// Runs `RunStep(storyId, stepId, agentIdOverride?, context)` to
    /// completion, returning the updated Step's id on success.
    pub async fn run_step(
        &self,
        story_id: &str,
        step_id: &str,
        agent_id_override: Option<&str>,
        cancel: CancellationToken,
    ) -> AuraResult<()> {
        let story = self.store.get_story(story_id).await?;
        require_runnable(&story)?;

        let agent = match agent_id_override {
            Some(id) => self
                .registry
                .get(id)
                .ok_or_else(|| AuraError::not_found(format!("agent {id}")))?,
            None => {
                let step = self.store.get_step(story_id, step_id).await?;
                self.registry
                    .get_best_for_capability(&step.capability, step.language.as_deref())
                    .ok_or_else(|| {
                        AuraError::no_agent_for_capability(step.capability.clone(), step.language.clone())
                    })?
            }
        };

        let prior_steps = self.collect_prior_steps(story_id, step_id).await?;

        self.store
            .with_step_mut(story_id, step_id, |step| {
                step.status = step_sm::advance(step.status, StepTransition::Start)?;
                step.started_at = Some(Utc::now());
                step.attempts += 1;
                step.agent_id = Some(agent.id.clone());
                Ok(())
            })
            .await?;

        let step = self.store.get_step(story_id, step_id).await?;
        self.events
            .publish(StoryEvent::StepStarted {
                story_id: story_id.to_string(),
                step_id: step_id.to_string(),
                step_name: step.name.clone(),
                wave: step.wave,
                timestamp: Utc::now(),
            })
            .ok();

        let user_prompt = render_user_prompt(&step, &prior_steps, story.worktree_path.as_deref());

        let dispatch_result: Result<Option<serde_json::Value>, String> = if agent.uses_tools() {
            let autonomous = matches!(story.automation_mode, aura_core::AutomationMode::Autonomous);
            let filtered = self.tools.filtered(agent.tools.as_deref(), autonomous);
            let executor = ReactExecutor::new(self.llm.clone(), self.config.tool_timeout, self.config.react_step_budget);
            let options = ReactOptions {
                temperature: agent.temperature,
                working_directory: story.worktree_path.clone(),
                ..Default::default()
            };
            let trace = executor
                .execute(&user_prompt, &agent.system_prompt, &filtered, &agent.model, &options, cancel)
                .await;
            if trace.success {
                Ok(Some(serde_json::to_value(&trace).unwrap_or_default()))
            } else {
                Err(trace.error.unwrap_or_else(|| "react execution failed".to_string()))
            }
        } else {
            match self
                .llm
                .complete(&agent.system_prompt, &user_prompt, &agent.model, agent.temperature)
                .await
            {
                Ok(completion) => Ok(Some(serde_json::Value::String(completion.text))),
                Err(e) => Err(e.to_string()),
            }
        };

        match dispatch_result {
            Ok(output) => {
                self.store
                    .with_step_mut(story_id, step_id, |step| {
                        step.output = output.clone();
                        step.error = None;
                        step.needs_rework = false;
                        step.previous_output = None;
                        step.status = step_sm::advance(step.status, StepTransition::Success)?;
                        step.completed_at = Some(Utc::now());
                        Ok(())
                    })
                    .await?;
                let step = self.store.get_step(story_id, step_id).await?;
                self.events
                    .publish(StoryEvent::StepCompleted {
                        story_id: story_id.to_string(),
                        step_id: step_id.to_string(),
                        step_name: step.name,
                        output: step.output,
                        timestamp: Utc::now(),
                    })
                    .ok();
                Ok(())
            }
            Err(error) => {
                self.store
                    .with_step_mut(story_id, step_id, |step| {
                        step.error = Some(error.clone());
                        step.status = step_sm::advance(step.status, StepTransition::Failure)?;
                        Ok(())
                    })
                    .await?;
                let step = self.store.get_step(story_id, step_id).await?;
                self.events
                    .publish(StoryEvent::StepFailed {
                        story_id: story_id.to_string(),
                        step_id: step_id.to_string(),
                        step_name: step.name,
                        error: error.clone(),
                        timestamp: Utc::now(),
                    })
                    .ok();
                Err(AuraError::Internal(error))
            }
        }
    }

    async fn collect_prior_steps(&self, story_id: &str, step_id: &str) -> AuraResult<Vec<PriorStep>> {
        let steps = self.store.list_steps(story_id).await?;
        let current = steps
            .iter()
            .find(|s| s.id == step_id)
            .ok_or_else(|| AuraError::not_found(format!("step {step_id}")))?;
        Ok(steps
            .iter()
            .filter(|s| s.wave < current.wave && s.status == StepStatus::Completed)
            .map(|s| PriorStep {
                id: s.id.clone(),
                name: s.name.clone(),
                output: s.output.clone(),
            })
            .collect())
    }
}

fn require_runnable(story: &Story) -> AuraResult<()> {
    if story.status == aura_core::StoryStatus::Running {
        Ok(())
    } else {
        Err(AuraError::invalid_state(format!(
            "story {} is not in a runnable status ({:?})",
            story.id, story.status
        )))
    }
}

fn render_user_prompt(step: &aura_core::Step, prior_steps: &[PriorStep], workspace_path: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str(&step.description);
    if let Some(path) = workspace_path {
        out.push_str(&format!("\n\nWorkspace: {path}"));
    }
    if !prior_steps.is_empty() {
        out.push_str("\n\nCompleted predecessor steps:\n");
        for p in prior_steps {
            out.push_str(&format!(
                "- {} ({}): {}\n",
                p.name,
                p.id,
                p.output.as_ref().map(|v| v.to_string()).unwrap_or_default()
            ));
        }
    }
    if step.needs_rework {
        if let Some(prev) = &step.previous_output {
            out.push_str(&format!("\n\nPrevious output (rejected):\n{prev}"));
        }
        if let Some(feedback) = &step.approval_feedback {
            out.push_str(&format!("\n\nReviewer feedback:\n{feedback}"));
        }
        if !step.chat_history.is_empty() {
            out.push_str("\n\nChat history:\n");
            for m in &step.chat_history {
                out.push_str(&format!("{:?}: {}\n", m.role, m.content));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::store::InMemoryStoryStore;
    use aura_core::{Agent, AutomationMode, DispatchTarget, Step};
    use std::collections::BTreeSet;

    fn direct_agent() -> Agent {
        Agent {
            id: "analyst".into(),
            display_name: "Analyst".into(),
            description: String::new(),
            capabilities: BTreeSet::from(["analysis".to_string()]),
            priority: 10,
            languages: BTreeSet::new(),
            provider: "test".into(),
            model: "test-model".into(),
            temperature: 0.1,
            tools: None,
            tags: Vec::new(),
            system_prompt: "You analyze.".into(),
        }
    }

    async fn setup() -> (Arc<InMemoryStoryStore>, Arc<AgentRegistry>, Arc<EventBus>, Arc<ToolRegistry>, String, String) {
        let store = Arc::new(InMemoryStoryStore::new());
        let registry = Arc::new(AgentRegistry::new());
        registry.register(direct_agent());
        let events = Arc::new(EventBus::new());
        let tools = Arc::new(ToolRegistry::new());

        let mut story = Story::new(
            "Add Fibonacci".into(),
            "desc".into(),
            "/repo".into(),
            AutomationMode::Autonomous,
            DispatchTarget::Internal,
            None,
        );
        story.status = aura_core::StoryStatus::Running;
        let story_id = story.id.clone();
        store.insert_story(story).await;

        let step = Step::new(story_id.clone(), 1, "Analyze repo".into(), "analysis".into(), None, "Analyze the repo".into());
        let step_id = step.id.clone();
        store.insert_step(step).await.unwrap();

        (store, registry, events, tools, story_id, step_id)
    }

    #[tokio::test]
    async fn direct_call_completes_the_step() {
        let (store, registry, events, tools, story_id, step_id) = setup().await;
        let llm = Arc::new(ScriptedLlmClient::new(vec!["analysis result"]));
        let runner = StepRunner::new(store.clone(), registry, events, tools, llm);

        runner
            .run_step(&story_id, &step_id, None, CancellationToken::new())
            .await
            .unwrap();

        let step = store.get_step(&story_id, &step_id).await.unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.attempts, 1);
        assert!(step.started_at.is_some());
        assert!(step.completed_at.is_some());
    }

    #[tokio::test]
    async fn non_runnable_story_status_fails_fast() {
        let (store, registry, events, tools, story_id, step_id) = setup().await;
        store
            .with_story_mut(&story_id, |s| {
                s.status = aura_core::StoryStatus::Planned;
                Ok(())
            })
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlmClient::new(vec!["x"]));
        let runner = StepRunner::new(store, registry, events, tools, llm);

        let err = runner.run_step(&story_id, &step_id, None, CancellationToken::new()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn missing_agent_for_capability_fails_with_typed_error() {
        let (store, _registry, events, tools, story_id, _step_id) = setup().await;
        let empty_registry = Arc::new(AgentRegistry::new());
        let step = Step::new(story_id.clone(), 1, "Code it".into(), "coding".into(), None, "desc".into());
        let step_id = step.id.clone();
        store.insert_step(step).await.unwrap();

        let llm = Arc::new(ScriptedLlmClient::new(vec!["x"]));
        let runner = StepRunner::new(store, empty_registry, events, tools, llm);
        let err = runner
            .run_step(&story_id, &step_id, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuraError::NoAgentForCapability { .. }));
    }
}
