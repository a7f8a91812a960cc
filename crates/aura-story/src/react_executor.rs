//! ReAct Executor (C2): drives an LLM through a bounded Thought/Action/
//! Observation loop over a filtered subset of tools (§4.2).

use crate::llm::LlmClient;
use crate::tools::Tool;
use aura_core::{ReactDirective, ReactStep, ReactTrace};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-wall-clock and iteration bounds for one `Execute` call.
#[derive(Debug, Clone)]
pub struct ReactOptions {
    pub max_steps: u32,
    pub model: Option<String>,
    pub temperature: f32,
    pub working_directory: Option<String>,
    pub additional_context: Option<String>,
    /// Only honored by interactive callers; the HTTP API ignores it (§4.2).
    pub require_confirmation: bool,
}

impl Default for ReactOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            model: None,
            temperature: 0.2,
            working_directory: None,
            additional_context: None,
            require_confirmation: false,
        }
    }
}

const OBSERVATION_TRUNCATE_BYTES: usize = 2048;

pub struct ReactExecutor {
    llm: Arc<dyn LlmClient>,
    /// Per-tool invocation wall-clock bound (§5 default: 5 minutes).
    tool_timeout: Duration,
    /// Base used to derive the per-Execute budget: `MaxSteps * react_step_budget` (§5).
    react_step_budget: Duration,
}

impl ReactExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tool_timeout: Duration, react_step_budget: Duration) -> Self {
        Self {
            llm,
            tool_timeout,
            react_step_budget,
        }
    }

    /// Run one bounded Thought/Action/Observation loop. `system_prompt` is
    /// the agent's; `agent_model` is used unless `options.model` overrides
    /// it. Steps inside one call are strictly
    /// sequential (§4.2 Ordering) — callers run independent `Execute`
    /// calls concurrently, not steps within one.
    ///
    /// The whole call is bounded by `MaxSteps * react_step_budget`; on
    /// elapse the trace fails closed with "execute budget exceeded" rather
    /// than running unbounded.
    pub async fn execute(
        &self,
        task: &str,
        system_prompt: &str,
        tools: &[Arc<dyn Tool>],
        agent_model: &str,
        options: &ReactOptions,
        cancel: CancellationToken,
    ) -> ReactTrace {
        let budget = self.react_step_budget * options.max_steps.max(1);
        match tokio::time::timeout(budget, self.run_loop(task, system_prompt, tools, agent_model, options, cancel)).await {
            Ok(trace) => trace,
            Err(_) => {
                let mut trace = ReactTrace::empty();
                trace.success = false;
                trace.error = Some(format!("react execute budget of {budget:?} exceeded"));
                trace.total_duration_ms = budget.as_millis() as u64;
                trace
            }
        }
    }

    async fn run_loop(
        &self,
        task: &str,
        system_prompt: &str,
        tools: &[Arc<dyn Tool>],
        agent_model: &str,
        options: &ReactOptions,
        cancel: CancellationToken,
    ) -> ReactTrace {
        let model = options.model.as_deref().unwrap_or(agent_model);
        let temperature = options.temperature;

        let started = Instant::now();
        let mut trace = ReactTrace::empty();
        let catalog = render_tool_catalog(tools);

        for step_number in 1..=options.max_steps {
            if cancel.is_cancelled() {
                trace.success = false;
                trace.error = Some("cancelled".to_string());
                trace.total_duration_ms = started.elapsed().as_millis() as u64;
                return trace;
            }

            let prompt = render_prompt(task, &catalog, &trace, options.additional_context.as_deref());

            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace.success = false;
                    trace.error = Some("cancelled".to_string());
                    trace.total_duration_ms = started.elapsed().as_millis() as u64;
                    return trace;
                }
                result = self.llm.complete(system_prompt, &prompt, model, temperature) => result,
            };

            let step_started = Instant::now();
            let completion = match completion {
                Ok(c) => c,
                Err(e) => {
                    trace.success = false;
                    trace.error = Some(format!("llm request failed: {e}"));
                    trace.total_duration_ms = started.elapsed().as_millis() as u64;
                    return trace;
                }
            };
            if let Some(tokens) = completion.tokens_used {
                trace.total_tokens = Some(trace.total_tokens.unwrap_or(0) + tokens);
            }

            let directive = parse_directive(&completion.text);
            match directive {
                Some(ReactDirective::Final { final_answer }) => {
                    trace.steps.push(ReactStep {
                        step_number,
                        thought: "final answer reached".to_string(),
                        action: None,
                        action_input: None,
                        observation: final_answer.clone(),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    });
                    trace.success = true;
                    trace.final_answer = Some(final_answer);
                    trace.total_duration_ms = started.elapsed().as_millis() as u64;
                    return trace;
                }
                Some(ReactDirective::Act { thought, action, action_input }) => {
                    let observation = self
                        .dispatch_action(&action, action_input.clone(), tools, &cancel)
                        .await;
                    trace.steps.push(ReactStep {
                        step_number,
                        thought,
                        action: Some(action),
                        action_input: Some(action_input),
                        observation: truncate(&observation, OBSERVATION_TRUNCATE_BYTES),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    });
                }
                None => {
                    // Fail-closed on unparseable output (§9 design note):
                    // one wasted step with a diagnostic observation.
                    trace.steps.push(ReactStep {
                        step_number,
                        thought: "unparseable model response".to_string(),
                        action: None,
                        action_input: None,
                        observation: format!("could not parse response as thought/action or final answer: {}", truncate(&completion.text, 256)),
                        duration_ms: step_started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        trace.success = false;
        trace.error = Some("max iterations exceeded".to_string());
        trace.total_duration_ms = started.elapsed().as_millis() as u64;
        trace
    }

    async fn dispatch_action(
        &self,
        action: &str,
        input: serde_json::Value,
        tools: &[Arc<dyn Tool>],
        cancel: &CancellationToken,
    ) -> String {
        let Some(tool) = tools.iter().find(|t| t.id() == action) else {
            return "tool not found".to_string();
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => "cancelled".to_string(),
            result = tokio::time::timeout(self.tool_timeout, tool.call(input)) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => format!("tool error: {e}"),
                Err(_) => format!("tool timed out after {:?}", self.tool_timeout),
            },
        }
    }
}

fn render_tool_catalog(tools: &[Arc<dyn Tool>]) -> String {
    if tools.is_empty() {
        return "(no tools available)".to_string();
    }
    tools
        .iter()
        .map(|t| {
            format!(
                "- {} ({}): {} | input schema: {}",
                t.id(),
                t.categories().join(","),
                t.description(),
                t.input_schema()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_prompt(task: &str, catalog: &str, trace: &ReactTrace, additional_context: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("Task:\n");
    out.push_str(task);
    out.push_str("\n\nAvailable tools:\n");
    out.push_str(catalog);
    if let Some(ctx) = additional_context {
        out.push_str("\n\nAdditional context:\n");
        out.push_str(ctx);
    }
    if !trace.steps.is_empty() {
        out.push_str("\n\nPrior steps:\n");
        for step in &trace.steps {
            out.push_str(&format!(
                "{}. thought: {} | action: {:?} | observation: {}\n",
                step.step_number, step.thought, step.action, step.observation
            ));
        }
    }
    out.push_str(
        "\n\nRespond with exactly one JSON object: either \
         {\"thought\":\"...\",\"action\":\"<toolId>\",\"actionInput\":{...}} \
         or {\"finalAnswer\":\"...\"}.",
    );
    out
}

fn parse_directive(text: &str) -> Option<ReactDirective> {
    let trimmed = text.trim();
    let json_slice = extract_json_object(trimmed).unwrap_or(trimmed);
    serde_json::from_str::<ReactDirective>(json_slice).ok()
}

/// The model may wrap its JSON in prose or a code fence; pull out the
/// first balanced `{...}` block rather than requiring an exact match.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… (truncated)", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{ReadFileTool, Tool};

    #[tokio::test]
    async fn final_answer_short_circuits_the_loop() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![r#"{"finalAnswer":"done"}"#]));
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_secs(90));
        let trace = executor
            .execute(
                "do the thing",
                "system",
                &[],
                "test-model",
                &ReactOptions::default(),
                CancellationToken::new(),
            )
            .await;
        assert!(trace.success);
        assert_eq!(trace.final_answer.as_deref(), Some("done"));
        assert_eq!(trace.steps.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_id_is_a_soft_failure_not_abort() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"thought":"try it","action":"nonexistent_tool","actionInput":{}}"#,
            r#"{"finalAnswer":"gave up"}"#,
        ]));
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_secs(90));
        let trace = executor
            .execute(
                "do the thing",
                "system",
                &[],
                "test-model",
                &ReactOptions::default(),
                CancellationToken::new(),
            )
            .await;
        assert!(trace.success);
        assert_eq!(trace.steps[0].observation, "tool not found");
    }

    #[tokio::test]
    async fn max_steps_exceeded_yields_bounded_failure() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"thought":"t1","action":"nonexistent_tool","actionInput":{}}"#,
            r#"{"thought":"t2","action":"nonexistent_tool","actionInput":{}}"#,
            r#"{"thought":"t3","action":"nonexistent_tool","actionInput":{}}"#,
        ]));
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_secs(90));
        let options = ReactOptions {
            max_steps: 3,
            ..Default::default()
        };
        let trace = executor
            .execute("never finishes", "system", &[], "test-model", &options, CancellationToken::new())
            .await;
        assert!(!trace.success);
        assert_eq!(trace.error.as_deref(), Some("max iterations exceeded"));
        assert_eq!(trace.steps.len(), 3);
    }

    #[tokio::test]
    async fn tool_dispatch_invokes_the_matching_tool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "contents").unwrap();

        let llm = Arc::new(ScriptedLlmClient::new(vec![
            format!(
                r#"{{"thought":"read it","action":"read_file","actionInput":{{"path":"{}"}}}}"#,
                path.to_str().unwrap()
            ),
            r#"{"finalAnswer":"read successfully"}"#.to_string(),
        ]));
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_secs(90));
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ReadFileTool)];
        let trace = executor
            .execute("read a file", "system", &tools, "test-model", &ReactOptions::default(), CancellationToken::new())
            .await;
        assert!(trace.success);
        assert_eq!(trace.steps[0].observation, "contents");
    }

    struct SlowLlm {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _system_prompt: &str, _user_prompt: &str, _model: &str, _temperature: f32) -> anyhow::Result<crate::llm::Completion> {
            tokio::time::sleep(self.delay).await;
            Ok(crate::llm::Completion {
                text: r#"{"finalAnswer":"too slow to matter"}"#.to_string(),
                tokens_used: None,
                duration_ms: self.delay.as_millis() as u64,
            })
        }
    }

    struct SlowTool {
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl Tool for SlowTool {
        fn id(&self) -> &str {
            "slow_tool"
        }
        fn description(&self) -> &str {
            "sleeps before returning"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        async fn call(&self, _input: serde_json::Value) -> Result<String, String> {
            tokio::time::sleep(self.delay).await;
            Ok("too slow to matter".to_string())
        }
    }

    #[tokio::test]
    async fn tool_call_elapsing_its_timeout_is_a_soft_failure() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            r#"{"thought":"try it","action":"slow_tool","actionInput":{}}"#,
            r#"{"finalAnswer":"recovered"}"#,
        ]));
        let executor = ReactExecutor::new(llm, Duration::from_millis(5), Duration::from_secs(90));
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(SlowTool {
            delay: Duration::from_millis(50),
        })];
        let trace = executor
            .execute("do the thing", "system", &tools, "test-model", &ReactOptions::default(), CancellationToken::new())
            .await;
        assert!(trace.success);
        assert!(trace.steps[0].observation.contains("timed out"));
    }

    #[tokio::test]
    async fn execute_budget_elapsing_fails_closed() {
        let llm = Arc::new(SlowLlm {
            delay: Duration::from_millis(50),
        });
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_millis(5));
        let options = ReactOptions {
            max_steps: 1,
            ..Default::default()
        };
        let trace = executor
            .execute("do the thing", "system", &[], "test-model", &options, CancellationToken::new())
            .await;
        assert!(!trace.success);
        assert!(trace.error.as_deref().unwrap_or_default().contains("budget"));
    }

    #[tokio::test]
    async fn unparseable_response_counts_as_one_wasted_step() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            "not json at all".to_string(),
            r#"{"finalAnswer":"recovered"}"#.to_string(),
        ]));
        let executor = ReactExecutor::new(llm, Duration::from_secs(300), Duration::from_secs(90));
        let trace = executor
            .execute("task", "system", &[], "test-model", &ReactOptions::default(), CancellationToken::new())
            .await;
        assert!(trace.success);
        assert_eq!(trace.steps.len(), 2);
        assert!(trace.steps[0].action.is_none());
    }
}
