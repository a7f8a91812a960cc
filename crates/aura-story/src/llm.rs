//! Thin seam between Story orchestration and the LLM provider (out of
//! scope per OVERVIEW: "the LLM provider abstraction (stream/chat/generate)").
//! `LlmClient` is the only contract the ReAct Executor and Step Runner
//! depend on; `RigLlmClient` is the one concrete adapter, built on `rig`
//! the same way the reference binaries build their per-tier agents.

use anyhow::Result;
use aura_core::LlmRetryPolicy;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use std::time::Instant;

/// Result of one LLM completion call.
pub struct Completion {
    pub text: String,
    /// `None` when the provider does not report usage (§4.2 numeric semantics).
    pub tokens_used: Option<u64>,
    pub duration_ms: u64,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<Completion>;
}

/// Adapts one `rig` completions client into an `LlmClient`, retrying
/// transient failures with jittered backoff per §7.
pub struct RigLlmClient {
    client: openai::CompletionsClient,
    retry: LlmRetryPolicy,
}

impl RigLlmClient {
    pub fn new(client: openai::CompletionsClient) -> Self {
        Self {
            client,
            retry: LlmRetryPolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for RigLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: &str,
        temperature: f32,
    ) -> Result<Completion> {
        let agent = self
            .client
            .agent(model)
            .preamble(system_prompt)
            .temperature(temperature as f64)
            .build();

        let start = Instant::now();
        let mut attempt = 0u32;
        loop {
            match agent.prompt(user_prompt).await {
                Ok(text) => {
                    return Ok(Completion {
                        text,
                        tokens_used: None,
                        duration_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(e) if attempt < self.retry.max_retries && LlmRetryPolicy::is_transient(&e.to_string()) => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "llm call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(anyhow::anyhow!("llm request failed: {e}")),
            }
        }
    }
}

/// Deterministic stand-in used by tests and by the ReAct Executor's own
/// test module: replays a fixed script of responses instead of calling a
/// real provider.
#[cfg(test)]
pub struct ScriptedLlmClient {
    pub responses: std::sync::Mutex<std::collections::VecDeque<String>>,
}

#[cfg(test)]
impl ScriptedLlmClient {
    pub fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _model: &str,
        _temperature: f32,
    ) -> Result<Completion> {
        let mut guard = self.responses.lock().unwrap();
        let text = guard.pop_front().unwrap_or_else(|| {
            r#"{"finalAnswer":"no more scripted responses"}"#.to_string()
        });
        Ok(Completion {
            text,
            tokens_used: Some(10),
            duration_ms: 1,
        })
    }
}
