//! End-to-end smoke test of the HTTP surface (§6): boots the real router
//! against an in-memory store and a scripted LLM, then drives Create →
//! Analyze → Plan → Decompose → Run over real HTTP.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aura_core::{Agent, AgentRegistry, AlwaysPassGate, EventBus};
use aura_story::http::{build_router, AppState};
use aura_story::llm::{Completion, LlmClient};
use aura_story::scheduler::WaveScheduler;
use aura_story::step_runner::StepRunner;
use aura_story::store::{InMemoryStoryStore, StoryStore};
use aura_story::story_service::StoryService;
use aura_story::tools::ToolRegistry;

/// Replays a fixed script of completions. The crate's own `ScriptedLlmClient`
/// is `#[cfg(test)]`-gated to the library's unit tests, so integration tests
/// carry a small mock of their own — the same way the reference binaries'
/// own integration tests define a local `MockBeads` rather than import one.
struct ScriptedLlm {
    responses: tokio::sync::Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedLlm {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str, _model: &str, _temperature: f32) -> Result<Completion> {
        let mut guard = self.responses.lock().await;
        let text = guard.pop_front().unwrap_or_else(|| r#"{"finalAnswer":"done"}"#.to_string());
        Ok(Completion {
            text,
            tokens_used: Some(1),
            duration_ms: 1,
        })
    }
}

fn coding_agent() -> Agent {
    Agent {
        id: "coder".into(),
        display_name: "Coder".into(),
        description: String::new(),
        capabilities: BTreeSet::from(["analysis".to_string(), "planning".to_string(), "coding".to_string(), "testing".to_string()]),
        priority: 10,
        languages: BTreeSet::new(),
        provider: "test".into(),
        model: "test-model".into(),
        temperature: 0.1,
        tools: Some(Vec::new()),
        tags: Vec::new(),
        system_prompt: "You build software.".into(),
    }
}

async fn spawn_server(responses: &[&str]) -> String {
    let store: Arc<dyn StoryStore> = Arc::new(InMemoryStoryStore::new());
    let registry = Arc::new(AgentRegistry::new());
    registry.register(coding_agent());
    let events = Arc::new(EventBus::new());
    let tools = Arc::new(ToolRegistry::new());
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlm::new(responses));
    let step_runner = Arc::new(StepRunner::new(store.clone(), registry.clone(), events.clone(), tools, llm.clone()));
    let gate = Arc::new(AlwaysPassGate);
    let scheduler = Arc::new(WaveScheduler::new(store.clone(), step_runner.clone(), events.clone(), gate));
    let service = Arc::new(StoryService::new(
        store,
        registry,
        events.clone(),
        scheduler,
        step_runner,
        llm,
        None,
        None,
        None,
    ));
    let app = build_router(AppState { service, events });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn create_analyze_plan_decompose_run_over_http() {
    let base = spawn_server(&[
        r#"analysis of the fibonacci request"#,
        r#"{"steps":[{"name":"Write fib","capability":"coding","description":"implement fib"},{"name":"Add tests","capability":"testing","description":"cover fib"}]}"#,
        r#"{"finalAnswer":"wrote the function"}"#,
        r#"{"finalAnswer":"wrote the tests"}"#,
    ])
    .await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = client
        .post(format!("{base}/api/developer/stories"))
        .json(&serde_json::json!({"title": "Add Fibonacci", "repositoryPath": "/repo"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let story_id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["status"], "created");

    let resp = client
        .post(format!("{base}/api/developer/stories/{story_id}/analyze"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .post(format!("{base}/api/developer/stories/{story_id}/plan"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .post(format!("{base}/api/developer/stories/{story_id}/decompose"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client
        .post(format!("{base}/api/developer/stories/{story_id}/run"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let detail: serde_json::Value = client
        .get(format!("{base}/api/developer/stories/{story_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["status"], "completed");
    let steps = detail["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s["status"] == "completed"));
}

#[tokio::test]
async fn create_rejects_blank_title_over_http() {
    let base = spawn_server(&[]).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/developer/stories"))
        .json(&serde_json::json!({"title": "   "}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "missing-field");
}

#[tokio::test]
async fn get_unknown_story_is_not_found_over_http() {
    let base = spawn_server(&[]).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/developer/stories/does-not-exist"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}
