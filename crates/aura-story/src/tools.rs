//! Tool registry seam (out of scope per OVERVIEW: "the tool registry (git,
//! roslyn/tree-sitter, shell, file I/O)"). This module only owns the
//! contract the ReAct Executor dispatches through — `ToolRegistry` holds
//! whatever concrete tools a deployment wires in; none are bundled here
//! beyond the couple needed to exercise the executor end-to-end.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One invocable capability the ReAct Executor may dispatch an Action to.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema for `actionInput`, rendered into the tool catalog section
    /// of the ReAct prompt (§4.2 step 1).
    fn input_schema(&self) -> serde_json::Value;
    fn categories(&self) -> &[&str] {
        &[]
    }
    /// Tools flagged here are excluded from the filtered subset handed to
    /// an agent under Autonomous mode unless explicitly named in
    /// `Agent.tools` (§4.3 step 5).
    fn requires_confirmation(&self) -> bool {
        false
    }
    async fn call(&self, input: serde_json::Value) -> Result<String, String>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// Tools available to one dispatch: `agent_tools` if the agent names an
    /// explicit subset, else every registered tool minus confirmation-gated
    /// ones when `autonomous` (§4.3 step 5).
    pub fn filtered(&self, agent_tools: Option<&[String]>, autonomous: bool) -> Vec<Arc<dyn Tool>> {
        match agent_tools {
            Some(ids) => ids.iter().filter_map(|id| self.get(id)).collect(),
            None => self
                .tools
                .values()
                .filter(|t| !(autonomous && t.requires_confirmation()))
                .cloned()
                .collect(),
        }
    }
}

/// Reads a file relative to a Step's workspace path. Grounded as the
/// minimal file-I/O tool every agent definition can assume exists.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its contents"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn categories(&self) -> &[&str] {
        &["file-io"]
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, String> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing `path`".to_string())?;
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("read_file failed: {e}"))
    }
}

/// Writes a file relative to a Step's workspace path. Confirmation-gated:
/// excluded from the Autonomous default tool set unless an agent names it
/// explicitly (§4.3 step 5).
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn id(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write UTF-8 text to a file, creating parent directories as needed"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    fn categories(&self) -> &[&str] {
        &["file-io"]
    }

    fn requires_confirmation(&self) -> bool {
        true
    }

    async fn call(&self, input: serde_json::Value) -> Result<String, String> {
        let path = input
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing `path`".to_string())?;
        let content = input
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing `content`".to_string())?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("write_file failed to create parent dirs: {e}"))?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| format!("write_file failed: {e}"))?;
        Ok(format!("wrote {} bytes to {path}", content.len()))
    }
}
