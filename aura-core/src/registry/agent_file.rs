//! Parser for the agent definition file format (§6): a Markdown file with
//! frontmatter-style sections. One file = one agent; the file's basename
//! (without extension) defines the agent id.
//!
//! ```text
//! ---
//! name: Rust Coder
//! description: Writes idiomatic Rust
//! priority: 20
//! provider: openai
//! model: gpt-5-codex
//! temperature: 0.2
//! capabilities: [coding, fixing]
//! languages: [rust]
//! tags: [specialist]
//! tools: [fs_write, cargo_check]
//! ---
//! You are a meticulous Rust engineer. ...
//! ```
//!
//! The section between the `---` delimiters is YAML (the reference stack
//! already depends on `serde_yaml` for structured config elsewhere); the
//! remainder of the file, verbatim, becomes the agent's system prompt.
//! Unknown YAML keys are preserved as tags rather than rejected, so that
//! definition authors can annotate agents without a schema migration.

use crate::error::{AuraError, AuraResult};
use crate::model::{Agent, DEFAULT_PRIORITY};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    priority: Option<i32>,
    provider: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    tools: Option<Vec<String>>,
    #[serde(flatten)]
    extra: HashMap<String, serde_yaml::Value>,
}

/// Split `---\n<yaml>\n---\n<body>` into its two halves. Returns an error if
/// the file has no frontmatter block at all — a single bad definition file
/// must not evict the others (§4.1 failure semantics), so callers are
/// expected to log and skip on `Err`, not propagate.
fn split_frontmatter(content: &str) -> AuraResult<(&str, &str)> {
    let content = content.strip_prefix('\n').unwrap_or(content);
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| AuraError::missing_field("agent file missing frontmatter delimiter"))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest
        .find("\n---")
        .ok_or_else(|| AuraError::missing_field("agent file missing closing frontmatter delimiter"))?;
    let yaml = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n');
    Ok((yaml, body))
}

pub fn parse_agent_file(path: &Path) -> AuraResult<Agent> {
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AuraError::missing_field("agent file has no usable basename"))?
        .to_string();

    let content = std::fs::read_to_string(path)?;
    let (yaml, body) = split_frontmatter(&content)?;
    let fm: Frontmatter = serde_yaml::from_str(yaml)?;

    let mut tags = fm.tags;
    for (key, _) in &fm.extra {
        tags.push(key.clone());
    }

    Ok(Agent {
        id,
        display_name: fm.name.unwrap_or_else(|| "unnamed agent".to_string()),
        description: fm.description.unwrap_or_default(),
        capabilities: fm.capabilities.into_iter().collect::<BTreeSet<_>>(),
        priority: fm.priority.unwrap_or(DEFAULT_PRIORITY),
        languages: fm.languages.into_iter().collect::<BTreeSet<_>>(),
        provider: fm.provider.unwrap_or_else(|| "openai".to_string()),
        model: fm.model.unwrap_or_default(),
        temperature: fm.temperature.unwrap_or(0.2),
        tools: fm.tools,
        tags,
        system_prompt: body.to_string(),
    })
}

/// Scan a directory of `*.md` files into agents, logging (rather than
/// failing) on any single bad file per §4.1.
pub fn load_agent_dir(dir: &Path) -> AuraResult<Vec<Agent>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut agents = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        match parse_agent_file(&path) {
            Ok(agent) => agents.push(agent),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to load agent definition"),
        }
    }
    Ok(agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_a_well_formed_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rust-coder.md");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            "---\nname: Rust Coder\npriority: 20\ncapabilities: [coding]\nlanguages: [rust]\n---\nYou write Rust.\n"
        )
        .unwrap();

        let agent = parse_agent_file(&path).unwrap();
        assert_eq!(agent.id, "rust-coder");
        assert_eq!(agent.priority, 20);
        assert!(agent.capabilities.contains("coding"));
        assert!(agent.languages.contains("rust"));
        assert_eq!(agent.system_prompt.trim(), "You write Rust.");
    }

    #[test]
    fn missing_frontmatter_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.md");
        std::fs::write(&path, "just a body, no frontmatter").unwrap();
        assert!(parse_agent_file(&path).is_err());
    }

    #[test]
    fn default_priority_applies_when_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generalist.md");
        std::fs::write(&path, "---\nname: Generalist\ncapabilities: [chat]\n---\nHi.").unwrap();
        let agent = parse_agent_file(&path).unwrap();
        assert_eq!(agent.priority, DEFAULT_PRIORITY);
        assert!(agent.is_polyglot());
    }
}
