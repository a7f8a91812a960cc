//! Agent Registry (C1) — holds agent metadata; routes (capability, language)
//! to an ordered agent list. Pure map: no state machine of its own (§4.1).

pub mod agent_file;

use crate::model::Agent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Diff produced by a [`AgentRegistry::reload`] call, used by the caller to
/// publish an `AgentsChanged` event (§4.1). The registry itself does not
/// know about the event bus — that would couple a pure map to transport.
#[derive(Debug, Clone, Default)]
pub struct ReloadDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl ReloadDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Copy-on-write map from agent id to an immutable snapshot. In-flight
/// executions hold an `Arc<Agent>` clone, so a `Reload` that updates or
/// removes an agent never perturbs work already dispatched against it
/// (§9 design note).
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    definition_dir: Option<PathBuf>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            definition_dir: None,
        }
    }

    pub fn with_definition_dir(dir: impl Into<PathBuf>) -> crate::error::AuraResult<Self> {
        let dir = dir.into();
        let agents = agent_file::load_agent_dir(&dir)?;
        let map = agents
            .into_iter()
            .map(|a| (a.id.clone(), Arc::new(a)))
            .collect();
        Ok(Self {
            agents: RwLock::new(map),
            definition_dir: Some(dir),
        })
    }

    pub fn register(&self, agent: Agent) {
        self.agents
            .write()
            .expect("agent registry lock poisoned")
            .insert(agent.id.clone(), Arc::new(agent));
    }

    /// Agents ordered by Priority ascending, stable tiebreak by id.
    pub fn list_all(&self) -> Vec<Arc<Agent>> {
        let guard = self.agents.read().expect("agent registry lock poisoned");
        let mut agents: Vec<Arc<Agent>> = guard.values().cloned().collect();
        agents.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        agents
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .expect("agent registry lock poisoned")
            .get(agent_id)
            .cloned()
    }

    /// Agents whose Capabilities contain `capability` AND (languageHint is
    /// null OR agent is polyglot OR agent's Languages contains
    /// languageHint), sorted by Priority ascending with a stable id tiebreak.
    pub fn get_by_capability(&self, capability: &str, language_hint: Option<&str>) -> Vec<Arc<Agent>> {
        if !crate::model::is_known_capability(capability) {
            tracing::warn!(capability, "routing on an unrecognized capability");
        }
        let mut matches: Vec<Arc<Agent>> = self
            .list_all()
            .into_iter()
            .filter(|a| a.matches_capability(capability, language_hint))
            .collect();
        matches.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        matches
    }

    pub fn get_best_for_capability(&self, capability: &str, language_hint: Option<&str>) -> Option<Arc<Agent>> {
        self.get_by_capability(capability, language_hint).into_iter().next()
    }

    /// Re-scan `definition_dir` (no-op if the registry wasn't constructed
    /// with one) and return a diff of what changed. A bad definition file
    /// is logged and skipped by `load_agent_dir`, never evicting the rest.
    pub fn reload(&self) -> crate::error::AuraResult<ReloadDiff> {
        let Some(dir) = &self.definition_dir else {
            return Ok(ReloadDiff::default());
        };
        let fresh = agent_file::load_agent_dir(dir)?;
        let fresh_map: HashMap<String, Agent> = fresh.into_iter().map(|a| (a.id.clone(), a)).collect();

        let mut guard = self.agents.write().expect("agent registry lock poisoned");
        let mut diff = ReloadDiff::default();

        for id in guard.keys() {
            if !fresh_map.contains_key(id) {
                diff.removed.push(id.clone());
            }
        }
        for (id, agent) in &fresh_map {
            match guard.get(id) {
                None => diff.added.push(id.clone()),
                Some(existing) if !same_definition(existing, agent) => diff.updated.push(id.clone()),
                Some(_) => {}
            }
        }

        for id in &diff.removed {
            guard.remove(id);
        }
        for (id, agent) in fresh_map {
            guard.insert(id, Arc::new(agent));
        }

        Ok(diff)
    }
}

fn same_definition(a: &Agent, b: &Agent) -> bool {
    a.priority == b.priority
        && a.capabilities == b.capabilities
        && a.languages == b.languages
        && a.system_prompt == b.system_prompt
        && a.model == b.model
        && a.provider == b.provider
        && a.temperature == b.temperature
        && a.tools == b.tools
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn agent(id: &str, priority: i32, languages: &[&str], capabilities: &[&str]) -> Agent {
        Agent {
            id: id.to_string(),
            display_name: id.to_string(),
            description: String::new(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            priority,
            languages: languages.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            provider: "test".into(),
            model: "test".into(),
            temperature: 0.0,
            tools: None,
            tags: Vec::new(),
            system_prompt: String::new(),
        }
    }

    #[test]
    fn tiebreak_prefers_language_specific_over_polyglot() {
        let reg = AgentRegistry::new();
        reg.register(agent("A", 30, &["csharp"], &["coding"]));
        reg.register(agent("B", 30, &[], &["coding"]));

        let best = reg.get_best_for_capability("coding", Some("csharp")).unwrap();
        assert_eq!(best.id, "A");

        let best = reg.get_best_for_capability("coding", Some("rust")).unwrap();
        assert_eq!(best.id, "B");
    }

    #[test]
    fn priority_orders_ascending() {
        let reg = AgentRegistry::new();
        reg.register(agent("slow", 90, &[], &["coding"]));
        reg.register(agent("fast", 10, &[], &["coding"]));
        let all = reg.list_all();
        assert_eq!(all[0].id, "fast");
        assert_eq!(all[1].id, "slow");
    }

    #[test]
    fn unknown_capability_yields_empty_not_error() {
        let reg = AgentRegistry::new();
        reg.register(agent("x", 50, &[], &["coding"]));
        assert!(reg.get_by_capability("underwater-basketweaving", None).is_empty());
    }

    #[test]
    fn reload_without_definition_dir_is_a_noop() {
        let reg = AgentRegistry::new();
        let diff = reg.reload().unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn reload_reports_added_removed_updated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.md"),
            "---\nname: A\npriority: 10\ncapabilities: [coding]\n---\nbody",
        )
        .unwrap();
        let reg = AgentRegistry::with_definition_dir(dir.path()).unwrap();
        assert_eq!(reg.list_all().len(), 1);

        std::fs::remove_file(dir.path().join("a.md")).unwrap();
        std::fs::write(
            dir.path().join("b.md"),
            "---\nname: B\npriority: 20\ncapabilities: [testing]\n---\nbody",
        )
        .unwrap();
        let diff = reg.reload().unwrap();
        assert_eq!(diff.added, vec!["b".to_string()]);
        assert_eq!(diff.removed, vec!["a".to_string()]);
    }
}
