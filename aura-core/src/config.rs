//! Host-wide tunables named throughout §4-§5, each overridable by an
//! `AURA_*` environment variable, following the `env`-driven override
//! pattern the reference stack uses for its own `SWARM_*` variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default `Story.max_parallelism` for newly created Stories (§3).
    pub default_max_parallelism: u32,
    /// Host-wide concurrency cap across all Stories (§5: "number of CPUs x 2").
    pub host_concurrency_cap: u32,
    /// Per-tool invocation timeout (§5 default: 5 minutes).
    pub tool_timeout: Duration,
    /// Base used to derive the per-ReAct-Execute wall-clock budget:
    /// `MaxSteps * react_step_budget` (§5 default: 90s/step).
    pub react_step_budget: Duration,
    /// Directory scanned for agent definition files (§6).
    pub agent_definition_dir: PathBuf,
    /// LLM transient-retry count and base backoff (§7).
    pub llm_retry_count: u32,
    pub llm_retry_base_delay: Duration,
    /// SSE broadcast channel capacity per Story (§4.6/§9).
    pub sse_channel_capacity: usize,
    /// HTTP bind address for the service's front door (§6, ambient).
    pub bind_addr: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4) as u32;
        Self {
            default_max_parallelism: env_parsed("AURA_DEFAULT_MAX_PARALLELISM", 4),
            host_concurrency_cap: env_parsed("AURA_HOST_CONCURRENCY_CAP", cpus * 2),
            tool_timeout: Duration::from_secs(env_parsed("AURA_TOOL_TIMEOUT_SECS", 300)),
            react_step_budget: Duration::from_secs(env_parsed("AURA_REACT_STEP_BUDGET_SECS", 90)),
            agent_definition_dir: env_parsed::<String>(
                "AURA_AGENT_DEFINITION_DIR",
                "./agents".to_string(),
            )
            .into(),
            llm_retry_count: env_parsed("AURA_LLM_RETRY_COUNT", 2),
            llm_retry_base_delay: Duration::from_secs(env_parsed("AURA_LLM_RETRY_BASE_DELAY_SECS", 2)),
            sse_channel_capacity: env_parsed("AURA_SSE_CHANNEL_CAPACITY", 256),
            bind_addr: env_parsed("AURA_BIND_ADDR", "127.0.0.1:4173".to_string()),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Wall-clock budget for one ReAct Execute call, derived from
    /// `MaxSteps x 90s` per §5.
    pub fn react_execute_budget(&self, max_steps: u32) -> Duration {
        self.react_step_budget * max_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        std::env::remove_var("AURA_DEFAULT_MAX_PARALLELISM");
        let cfg = Config::default();
        assert_eq!(cfg.default_max_parallelism, 4);
        assert_eq!(cfg.tool_timeout, Duration::from_secs(300));
    }

    #[test]
    fn react_budget_scales_with_max_steps() {
        let cfg = Config::default();
        assert_eq!(cfg.react_execute_budget(10), Duration::from_secs(900));
    }
}
