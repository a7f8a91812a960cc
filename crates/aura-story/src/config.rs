//! Runtime configuration for the `aura-story` service binary.
//!
//! The LLM provider abstraction is explicitly out of scope for Story
//! orchestration (OVERVIEW, "external collaborators"); this module only
//! owns the thin adapter needed to turn an `Agent`'s `provider`/`model`
//! fields into a concrete `rig` client. Per-agent routing, capability
//! matching, and priority live in the Agent Registry, not here.

use anyhow::{Context, Result};
use rig::providers::openai;
use std::time::Duration;

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Connection details for a single OpenAI-compatible completions endpoint.
/// One `LlmEndpoint` per distinct `provider` value an `Agent` may carry;
/// `default` is used when an agent names a provider with no matching
/// `AURA_LLM_<PROVIDER>_URL` override.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: String,
}

impl LlmEndpoint {
    fn from_env(prefix: &str, default_url: &str) -> Self {
        Self {
            url: std::env::var(format!("AURA_LLM_{prefix}_URL"))
                .unwrap_or_else(|_| default_url.to_string()),
            api_key: std::env::var(format!("AURA_LLM_{prefix}_API_KEY"))
                .unwrap_or_else(|_| "not-needed".into()),
        }
    }

    pub fn build_client(&self) -> Result<openai::CompletionsClient> {
        openai::CompletionsClient::builder()
            .api_key(&self.api_key)
            .base_url(&self.url)
            .build()
            .with_context(|| format!("failed to build completions client for {}", self.url))
    }
}

/// Service-level configuration: which LLM endpoint an agent's `provider`
/// field resolves to, plus the tunables the Story runtime adds on top of
/// the ones `aura_core::Config` already owns (host-wide timeouts, agent
/// definition directory, retry budgets).
#[derive(Debug, Clone)]
pub struct Config {
    pub core: aura_core::Config,
    /// Default endpoint used when an `Agent::provider` has no dedicated
    /// `AURA_LLM_<PROVIDER>_URL` override (default: `local`).
    pub default_provider: String,
    pub default_endpoint: LlmEndpoint,
    /// HTTP server shutdown grace period.
    pub shutdown_grace: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            core: aura_core::Config::from_env(),
            default_provider: std::env::var("AURA_DEFAULT_PROVIDER")
                .unwrap_or_else(|_| "local".into()),
            default_endpoint: LlmEndpoint::from_env("DEFAULT", "http://localhost:8080/v1"),
            shutdown_grace: Duration::from_secs(env_parsed("AURA_SHUTDOWN_GRACE_SECS", 10)),
        }
    }

    /// Configuration pointing the default endpoint at a local proxy, for
    /// integration tests that spin up a stub completions server.
    pub fn test_config() -> Self {
        Self {
            core: aura_core::Config::default(),
            default_provider: "local".into(),
            default_endpoint: LlmEndpoint {
                url: "http://localhost:8317/v1".into(),
                api_key: "test-key".into(),
            },
            shutdown_grace: Duration::from_secs(1),
        }
    }

    /// Resolve the endpoint an `Agent::provider` should dispatch through.
    /// Providers other than the configured default currently all resolve
    /// to the same endpoint set; a per-provider endpoint table is the
    /// natural extension point once a second provider is onboarded.
    pub fn endpoint_for(&self, provider: &str) -> &LlmEndpoint {
        let _ = provider;
        &self.default_endpoint
    }
}

/// Check if an inference endpoint is reachable, used at startup to log a
/// warning (not a hard failure — the first dispatched Step will surface a
/// concrete `LlmTransient` error if the endpoint truly is down).
pub async fn check_endpoint(url: &str, api_key: Option<&str>) -> bool {
    let models_url = format!("{url}/models");
    let client = reqwest::Client::new();
    let mut req = client
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5));

    if let Some(key) = api_key {
        if key != "not-needed" {
            req = req.bearer_auth(key);
        }
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            tracing::warn!(endpoint = url, status = %resp.status(), "endpoint returned non-success status");
            false
        }
        Err(e) => {
            tracing::warn!(endpoint = url, error = %e, "endpoint unreachable");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_shutdown_grace() {
        std::env::remove_var("AURA_SHUTDOWN_GRACE_SECS");
        let config = Config::from_env();
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_config_points_at_local_proxy() {
        let config = Config::test_config();
        assert!(config.default_endpoint.url.contains("localhost:8317"));
    }

    #[test]
    fn endpoint_for_unknown_provider_falls_back_to_default() {
        let config = Config::test_config();
        let ep = config.endpoint_for("anthropic");
        assert_eq!(ep.url, config.default_endpoint.url);
    }
}
