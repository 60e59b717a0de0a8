use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrdisError, Result};

/// Top-level Ordis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configured agents, keyed by `AgentConfig::id`.
    pub agents: Vec<AgentConfig>,
    /// Named provider endpoints referenced from agent model specs.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub routes: RoutesConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub forge: ForgeConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// One configured agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    /// Identity block placed at the head of the system prompt.
    #[serde(default)]
    pub identity: String,
    /// Primary model in `provider/model-name` form.
    pub model: String,
    /// Fallback models, tried in order after the primary.
    #[serde(default)]
    pub fallbacks: Vec<String>,
    /// Tool allow-list. Empty means "all tools".
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Subagents are spawned internally and never bound to a channel.
    #[serde(default)]
    pub subagent: bool,
}

fn default_context_window() -> usize {
    32_768
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.0
}

impl AgentConfig {
    /// Split a `provider/model-name` spec. The model part may itself contain
    /// slashes (e.g. `openrouter/meta-llama/llama-3-70b`).
    pub fn split_model_spec(spec: &str) -> Result<(&str, &str)> {
        match spec.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok((provider, model))
            }
            _ => Err(OrdisError::Config(format!(
                "model spec '{}' is not in provider/model-name form",
                spec
            ))),
        }
    }

    /// Primary plus fallbacks, in chain order.
    pub fn model_specs(&self) -> Vec<&str> {
        std::iter::once(self.model.as_str())
            .chain(self.fallbacks.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Whether a tool name passes this agent's allow-list.
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == name)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(OrdisError::Config("agent id must not be empty".into()));
        }
        if self.max_tokens as usize > self.context_window {
            return Err(OrdisError::Config(format!(
                "agent '{}': max_tokens ({}) exceeds context_window ({})",
                self.id, self.max_tokens, self.context_window
            )));
        }
        for spec in self.model_specs() {
            Self::split_model_spec(spec)?;
        }
        Ok(())
    }
}

/// A provider endpoint. `kind` selects the wire dialect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Dialect family: "openai", "anthropic", or "ollama".
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Extra headers merged into every request (presets, org ids).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

/// Channel → agent bindings, refreshed per message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesConfig {
    /// channel name → agent id
    #[serde(default)]
    pub bindings: HashMap<String, String>,
    /// Agent used when no binding matches.
    #[serde(default)]
    pub default_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Queue depth cap; the oldest message is dropped on overflow.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

/// Timeout defaults, all configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Model call / fallback-chain race.
    #[serde(default = "default_model_secs")]
    pub model_secs: u64,
    /// Foreground tool cap when the tool declares no timeout.
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
    /// Wait for a background tool to report it started.
    #[serde(default = "default_background_start_secs")]
    pub background_start_secs: u64,
    /// Hard cap for sandboxed (forged) tools.
    #[serde(default = "default_sandbox_secs")]
    pub sandbox_secs: u64,
    /// Per-hook cap.
    #[serde(default = "default_hook_secs")]
    pub hook_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            model_secs: default_model_secs(),
            tool_secs: default_tool_secs(),
            background_start_secs: default_background_start_secs(),
            sandbox_secs: default_sandbox_secs(),
            hook_secs: default_hook_secs(),
        }
    }
}

fn default_model_secs() -> u64 {
    120
}
fn default_tool_secs() -> u64 {
    1800
}
fn default_background_start_secs() -> u64 {
    10
}
fn default_sandbox_secs() -> u64 {
    15
}
fn default_hook_secs() -> u64 {
    5
}

/// Scheduler section: named recurring tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: String,
    /// Cron expression (5 or 6 fields). Mutually exclusive with interval_ms.
    #[serde(default)]
    pub schedule: Option<String>,
    /// Fixed interval in milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Payload handed to the task handler (e.g. a prompt and target channel).
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_true() -> bool {
    true
}

/// Skill search paths by trust level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_bundled_dir")]
    pub bundled_dir: String,
    #[serde(default = "default_curated_dir")]
    pub curated_dir: String,
    #[serde(default = "default_forged_dir")]
    pub forged_dir: String,
    /// Staging area for built-but-unpromoted skills.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            bundled_dir: default_bundled_dir(),
            curated_dir: default_curated_dir(),
            forged_dir: default_forged_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

fn default_bundled_dir() -> String {
    "~/.ordis/skills/bundled".to_string()
}
fn default_curated_dir() -> String {
    "~/.ordis/skills/curated".to_string()
}
fn default_forged_dir() -> String {
    "~/.ordis/skills/forged".to_string()
}
fn default_staging_dir() -> String {
    "~/.ordis/skills/staging".to_string()
}

/// Capability-gap detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How often the gap scan task runs.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// How far back the scan reads the event log.
    #[serde(default = "default_scan_window_days")]
    pub scan_window_days: i64,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: default_scan_interval_secs(),
            scan_window_days: default_scan_window_days(),
        }
    }
}

fn default_scan_interval_secs() -> u64 {
    3600
}
fn default_scan_window_days() -> i64 {
    7
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Database path; in-memory when unset (tests, ephemeral runs).
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are archived.
    #[serde(default = "default_idle_archive_secs")]
    pub idle_archive_secs: u64,
    /// Token head-room kept free when assembling context.
    #[serde(default = "default_reserve_floor")]
    pub reserve_floor: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_archive_secs: default_idle_archive_secs(),
            reserve_floor: default_reserve_floor(),
        }
    }
}

fn default_idle_archive_secs() -> u64 {
    86_400
}
fn default_reserve_floor() -> usize {
    1024
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion and validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| OrdisError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| OrdisError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(OrdisError::Config("at least one agent is required".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !seen.insert(agent.id.as_str()) {
                return Err(OrdisError::Config(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }
        for agent in &self.agents {
            for spec in agent.model_specs() {
                let (provider, _) = AgentConfig::split_model_spec(spec)?;
                if !self.providers.is_empty() && !self.providers.contains_key(provider) {
                    return Err(OrdisError::Config(format!(
                        "agent '{}' references unknown provider '{}'",
                        agent.id, provider
                    )));
                }
            }
        }
        if let Some(ref sched) = self.scheduler {
            for task in &sched.tasks {
                if task.schedule.is_none() && task.interval_ms.is_none() {
                    return Err(OrdisError::Config(format!(
                        "task '{}' needs a cron schedule or interval_ms",
                        task.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Resolve a path that may start with `~/`.
    pub fn resolve_path(raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(raw)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_env_vars_basic() {
        std::env::set_var("TEST_ORDIS_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_ORDIS_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_ORDIS_VAR");
    }

    #[test]
    fn expand_env_vars_missing_keeps_original() {
        let result = expand_env_vars("key = \"${NONEXISTENT_ORDIS_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_ORDIS_VAR}\"");
    }

    #[test]
    fn minimal_agent_gets_defaults() {
        let toml_str = r#"
[[agents]]
id = "default"
model = "anthropic/claude-sonnet-4"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        let agent = &config.agents[0];
        assert_eq!(agent.context_window, 32_768);
        assert_eq!(agent.max_tokens, 4096);
        assert!(agent.tools.is_empty());
        assert!(!agent.subagent);
        assert_eq!(config.router.queue_capacity, 64);
        assert_eq!(config.timeouts.model_secs, 120);
        assert_eq!(config.timeouts.sandbox_secs, 15);
        assert_eq!(config.timeouts.hook_secs, 5);
    }

    #[test]
    fn max_tokens_must_fit_context_window() {
        let toml_str = r#"
[[agents]]
id = "tight"
model = "openai/gpt-4o"
context_window = 1000
max_tokens = 2000
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn model_spec_requires_provider_prefix() {
        assert!(AgentConfig::split_model_spec("gpt-4o").is_err());
        assert!(AgentConfig::split_model_spec("/gpt-4o").is_err());
        let (provider, model) =
            AgentConfig::split_model_spec("openrouter/meta-llama/llama-3-70b").unwrap();
        assert_eq!(provider, "openrouter");
        assert_eq!(model, "meta-llama/llama-3-70b");
    }

    #[test]
    fn empty_tool_list_allows_all() {
        let toml_str = r#"
[[agents]]
id = "default"
model = "ollama/llama3.2"

[[agents]]
id = "restricted"
model = "ollama/llama3.2"
tools = ["clock"]
subagent = true
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert!(config.agents[0].allows_tool("anything"));
        assert!(config.agents[1].allows_tool("clock"));
        assert!(!config.agents[1].allows_tool("shell"));
    }

    #[test]
    fn unknown_provider_reference_rejected() {
        let toml_str = r#"
[[agents]]
id = "default"
model = "mystery/model-x"

[providers.openai]
kind = "openai"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn task_needs_schedule_or_interval() {
        let toml_str = r#"
[[agents]]
id = "default"
model = "ollama/llama3.2"

[[scheduler.tasks]]
id = "briefing"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_agent_ids_rejected() {
        let toml_str = r#"
[[agents]]
id = "a"
model = "ollama/llama3.2"

[[agents]]
id = "a"
model = "ollama/llama3.2"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
