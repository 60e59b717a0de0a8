use std::io::Write;

use ordis_core::config::AppConfig;

#[test]
fn load_full_config_from_file() {
    let toml_content = r#"
[[agents]]
id = "default"
identity = "You are Ordis, a personal assistant."
model = "anthropic/claude-sonnet-4"
fallbacks = ["openai/gpt-4o-mini", "ollama/llama3.2"]
context_window = 65536
max_tokens = 8192
temperature = 0.3

[[agents]]
id = "summarizer"
model = "ollama/llama3.2"
tools = ["file_read"]
subagent = true

[providers.anthropic]
kind = "anthropic"
api_key = "sk-test-key"

[providers.openai]
kind = "openai"
api_key = "sk-other-key"

[providers.ollama]
kind = "ollama"
base_url = "http://localhost:11434/api/chat"

[routes]
default_agent = "default"

[routes.bindings]
mail = "default"

[router]
queue_capacity = 16

[timeouts]
model_secs = 60
sandbox_secs = 15

[[scheduler.tasks]]
id = "morning_briefing"
schedule = "0 7 * * *"
payload = { prompt = "compose the morning briefing", channel = "mail" }

[[scheduler.tasks]]
id = "session_sweep"
interval_ms = 600000

[forge]
enabled = true
scan_interval_secs = 1800

[event_log]
path = "/tmp/ordis-test/events.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.agents.len(), 2);
    let default = config.agent("default").expect("default agent");
    assert_eq!(default.fallbacks.len(), 2);
    assert_eq!(default.context_window, 65536);
    assert!(default.max_tokens as usize <= default.context_window);

    let summarizer = config.agent("summarizer").expect("summarizer agent");
    assert!(summarizer.subagent);
    assert!(summarizer.allows_tool("file_read"));
    assert!(!summarizer.allows_tool("shell"));

    assert_eq!(config.providers.len(), 3);
    assert_eq!(config.routes.bindings.get("mail").unwrap(), "default");
    assert_eq!(config.router.queue_capacity, 16);
    assert_eq!(config.timeouts.model_secs, 60);

    let sched = config.scheduler.expect("scheduler section");
    assert_eq!(sched.tasks.len(), 2);
    assert_eq!(sched.tasks[0].payload["channel"], "mail");
    assert_eq!(sched.tasks[1].interval_ms, Some(600_000));

    assert!(config.forge.enabled);
    assert_eq!(config.forge.scan_interval_secs, 1800);
    assert!(config.event_log.path.is_some());
}

#[test]
fn env_var_expansion_in_config() {
    std::env::set_var("ORDIS_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[[agents]]
id = "default"
model = "openai/gpt-4o"

[providers.openai]
kind = "openai"
api_key = "${ORDIS_TEST_API_KEY}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(
        config.providers["openai"].api_key.as_deref(),
        Some("expanded-key-value")
    );

    std::env::remove_var("ORDIS_TEST_API_KEY");
}

#[test]
fn minimal_config_uses_defaults() {
    let toml_content = r#"
[[agents]]
id = "default"
model = "ollama/llama3.2"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.agents[0].context_window, 32_768);
    assert_eq!(config.agents[0].max_tokens, 4096);
    assert_eq!(config.router.queue_capacity, 64);
    assert_eq!(config.timeouts.model_secs, 120);
    assert_eq!(config.timeouts.tool_secs, 1800);
    assert_eq!(config.timeouts.sandbox_secs, 15);
    assert_eq!(config.timeouts.hook_secs, 5);
    assert_eq!(config.session.reserve_floor, 1024);
    assert!(config.scheduler.is_none());
    assert!(config.forge.enabled);
    assert!(config.event_log.path.is_none());
}

#[test]
fn oversized_max_tokens_is_rejected_at_load() {
    let toml_content = r#"
[[agents]]
id = "default"
model = "ollama/llama3.2"
context_window = 2048
max_tokens = 4096
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("max_tokens"));
}

#[test]
fn missing_config_file_is_a_clean_error() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/ordis.toml")).unwrap_err();
    assert!(err.to_string().contains("not found"));
}
