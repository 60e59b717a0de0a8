use tracing::debug;

use ordis_core::config::AgentConfig;
use ordis_core::types::{Message, ToolDefinition};

use crate::compactor::{compact, extract_facts};

/// Conservative token estimator: ceil(chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Estimate for a whole message, with a small per-message overhead for the
/// role and framing.
pub fn estimate_message_tokens(msg: &Message) -> usize {
    let content = serde_json::to_string(&msg.content).unwrap_or_default();
    estimate_tokens(&content) + 4
}

fn estimate_total(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// The per-turn prompt: message list, the agent's tool view, and what the
/// assembly cost.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub estimated_tokens: usize,
    pub compacted: bool,
    /// Facts the compactor distilled while absorbing history, for the fact
    /// store to keep.
    pub new_facts: Vec<String>,
}

/// Build the message list fed to the model:
/// 1. the agent's system prompt (identity plus global instructions),
/// 2. known facts,
/// 3. the session's messages in order,
/// 4. the tool list filtered by the agent's allow-list.
///
/// When the estimate plus the reserve floor exceeds the context window, the
/// session history is compacted before assembly.
pub fn assemble(
    agent: &AgentConfig,
    facts: &[String],
    session_messages: &[Message],
    all_tools: &[ToolDefinition],
    reserve_floor: usize,
) -> AssembledContext {
    let tools: Vec<ToolDefinition> = all_tools
        .iter()
        .filter(|t| agent.allows_tool(&t.name))
        .cloned()
        .collect();

    let mut head = vec![Message::system(system_prompt(agent))];
    if !facts.is_empty() {
        let mut text = String::from("Known facts about the operator:\n");
        for fact in facts {
            text.push_str("- ");
            text.push_str(fact);
            text.push('\n');
        }
        head.push(Message::system(text));
    }

    let mut messages: Vec<Message> = head.iter().cloned().chain(session_messages.iter().cloned()).collect();
    let mut estimated = estimate_total(&messages);
    let mut compacted = false;
    let mut new_facts = Vec::new();

    if estimated + reserve_floor > agent.context_window {
        debug!(
            estimated,
            reserve_floor,
            context_window = agent.context_window,
            "Context over budget, compacting history"
        );
        let tail_start = session_messages.len().saturating_sub(2);
        new_facts = extract_facts(&session_messages[..tail_start]);

        let compacted_history = compact(session_messages);
        messages = head
            .into_iter()
            .chain(compacted_history.into_iter())
            .collect();
        estimated = estimate_total(&messages);
        compacted = true;
    }

    AssembledContext {
        messages,
        tools,
        estimated_tokens: estimated,
        compacted,
        new_facts,
    }
}

fn system_prompt(agent: &AgentConfig) -> String {
    let mut prompt = String::new();
    if agent.identity.is_empty() {
        prompt.push_str("You are a capable personal assistant.");
    } else {
        prompt.push_str(&agent.identity);
    }
    prompt.push_str(
        "\n\nAnswer directly and concisely. Use the available tools when a \
         request needs live data or side effects, and report tool failures \
         honestly instead of inventing results.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compactor::SUMMARY_MARKER;
    use ordis_core::types::Role;

    fn agent(context_window: usize) -> AgentConfig {
        let toml_str = format!(
            r#"
id = "default"
identity = "You are Ordis."
model = "ollama/llama3.2"
context_window = {}
max_tokens = 128
"#,
            context_window
        );
        toml::from_str(&toml_str).unwrap()
    }

    fn tools() -> Vec<ToolDefinition> {
        ["clock", "shell", "file_read"]
            .iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: format!("{} tool", name),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            })
            .collect()
    }

    #[test]
    fn estimator_is_ceil_chars_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // chars, not bytes
        assert_eq!(estimate_tokens("日本語?"), 1);
    }

    #[test]
    fn small_history_is_passed_through() {
        let session = vec![Message::user("hello")];
        let ctx = assemble(&agent(32_768), &[], &session, &tools(), 1024);

        assert!(!ctx.compacted);
        assert_eq!(ctx.messages[0].role, Role::System);
        assert_eq!(ctx.messages.last().unwrap().text(), "hello");
        assert_eq!(ctx.tools.len(), 3);
    }

    #[test]
    fn facts_follow_the_system_prompt() {
        let session = vec![Message::user("hi")];
        let facts = vec!["I prefer metric units".to_string()];
        let ctx = assemble(&agent(32_768), &facts, &session, &tools(), 1024);

        assert_eq!(ctx.messages[1].role, Role::System);
        assert!(ctx.messages[1].text().contains("metric units"));
    }

    #[test]
    fn allow_list_filters_tools() {
        let mut a = agent(32_768);
        a.tools = vec!["clock".into()];
        let ctx = assemble(&a, &[], &[Message::user("hi")], &tools(), 1024);
        assert_eq!(ctx.tools.len(), 1);
        assert_eq!(ctx.tools[0].name, "clock");
    }

    #[test]
    fn over_budget_history_is_compacted() {
        // 50 messages of ~400 chars each against a 4096-token window with a
        // 200-token reserve floor.
        let session: Vec<Message> = (0..50u8)
            .map(|i| {
                let tag = (b'a' + (i % 26)) as char;
                Message::user(format!("{} {}", "x".repeat(396), tag))
            })
            .collect();
        let last_two: Vec<String> = session[48..].iter().map(|m| m.text()).collect();

        let ctx = assemble(&agent(4096), &[], &session, &tools(), 200);

        assert!(ctx.compacted);
        // Leading synthetic summary right after the system prompt.
        let summary = &ctx.messages[1];
        assert_eq!(summary.role, Role::System);
        assert!(summary.text().starts_with(SUMMARY_MARKER));
        // The last two original messages survive verbatim.
        let n = ctx.messages.len();
        assert_eq!(ctx.messages[n - 2].text(), last_two[0]);
        assert_eq!(ctx.messages[n - 1].text(), last_two[1]);
        assert!(ctx.estimated_tokens < 4096);
    }
}
