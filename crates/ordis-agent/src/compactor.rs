use std::collections::HashSet;

use regex::Regex;
use std::sync::OnceLock;

use ordis_core::types::{ContentBlock, Message, MessageMetadata, Role};

/// Marker every compacted summary message starts with.
pub const SUMMARY_MARKER: &str = "CONVERSATION SUMMARY";

/// Compact a session's message list: everything but the most recent two
/// messages is absorbed into one synthetic `system` message that starts with
/// the summary marker and enumerates counts by role plus extracted facts.
///
/// Running the compactor on already-compact output returns it unchanged, so
/// `compact(compact(msgs)) == compact(msgs)`.
pub fn compact(messages: &[Message]) -> Vec<Message> {
    if messages.len() < 3 {
        return messages.to_vec();
    }
    let tail_start = messages.len().saturating_sub(2);
    let older = &messages[..tail_start];
    let tail = &messages[tail_start..];

    if older.is_empty() {
        return messages.to_vec();
    }

    // Idempotence: a lone leading summary means this input is already the
    // compactor's own output.
    if older.len() == 1
        && older[0].role == Role::System
        && older[0].text().starts_with(SUMMARY_MARKER)
    {
        return messages.to_vec();
    }

    let mut counts = [0usize; 4];
    let mut parent_id_chain = Vec::new();
    for msg in older {
        let idx = match msg.role {
            Role::System => 0,
            Role::User => 1,
            Role::Assistant => 2,
            Role::Tool => 3,
        };
        counts[idx] += 1;

        // Lineage: absorbed summaries contribute their own chain first.
        if let Some(ref meta) = msg.metadata {
            parent_id_chain.extend(meta.parent_id_chain.iter().cloned());
        }
        let sid = msg
            .session_id
            .as_ref()
            .map(|s| s.0.as_str())
            .unwrap_or("unknown");
        parent_id_chain.push(format!("{}:{}", sid, msg.timestamp.to_rfc3339()));
    }

    let facts = extract_facts(older);

    let mut content = format!(
        "{}\n{} earlier messages compacted (system: {}, user: {}, assistant: {}, tool: {}).",
        SUMMARY_MARKER,
        older.len(),
        counts[0],
        counts[1],
        counts[2],
        counts[3]
    );
    if !facts.is_empty() {
        content.push_str("\nFacts:");
        for fact in &facts {
            content.push_str("\n- ");
            content.push_str(fact);
        }
    }

    let summary = Message {
        role: Role::System,
        content: vec![ContentBlock::Text { text: content }],
        // Keep session timestamps non-decreasing: the summary stands in for
        // the newest message it absorbed.
        timestamp: older.last().expect("older is non-empty").timestamp,
        tool_call_id: None,
        session_id: older.last().and_then(|m| m.session_id.clone()),
        metadata: Some(MessageMetadata { parent_id_chain }),
    };

    let mut out = Vec::with_capacity(1 + tail.len());
    out.push(summary);
    out.extend(tail.iter().cloned());
    out
}

/// Deterministic, local fact extraction:
/// - sentences opening with a first-person preference marker;
/// - sentences pairing a numeric literal with a domain word ("port 8080");
/// - assistant sentences opening with an action-completion word.
///
/// Near-duplicates (word-set Jaccard >= 0.7) are dropped.
pub fn extract_facts(messages: &[Message]) -> Vec<String> {
    const PREFERENCE_MARKERS: &[&str] = &["i prefer", "i like", "i want", "i use"];
    const COMPLETION_WORDS: &[&str] = &["done", "created", "updated"];

    let mut facts: Vec<String> = Vec::new();
    for msg in messages {
        for sentence in split_sentences(&msg.text()) {
            let lower = sentence.to_lowercase();
            let preference = PREFERENCE_MARKERS.iter().any(|m| lower.starts_with(m));
            let completion = msg.role == Role::Assistant
                && COMPLETION_WORDS.iter().any(|w| lower.starts_with(w));
            let numeric = number_word_pair().is_match(&sentence);

            if preference || completion || numeric {
                let candidate = sentence.trim().to_string();
                let duplicate = facts.iter().any(|f| jaccard_words(f, &candidate) >= 0.7);
                if !duplicate {
                    facts.push(candidate);
                }
            }
        }
    }
    facts
}

fn number_word_pair() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z]{2,}\s+\d+|\d+\s+[A-Za-z]{2,})").expect("static regex")
    })
}

fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| c == '.' || c == '!' || c == '?' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Word-set Jaccard similarity, case-insensitive, punctuation ignored.
pub fn jaccard_words(a: &str, b: &str) -> f64 {
    let set = |s: &str| -> HashSet<String> {
        s.split_whitespace()
            .map(|w| {
                w.chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    };
    let sa = set(a);
    let sb = set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordis_core::types::SessionId;

    fn msgs(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let mut m = if i % 2 == 0 {
                    Message::user(format!("user message {}", i))
                } else {
                    Message::assistant_text(format!("assistant message {}", i))
                };
                m.session_id = Some(SessionId::from_string("cli:alice"));
                m
            })
            .collect()
    }

    #[test]
    fn keeps_last_two_verbatim() {
        let input = msgs(10);
        let out = compact(&input);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].role, Role::System);
        assert!(out[0].text().starts_with(SUMMARY_MARKER));
        assert_eq!(out[1], input[8]);
        assert_eq!(out[2], input[9]);
    }

    #[test]
    fn summary_counts_by_role() {
        let out = compact(&msgs(10));
        let text = out[0].text();
        assert!(text.contains("user: 4"));
        assert!(text.contains("assistant: 4"));
    }

    #[test]
    fn compaction_is_idempotent() {
        let once = compact(&msgs(12));
        let twice = compact(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn short_histories_are_untouched() {
        for n in 0..3 {
            let input = msgs(n);
            assert_eq!(compact(&input), input);
        }
    }

    #[test]
    fn parent_id_chain_covers_absorbed_messages() {
        let input = msgs(6);
        let out = compact(&input);
        let chain = &out[0].metadata.as_ref().unwrap().parent_id_chain;
        assert_eq!(chain.len(), 4);
        assert!(chain[0].starts_with("cli:alice:"));
    }

    #[test]
    fn lineage_survives_recompaction() {
        let mut history = compact(&msgs(6));
        // Two more exchanges arrive after the first compaction.
        history.extend(msgs(2));
        let out = compact(&history);
        let chain = &out[0].metadata.as_ref().unwrap().parent_id_chain;
        // 4 from the first summary, plus the summary itself, plus the two
        // previously-preserved messages.
        assert_eq!(chain.len(), 7);
    }

    #[test]
    fn extracts_preference_facts() {
        let messages = vec![Message::user("I prefer tabs over spaces. The sky is blue.")];
        let facts = extract_facts(&messages);
        assert_eq!(facts, vec!["I prefer tabs over spaces"]);
    }

    #[test]
    fn extracts_numeric_domain_facts() {
        let messages = vec![Message::user("Deploy listens on port 8080 now")];
        let facts = extract_facts(&messages);
        assert_eq!(facts.len(), 1);
        assert!(facts[0].contains("port 8080"));
    }

    #[test]
    fn action_completion_only_counts_for_assistant() {
        let assistant = vec![Message::assistant_text("Created the config file")];
        assert_eq!(extract_facts(&assistant).len(), 1);

        let user = vec![Message::user("Created the config file")];
        assert!(extract_facts(&user).is_empty());
    }

    #[test]
    fn near_duplicate_facts_are_dropped() {
        let messages = vec![
            Message::user("I prefer dark mode in every editor"),
            Message::user("I prefer dark mode in every editor, truly"),
        ];
        let facts = extract_facts(&messages);
        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn jaccard_bounds() {
        assert_eq!(jaccard_words("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_words("a b", "c d"), 0.0);
        let sim = jaccard_words("port 8080 open", "port 8080 closed");
        assert!(sim > 0.4 && sim < 0.7);
    }
}
