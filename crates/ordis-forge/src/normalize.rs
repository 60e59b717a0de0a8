use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

/// Function words plus domain fillers, frozen at process start so identical
/// inputs always cluster identically.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "am", "do", "does",
    "did", "have", "has", "had", "will", "would", "can", "could", "should", "shall", "may",
    "might", "must", "i", "me", "my", "you", "your", "he", "she", "it", "its", "we", "us",
    "our", "they", "them", "their", "this", "that", "these", "those", "to", "of", "in", "on",
    "at", "by", "for", "with", "from", "as", "into", "about", "up", "down", "out", "over",
    "and", "or", "but", "not", "no", "so", "if", "then", "than", "too", "very", "just",
    "how", "what", "when", "where", "who", "why", "which", "there", "here",
    // domain fillers
    "hello", "hi", "hey", "help", "thanks", "thank", "please",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"']+"#).expect("static regex"))
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:/[\w.\-]+){2,}/?|/[\w.\-]+\.\w+").expect("static regex"))
}

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("static regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").expect("static regex"))
}

/// Collapse volatile fragments (URLs, absolute paths, quoted literals,
/// numeric ids) to placeholder tokens so failures of the same shape
/// compare equal. Idempotent: placeholders contain nothing the patterns
/// match.
pub fn normalize_error(error: &str) -> String {
    let s = url_re().replace_all(error, "<url>");
    let s = path_re().replace_all(&s, "<path>");
    let s = quoted_re().replace_all(&s, "<str>");
    let s = number_re().replace_all(&s, "<num>");
    s.trim().to_string()
}

/// Normalize a user request into an "intent": lower-case, punctuation
/// stripped, stop words removed, truncated to the first six tokens.
pub fn normalize_intent(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty() && !stop_words().contains(w.as_str()))
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Character-bigram Dice coefficient over two strings.
pub fn dice_bigrams(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> HashSet<(char, char)> {
        let chars: Vec<char> = s.chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let ba = bigrams(a);
    let bb = bigrams(b);
    if ba.is_empty() && bb.is_empty() {
        return 1.0;
    }
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let shared = ba.intersection(&bb).count();
    2.0 * shared as f64 / (ba.len() + bb.len()) as f64
}
