use std::collections::HashMap;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use ordis_eventlog::{EntryFilter, EventKind, EventLog};

use crate::normalize::{dice_bigrams, normalize_error, normalize_intent};

/// A tool call that failed, drawn from the event log.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub tool: String,
    pub error: String,
}

/// A user request, with whether the runtime handled it and an optional
/// explicit missing-capability hint.
#[derive(Debug, Clone)]
pub struct UserRequest {
    pub text: String,
    pub handled: bool,
    pub missing_capability: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapCategory {
    File,
    Storage,
    Network,
    Automation,
    System,
    Data,
    Other,
}

impl GapCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Storage => "storage",
            Self::Network => "network",
            Self::Automation => "automation",
            Self::System => "system",
            Self::Data => "data",
            Self::Other => "other",
        }
    }
}

/// A clustered pattern of failures or unmet requests that justifies a new
/// skill.
#[derive(Debug, Clone)]
pub struct CapabilityGap {
    pub category: GapCategory,
    pub description: String,
    pub examples: Vec<String>,
    pub frequency: usize,
    pub confidence: f64,
    pub suggested_name: String,
}

const ERROR_BASE_CONFIDENCE: f64 = 0.3;
const HINT_BASE_CONFIDENCE: f64 = 0.6;
const CONFIDENCE_CAP: f64 = 0.95;
const SUPER_CLUSTER_DICE: f64 = 0.5;

fn score(base: f64, frequency: usize) -> f64 {
    (base + 0.1 * frequency as f64).min(CONFIDENCE_CAP)
}

/// Cluster failures and unmet requests into ranked capability gaps.
///
/// Gaps whose suggested name matches an enabled skill are filtered out;
/// the rest come back sorted by `confidence × frequency` descending.
pub fn detect_gaps(
    failures: &[ToolFailure],
    requests: &[UserRequest],
    enabled_skills: &[String],
) -> Vec<CapabilityGap> {
    let mut gaps = Vec::new();
    gaps.extend(cluster_failures(failures));
    gaps.extend(cluster_requests(requests));

    gaps.retain(|g| !enabled_skills.iter().any(|s| s == &g.suggested_name));
    gaps.sort_by(|a, b| {
        let ka = a.confidence * a.frequency as f64;
        let kb = b.confidence * b.frequency as f64;
        kb.partial_cmp(&ka)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.suggested_name.cmp(&b.suggested_name))
    });
    gaps
}

/// Failures cluster by `(tool, normalized_error)`.
fn cluster_failures(failures: &[ToolFailure]) -> Vec<CapabilityGap> {
    let mut clusters: HashMap<(String, String), Vec<&ToolFailure>> = HashMap::new();
    for failure in failures {
        let key = (failure.tool.clone(), normalize_error(&failure.error));
        clusters.entry(key).or_default().push(failure);
    }

    clusters
        .into_iter()
        .map(|((tool, normalized), members)| {
            let frequency = members.len();
            CapabilityGap {
                category: categorize(&format!("{} {}", tool, normalized)),
                description: format!("tool '{}' keeps failing: {}", tool, normalized),
                examples: members.iter().take(3).map(|f| f.error.clone()).collect(),
                frequency,
                confidence: score(ERROR_BASE_CONFIDENCE, frequency),
                suggested_name: sanitize_name(&tool),
            }
        })
        .collect()
}

/// Unhandled requests cluster by intent identity, then near-identical
/// intents (character-bigram Dice >= 0.5) merge into a super-cluster
/// labeled by its longest member. Explicit missing-capability hints score
/// from the higher base.
fn cluster_requests(requests: &[UserRequest]) -> Vec<CapabilityGap> {
    let mut intents: HashMap<String, Vec<&UserRequest>> = HashMap::new();
    for request in requests.iter().filter(|r| !r.handled) {
        let intent = match &request.missing_capability {
            Some(hint) => normalize_intent(hint),
            None => normalize_intent(&request.text),
        };
        if intent.is_empty() {
            continue;
        }
        intents.entry(intent).or_default().push(request);
    }

    // Merge identity clusters into super-clusters.
    let mut keys: Vec<String> = intents.keys().cloned().collect();
    keys.sort();
    let mut merged: Vec<(String, Vec<&UserRequest>)> = Vec::new();
    for key in keys {
        let members = intents.remove(&key).expect("key from map");
        match merged
            .iter_mut()
            .find(|(label, _)| dice_bigrams(label, &key) >= SUPER_CLUSTER_DICE)
        {
            Some((label, existing)) => {
                existing.extend(members);
                if key.len() > label.len() {
                    *label = key;
                }
            }
            None => merged.push((key, members)),
        }
    }

    merged
        .into_iter()
        .map(|(label, members)| {
            let frequency = members.len();
            let hinted = members.iter().any(|r| r.missing_capability.is_some());
            let base = if hinted {
                HINT_BASE_CONFIDENCE
            } else {
                ERROR_BASE_CONFIDENCE
            };
            CapabilityGap {
                category: categorize(&label),
                description: format!("repeated unmet request: {}", label),
                examples: members.iter().take(3).map(|r| r.text.clone()).collect(),
                frequency,
                confidence: score(base, frequency),
                suggested_name: suggested_from_intent(&label),
            }
        })
        .collect()
}

fn suggested_from_intent(intent: &str) -> String {
    let name: String = intent
        .split(' ')
        .take(3)
        .collect::<Vec<_>>()
        .join("_");
    sanitize_name(&name)
}

fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

const CATEGORY_KEYWORDS: &[(GapCategory, &[&str])] = &[
    (
        GapCategory::File,
        &["file", "folder", "directory", "path", "pdf", "document", "read", "write"],
    ),
    (
        GapCategory::Storage,
        &["database", "sql", "store", "save", "cache", "persist", "backup"],
    ),
    (
        GapCategory::Network,
        &["http", "url", "fetch", "download", "upload", "api", "web", "dns", "request"],
    ),
    (
        GapCategory::Automation,
        &["schedule", "cron", "remind", "recurring", "automate", "watch", "trigger"],
    ),
    (
        GapCategory::System,
        &["process", "cpu", "memory", "disk", "shell", "service", "install"],
    ),
    (
        GapCategory::Data,
        &["json", "csv", "xml", "yaml", "parse", "convert", "transform", "format"],
    ),
];

fn categorize(text: &str) -> GapCategory {
    let lower = text.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *category;
        }
    }
    GapCategory::Other
}

/// Pull failed tool executions from the event log for a scan window.
pub fn failures_from_log(log: &EventLog, window_days: i64) -> Vec<ToolFailure> {
    let filter = EntryFilter::kind(EventKind::ToolExecution)
        .with_success(false)
        .with_since(Utc::now() - Duration::days(window_days));
    match log.get_entries(&filter) {
        Ok(entries) => entries
            .into_iter()
            .filter_map(|e| {
                e.error.map(|error| ToolFailure {
                    tool: e.tool,
                    error,
                })
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "Failed to read failures from event log");
            Vec::new()
        }
    }
}
