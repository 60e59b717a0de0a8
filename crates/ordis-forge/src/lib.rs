pub mod detector;
pub mod gate;
pub mod normalize;
pub mod planner;

use tracing::warn;

use ordis_core::types::ForgeEventKind;
use ordis_eventlog::{EventLog, EventLogEntry};
use ordis_skills::SkillRegistry;

pub use detector::{detect_gaps, failures_from_log, CapabilityGap, GapCategory, ToolFailure, UserRequest};
pub use gate::{structural_match, PromotionGate, PromotionOutcome, TestOutcome};
pub use normalize::{dice_bigrams, normalize_error, normalize_intent, STOP_WORDS};
pub use planner::{plan, Complexity, PlannedTool, SkillPlan, TestCase};

/// One forge scan pass: read recent failures from the event log, cluster
/// them (plus any collected requests) into gaps, drop gaps an enabled skill
/// already covers, and record a `gap_detected` event per survivor.
pub fn scan_for_gaps(
    log: &EventLog,
    registry: &SkillRegistry,
    window_days: i64,
    requests: &[UserRequest],
) -> Vec<CapabilityGap> {
    let failures = failures_from_log(log, window_days);
    let gaps = detect_gaps(&failures, requests, &registry.enabled_names());

    for gap in &gaps {
        let entry = EventLogEntry::forge(
            ForgeEventKind::GapDetected,
            gap.suggested_name.clone(),
            serde_json::json!({
                "category": gap.category.as_str(),
                "description": gap.description,
                "frequency": gap.frequency,
                "confidence": gap.confidence,
            }),
        );
        if let Err(e) = log.insert(entry) {
            warn!(error = %e, "Failed to record detected gap");
        }
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordis_eventlog::{EntryFilter, EventKind};

    #[test]
    fn scan_reads_failures_and_records_gaps() {
        let log = EventLog::in_memory().unwrap();
        let registry = SkillRegistry::new();

        for _ in 0..3 {
            log.insert(EventLogEntry::tool_execution(
                "csv_to_json",
                serde_json::json!({"path": "/tmp/in.csv"}),
                serde_json::Value::Null,
                Some("not supported".into()),
                5,
            ))
            .unwrap();
        }
        // Successes never feed gap detection.
        log.insert(EventLogEntry::tool_execution(
            "clock",
            serde_json::json!({}),
            serde_json::json!({"time": "12:00"}),
            None,
            1,
        ))
        .unwrap();

        let gaps = scan_for_gaps(&log, &registry, 7, &[]);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].frequency, 3);
        assert!(gaps[0].confidence >= 0.6 - 1e-9);
        assert_eq!(gaps[0].suggested_name, "csv_to_json");

        // The plan realized from the gap has tools and tests.
        let plan = plan(&gaps[0]);
        assert!(!plan.tools.is_empty());
        assert!(!plan.test_cases.is_empty());

        let recorded = log
            .get_entries(&EntryFilter::kind(EventKind::ForgeEvent))
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].tags.contains(&"gap_detected".to_string()));
    }
}
