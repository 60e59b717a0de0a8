use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use ordis_core::error::{OrdisError, Result};
use ordis_core::event::EventBus;
use ordis_core::traits::Tool;
use ordis_core::types::{ForgeEventKind, RuntimeEvent, SessionId, ToolContext};
use ordis_eventlog::{EventLog, EventLogEntry};
use ordis_skills::{load_skill, Skill, SkillManifest, SkillRegistry, SkillSource, SkillTool};

use crate::planner::{SkillPlan, TestCase};

/// Result of one declared test run in the sandbox.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub tool: String,
    pub passed: bool,
    pub detail: String,
}

/// Outcome of a promotion attempt.
#[derive(Debug, Clone)]
pub struct PromotionOutcome {
    pub skill: String,
    pub promoted: bool,
    pub results: Vec<TestOutcome>,
}

/// Gate between a freshly built skill and the running executor.
///
/// A built skill is accepted iff every declared test passes in the sandbox;
/// otherwise it is quarantined: kept on disk for inspection, disabled, and
/// never selectable by the executor.
pub struct PromotionGate {
    registry: Arc<SkillRegistry>,
    event_log: Arc<EventLog>,
    bus: Arc<EventBus>,
    forged_dir: PathBuf,
    sandbox_timeout: Duration,
}

impl PromotionGate {
    pub fn new(
        registry: Arc<SkillRegistry>,
        event_log: Arc<EventLog>,
        bus: Arc<EventBus>,
        forged_dir: PathBuf,
        sandbox_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            event_log,
            bus,
            forged_dir,
            sandbox_timeout,
        }
    }

    /// Evaluate a skill built at `built_dir` against its plan's tests.
    pub async fn evaluate(&self, built_dir: &Path, plan: &SkillPlan) -> Result<PromotionOutcome> {
        // Load validates the manifest and every entry point's containment.
        // A build that fails here (e.g. an escaping entry point) yields no
        // loadable skill, so it is quarantined through a disabled, toolless
        // placeholder pointing at the rejected directory.
        let skill = match load_skill(built_dir, SkillSource::Forged) {
            Ok(skill) => skill,
            Err(e) => {
                warn!(skill = %plan.name, error = %e, "Built skill failed validation");
                let placeholder = Skill {
                    manifest: SkillManifest {
                        name: plan.name.clone(),
                        version: "0.0.0".to_string(),
                        description: "rejected build".to_string(),
                        enabled: false,
                        tools: Vec::new(),
                    },
                    source: SkillSource::Forged,
                    path: built_dir.to_path_buf(),
                };
                return Ok(self.quarantine(
                    placeholder,
                    vec![TestOutcome {
                        tool: plan.name.clone(),
                        passed: false,
                        detail: e.to_string(),
                    }],
                ));
            }
        };

        // An empty test set is a failure, not a pass.
        if plan.test_cases.is_empty() {
            let name = skill.name().to_string();
            return Ok(self.quarantine(
                skill,
                vec![TestOutcome {
                    tool: name,
                    passed: false,
                    detail: "no declared test cases".into(),
                }],
            ));
        }

        let skill = Arc::new(skill);
        let mut results = Vec::new();
        for test in &plan.test_cases {
            let outcome = self.run_test(&skill, test).await;
            let kind = if outcome.passed {
                ForgeEventKind::TestPassed
            } else {
                ForgeEventKind::TestFailed
            };
            self.record_forge(
                kind,
                skill.name(),
                serde_json::json!({
                    "tool": outcome.tool,
                    "detail": outcome.detail,
                }),
            );
            results.push(outcome);
        }

        if results.iter().all(|r| r.passed) {
            let promoted = self.promote(&skill).await?;
            Ok(PromotionOutcome {
                skill: promoted.name().to_string(),
                promoted: true,
                results,
            })
        } else {
            Ok(self.quarantine((*skill).clone(), results))
        }
    }

    /// Single quarantine path for every rejection: the skill (or its
    /// placeholder) is registered disabled so the executor can never select
    /// it, the directory stays on disk for manual inspection, and the
    /// rejection is announced.
    fn quarantine(&self, mut skill: Skill, results: Vec<TestOutcome>) -> PromotionOutcome {
        let name = skill.name().to_string();
        skill.manifest.enabled = false;
        self.registry.insert(skill);
        self.announce_quarantine(&name, results.clone());
        PromotionOutcome {
            skill: name,
            promoted: false,
            results,
        }
    }

    async fn run_test(&self, skill: &Arc<Skill>, test: &TestCase) -> TestOutcome {
        let tool = match skill
            .manifest
            .tools
            .iter()
            .find(|t| t.name == test.tool)
            .cloned()
        {
            Some(decl) => match SkillTool::new(Arc::clone(skill), decl) {
                Ok(tool) => tool,
                Err(e) => {
                    return TestOutcome {
                        tool: test.tool.clone(),
                        passed: false,
                        detail: e.to_string(),
                    }
                }
            },
            None => {
                return TestOutcome {
                    tool: test.tool.clone(),
                    passed: false,
                    detail: format!("skill declares no tool '{}'", test.tool),
                }
            }
        };

        let ctx = ToolContext::new(
            SessionId::from_string(format!("forge:{}", skill.name())),
            "forge",
            "forge",
        );
        let run = tokio::time::timeout(self.sandbox_timeout, tool.execute(test.input.clone(), ctx));

        match run.await {
            Err(_) => TestOutcome {
                tool: test.tool.clone(),
                passed: false,
                detail: format!("timed out after {}s", self.sandbox_timeout.as_secs()),
            },
            Ok(Err(e)) => TestOutcome {
                tool: test.tool.clone(),
                passed: false,
                detail: e.to_string(),
            },
            Ok(Ok(result)) if result.is_error => TestOutcome {
                tool: test.tool.clone(),
                passed: false,
                detail: result.content,
            },
            Ok(Ok(result)) => {
                let actual: Value = serde_json::from_str(&result.content)
                    .unwrap_or(Value::String(result.content.clone()));
                if structural_match(&test.expected, &actual) {
                    TestOutcome {
                        tool: test.tool.clone(),
                        passed: true,
                        detail: "ok".into(),
                    }
                } else {
                    TestOutcome {
                        tool: test.tool.clone(),
                        passed: false,
                        detail: format!(
                            "result shape mismatch: expected {}, got {}",
                            test.expected, actual
                        ),
                    }
                }
            }
        }
    }

    /// Move the accepted build under the forged search path, enable it, and
    /// register it.
    async fn promote(&self, skill: &Arc<Skill>) -> Result<Arc<Skill>> {
        std::fs::create_dir_all(&self.forged_dir)?;
        let target = self.forged_dir.join(skill.name());
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        std::fs::rename(&skill.path, &target).map_err(|e| {
            OrdisError::Skill(format!(
                "failed to move skill into {}: {}",
                target.display(),
                e
            ))
        })?;

        let mut promoted = load_skill(&target, SkillSource::Forged)?;
        promoted.manifest.enabled = true;
        let arc = self.registry.insert(promoted);

        info!(skill = %arc.name(), path = %target.display(), "Skill promoted");
        self.record_forge(
            ForgeEventKind::Promoted,
            arc.name(),
            serde_json::json!({"path": target.display().to_string()}),
        );
        self.bus.publish(RuntimeEvent::Forge {
            kind: ForgeEventKind::Promoted,
            detail: serde_json::json!({"skill": arc.name()}),
        });
        Ok(arc)
    }

    fn announce_quarantine(&self, skill: &str, results: Vec<TestOutcome>) {
        let failures: Vec<Value> = results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| serde_json::json!({"tool": r.tool, "detail": r.detail}))
            .collect();
        warn!(skill, failures = failures.len(), "Skill quarantined");
        self.record_forge(
            ForgeEventKind::Quarantined,
            skill,
            serde_json::json!({"failures": failures}),
        );
        self.bus.publish(RuntimeEvent::Forge {
            kind: ForgeEventKind::Quarantined,
            detail: serde_json::json!({"skill": skill}),
        });
    }

    fn record_forge(&self, kind: ForgeEventKind, capability: &str, detail: Value) {
        let entry = EventLogEntry::forge(kind, capability, detail);
        if let Err(e) = self.event_log.insert(entry) {
            warn!(error = %e, "Failed to record forge event");
        }
    }
}

/// Structural comparison: every expected leaf must exist at the same path in
/// the actual value with the same content; additional actual fields are
/// allowed.
pub fn structural_match(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Object(map) => actual
            .as_object()
            .map(|a| {
                map.iter()
                    .all(|(k, v)| a.get(k).map(|av| structural_match(v, av)).unwrap_or(false))
            })
            .unwrap_or(false),
        Value::Array(items) => actual
            .as_array()
            .map(|a| {
                items
                    .iter()
                    .enumerate()
                    .all(|(i, v)| a.get(i).map(|av| structural_match(v, av)).unwrap_or(false))
            })
            .unwrap_or(false),
        leaf => leaf == actual,
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::planner::{Complexity, PlannedTool, SkillPlan};
    use ordis_eventlog::{EntryFilter, EventKind};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn build_skill(dir: &Path, name: &str, script: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("skill.toml"),
            format!(
                r#"
name = "{name}"

[[tools]]
name = "{name}"
description = "Generated tool"
entry_point = "run.sh"
parameters_json = '{{"type":"object","properties":{{"input":{{"type":"string"}}}}}}'
"#
            ),
        )
        .unwrap();
        let path = dir.join("run.sh");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn plan_for(name: &str, tests: Vec<TestCase>) -> SkillPlan {
        SkillPlan {
            name: name.to_string(),
            tools: vec![PlannedTool {
                name: name.to_string(),
                description: "Generated tool".into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
            dependencies: vec![],
            test_cases: tests,
            estimated_complexity: Complexity::Low,
        }
    }

    struct Fixture {
        gate: PromotionGate,
        registry: Arc<SkillRegistry>,
        log: Arc<EventLog>,
        staging: PathBuf,
        forged: PathBuf,
        _tmp: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let forged = tmp.path().join("forged");
        let registry = Arc::new(SkillRegistry::new());
        let log = Arc::new(EventLog::in_memory().unwrap());
        let gate = PromotionGate::new(
            Arc::clone(&registry),
            Arc::clone(&log),
            Arc::new(EventBus::default()),
            forged.clone(),
            Duration::from_secs(15),
        );
        Fixture {
            gate,
            registry,
            log,
            staging,
            forged,
            _tmp: tmp,
        }
    }

    fn forge_events(log: &EventLog) -> Vec<String> {
        log.get_entries(&EntryFilter::kind(EventKind::ForgeEvent))
            .unwrap()
            .into_iter()
            .flat_map(|e| e.tags)
            .collect()
    }

    #[tokio::test]
    async fn passing_tests_promote_and_enable() {
        let f = fixture();
        let dir = f.staging.join("json_echo");
        build_skill(&dir, "json_echo", "#!/bin/sh\nprintf '{\"ok\": true, \"extra\": 1}'\n");

        let plan = plan_for(
            "json_echo",
            vec![TestCase {
                tool: "json_echo".into(),
                description: "happy path".into(),
                input: serde_json::json!({"input": "x"}),
                expected: serde_json::json!({"ok": true}),
            }],
        );

        let outcome = f.gate.evaluate(&dir, &plan).await.unwrap();
        assert!(outcome.promoted);

        // Moved under the forged search path and enabled.
        assert!(f.forged.join("json_echo").join("skill.toml").exists());
        assert!(!dir.exists());
        let skill = f.registry.get("json_echo").unwrap();
        assert!(skill.enabled());

        let events = forge_events(&f.log);
        assert!(events.iter().any(|t| t == "test_passed"));
        assert!(events.iter().any(|t| t == "promoted"));
    }

    #[tokio::test]
    async fn failing_tests_quarantine_and_disable() {
        let f = fixture();
        let dir = f.staging.join("broken");
        build_skill(&dir, "broken", "#!/bin/sh\necho nope >&2\nexit 1\n");

        let plan = plan_for(
            "broken",
            vec![TestCase {
                tool: "broken".into(),
                description: "happy path".into(),
                input: serde_json::json!({}),
                expected: serde_json::json!({"ok": true}),
            }],
        );

        let outcome = f.gate.evaluate(&dir, &plan).await.unwrap();
        assert!(!outcome.promoted);

        // Left in place for inspection, registered disabled.
        assert!(dir.exists());
        let skill = f.registry.get("broken").unwrap();
        assert!(!skill.enabled());

        let events = forge_events(&f.log);
        assert!(events.iter().any(|t| t == "test_failed"));
        assert!(events.iter().any(|t| t == "quarantined"));
        assert!(!events.iter().any(|t| t == "promoted"));
    }

    #[tokio::test]
    async fn empty_test_set_is_failure() {
        let f = fixture();
        let dir = f.staging.join("untested");
        build_skill(&dir, "untested", "#!/bin/sh\nprintf '{\"ok\": true}'\n");

        let outcome = f
            .gate
            .evaluate(&dir, &plan_for("untested", vec![]))
            .await
            .unwrap();
        assert!(!outcome.promoted);
        assert!(!f.registry.get("untested").unwrap().enabled());
        assert!(forge_events(&f.log).iter().any(|t| t == "quarantined"));
    }

    #[tokio::test]
    async fn shape_mismatch_fails_the_test() {
        let f = fixture();
        let dir = f.staging.join("wrong_shape");
        build_skill(&dir, "wrong_shape", "#!/bin/sh\nprintf '{\"status\": \"done\"}'\n");

        let plan = plan_for(
            "wrong_shape",
            vec![TestCase {
                tool: "wrong_shape".into(),
                description: "expects ok flag".into(),
                input: serde_json::json!({}),
                expected: serde_json::json!({"ok": true}),
            }],
        );
        let outcome = f.gate.evaluate(&dir, &plan).await.unwrap();
        assert!(!outcome.promoted);
        assert!(outcome.results[0].detail.contains("shape mismatch"));
    }

    #[tokio::test]
    async fn escaping_entry_point_is_quarantined() {
        let f = fixture();
        let dir = f.staging.join("escapee");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("skill.toml"),
            r#"
name = "escapee"

[[tools]]
name = "escapee"
description = "Tries to escape"
entry_point = "../outside.sh"
"#,
        )
        .unwrap();
        fs::write(f.staging.join("outside.sh"), "#!/bin/sh\n").unwrap();

        let outcome = f
            .gate
            .evaluate(&dir, &plan_for("escapee", vec![]))
            .await
            .unwrap();
        assert!(!outcome.promoted);
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].detail.contains("escapes skill directory"));

        // Registered like any other quarantined build: disabled, toolless,
        // never selectable.
        let skill = f.registry.get("escapee").unwrap();
        assert!(!skill.enabled());
        let mut tools = ordis_tools::ToolRegistry::new();
        assert_eq!(f.registry.register_tools(&mut tools), 0);
        assert!(forge_events(&f.log).iter().any(|t| t == "quarantined"));
    }

    #[test]
    fn structural_match_allows_extra_actual_fields() {
        let expected = serde_json::json!({"a": {"b": 1}});
        let actual = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        assert!(structural_match(&expected, &actual));

        let wrong = serde_json::json!({"a": {"b": 2}});
        assert!(!structural_match(&wrong, &actual));

        let missing = serde_json::json!({"a": {"z": 1}});
        assert!(!structural_match(&missing, &actual));
    }

    #[test]
    fn structural_match_arrays_by_index() {
        let expected = serde_json::json!([1, 2]);
        assert!(structural_match(&expected, &serde_json::json!([1, 2, 3])));
        assert!(!structural_match(&expected, &serde_json::json!([1])));
        assert!(!structural_match(&expected, &serde_json::json!([2, 1])));
    }
}
