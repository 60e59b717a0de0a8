use serde::{Deserialize, Serialize};

use crate::detector::{CapabilityGap, GapCategory};

/// One tool the planned skill will expose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A declared test the promotion gate will run in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub tool: String,
    pub description: String,
    pub input: serde_json::Value,
    /// Structural expectation: every leaf here must appear at the same path
    /// in the actual result.
    pub expected: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Build plan for a skill that would close a capability gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillPlan {
    pub name: String,
    pub tools: Vec<PlannedTool>,
    pub dependencies: Vec<String>,
    pub test_cases: Vec<TestCase>,
    pub estimated_complexity: Complexity,
}

/// Realize a gap into a plan: name from the suggestion, tool set and
/// dependencies from the category template, tests seeded from the cluster
/// examples with at least one happy-path test per tool.
pub fn plan(gap: &CapabilityGap) -> SkillPlan {
    let template = template_for(gap.category);

    let tools: Vec<PlannedTool> = template
        .tools
        .iter()
        .map(|(suffix, description, parameters)| PlannedTool {
            name: if suffix.is_empty() {
                gap.suggested_name.clone()
            } else {
                format!("{}_{}", gap.suggested_name, suffix)
            },
            description: format!("{} ({})", description, gap.description),
            parameters: parameters.clone(),
        })
        .collect();

    let mut test_cases = Vec::new();
    for tool in &tools {
        let seed = gap
            .examples
            .first()
            .cloned()
            .unwrap_or_else(|| gap.description.clone());
        test_cases.push(TestCase {
            tool: tool.name.clone(),
            description: format!("happy path for {}", tool.name),
            input: happy_path_input(&tool.parameters, &seed),
            expected: serde_json::json!({"ok": true}),
        });
    }

    SkillPlan {
        name: gap.suggested_name.clone(),
        tools,
        dependencies: template.dependencies.iter().map(|d| d.to_string()).collect(),
        test_cases,
        estimated_complexity: template.complexity,
    }
}

struct Template {
    tools: Vec<(&'static str, &'static str, serde_json::Value)>,
    dependencies: &'static [&'static str],
    complexity: Complexity,
}

fn string_param(name: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            name: {"type": "string", "description": description}
        },
        "required": [name]
    })
}

fn template_for(category: GapCategory) -> Template {
    match category {
        GapCategory::File => Template {
            tools: vec![(
                "",
                "Operate on a file and report the outcome",
                string_param("path", "File path to operate on"),
            )],
            dependencies: &["coreutils"],
            complexity: Complexity::Low,
        },
        GapCategory::Storage => Template {
            tools: vec![
                (
                    "put",
                    "Store a value under a key",
                    serde_json::json!({
                        "type": "object",
                        "properties": {
                            "key": {"type": "string"},
                            "value": {"type": "string"}
                        },
                        "required": ["key", "value"]
                    }),
                ),
                ("get", "Fetch a stored value", string_param("key", "Key to fetch")),
            ],
            dependencies: &["sqlite3"],
            complexity: Complexity::Medium,
        },
        GapCategory::Network => Template {
            tools: vec![(
                "",
                "Perform the network operation and return the response",
                string_param("url", "Target URL"),
            )],
            dependencies: &["curl"],
            complexity: Complexity::Medium,
        },
        GapCategory::Automation => Template {
            tools: vec![(
                "",
                "Run the automation step once",
                string_param("target", "What to act on"),
            )],
            dependencies: &[],
            complexity: Complexity::Medium,
        },
        GapCategory::System => Template {
            tools: vec![(
                "",
                "Inspect or adjust the system and report",
                string_param("target", "Process or resource name"),
            )],
            dependencies: &["procps"],
            complexity: Complexity::High,
        },
        GapCategory::Data => Template {
            tools: vec![(
                "",
                "Transform the input data and return the result",
                string_param("input", "Data or path to transform"),
            )],
            dependencies: &["jq"],
            complexity: Complexity::Low,
        },
        GapCategory::Other => Template {
            tools: vec![(
                "",
                "Perform the requested operation",
                string_param("input", "Operation input"),
            )],
            dependencies: &[],
            complexity: Complexity::Medium,
        },
    }
}

/// Fill the template's required string field with the example seed so the
/// happy-path test exercises realistic input.
fn happy_path_input(parameters: &serde_json::Value, seed: &str) -> serde_json::Value {
    let mut input = serde_json::Map::new();
    if let Some(required) = parameters.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            input.insert(
                field.to_string(),
                serde_json::Value::String(seed.chars().take(120).collect()),
            );
        }
    }
    serde_json::Value::Object(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(category: GapCategory) -> CapabilityGap {
        CapabilityGap {
            category,
            description: "tool 'csv_to_json' keeps failing: not supported".into(),
            examples: vec!["not supported".into()],
            frequency: 3,
            confidence: 0.5,
            suggested_name: "csv_to_json".into(),
        }
    }

    #[test]
    fn plan_has_tools_and_tests() {
        let plan = plan(&gap(GapCategory::Data));
        assert_eq!(plan.name, "csv_to_json");
        assert!(!plan.tools.is_empty());
        assert!(plan.test_cases.len() >= plan.tools.len());
        assert_eq!(plan.dependencies, vec!["jq"]);
    }

    #[test]
    fn every_tool_gets_a_happy_path_test() {
        let plan = plan(&gap(GapCategory::Storage));
        assert_eq!(plan.tools.len(), 2);
        for tool in &plan.tools {
            assert!(plan.test_cases.iter().any(|t| t.tool == tool.name));
        }
    }

    #[test]
    fn test_input_satisfies_required_fields() {
        let plan = plan(&gap(GapCategory::Network));
        let test = &plan.test_cases[0];
        let tool = &plan.tools[0];
        let required = tool.parameters["required"].as_array().unwrap();
        for field in required {
            assert!(test.input.get(field.as_str().unwrap()).is_some());
        }
    }
}
