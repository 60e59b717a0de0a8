use serde::Deserialize;

/// Trust level of a skill. Bundled and curated skills are trusted; forged
/// skills are generated and run sandboxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    Bundled,
    Curated,
    Forged,
}

impl SkillSource {
    pub fn trusted(&self) -> bool {
        !matches!(self, Self::Forged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::Curated => "curated",
            Self::Forged => "forged",
        }
    }
}

/// One tool declared by a skill manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDecl {
    /// Unique tool name (e.g. "csv_to_json").
    pub name: String,

    /// Human-readable description shown to the model.
    pub description: String,

    /// JSON string containing the input schema.
    #[serde(default = "default_schema")]
    pub parameters_json: String,

    /// Script inside the skill directory, executed with the JSON input on
    /// stdin. Required for forged skills; subject to path containment.
    #[serde(default)]
    pub entry_point: Option<String>,

    /// Shell command alternative for trusted skills. `$SKILL_DIR` is
    /// substituted with the skill's directory path at runtime.
    #[serde(default)]
    pub command: Option<String>,

    /// Per-tool timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_schema() -> String {
    r#"{"type":"object","properties":{}}"#.to_string()
}

/// TOML manifest for a drop-in skill.
///
/// Lives at `<skills-dir>/<name>/skill.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    /// Unique skill name.
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Whether the skill's tools are selectable. Quarantined skills carry
    /// `enabled = false` and are never registered.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Declared tools, in order.
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_enabled() -> bool {
    true
}
