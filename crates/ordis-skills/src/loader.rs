use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use ordis_core::error::{OrdisError, Result};

use crate::manifest::{SkillManifest, SkillSource};

/// A validated skill: manifest plus its on-disk location and trust level.
#[derive(Debug, Clone)]
pub struct Skill {
    pub manifest: SkillManifest,
    pub source: SkillSource,
    pub path: PathBuf,
}

impl Skill {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn enabled(&self) -> bool {
        self.manifest.enabled
    }
}

/// Resolve a tool's entry point and verify it stays inside the skill
/// directory. Both sides are canonicalized, so a symlink that escapes is
/// rejected.
pub fn resolve_entry_point(skill_dir: &Path, entry: &str) -> Result<PathBuf> {
    let skill_dir = skill_dir
        .canonicalize()
        .map_err(|e| OrdisError::Skill(format!("skill dir {}: {}", skill_dir.display(), e)))?;
    let candidate = skill_dir.join(entry);
    let resolved = candidate
        .canonicalize()
        .map_err(|e| OrdisError::Skill(format!("entry point {}: {}", candidate.display(), e)))?;

    if !resolved.starts_with(&skill_dir) {
        return Err(OrdisError::Skill(format!(
            "entry point {} escapes skill directory {}",
            resolved.display(),
            skill_dir.display()
        )));
    }
    Ok(resolved)
}

/// Load one skill directory: parse `skill.toml` and validate every declared
/// entry point.
pub fn load_skill(skill_dir: &Path, source: SkillSource) -> Result<Skill> {
    let manifest_path = skill_dir.join("skill.toml");
    let content = std::fs::read_to_string(&manifest_path)
        .map_err(|e| OrdisError::Skill(format!("{}: {}", manifest_path.display(), e)))?;
    let manifest: SkillManifest = toml::from_str(&content)
        .map_err(|e| OrdisError::Skill(format!("{}: {}", manifest_path.display(), e)))?;

    for tool in &manifest.tools {
        serde_json::from_str::<serde_json::Value>(&tool.parameters_json).map_err(|e| {
            OrdisError::Skill(format!(
                "skill '{}' tool '{}': invalid parameters_json: {}",
                manifest.name, tool.name, e
            ))
        })?;

        if let Some(ref entry) = tool.entry_point {
            resolve_entry_point(skill_dir, entry)?;
        } else if tool.command.is_none() {
            return Err(OrdisError::Skill(format!(
                "skill '{}' tool '{}': needs an entry_point or a command",
                manifest.name, tool.name
            )));
        }

        // Generated code never runs through an arbitrary shell command line.
        if source == SkillSource::Forged && tool.entry_point.is_none() {
            return Err(OrdisError::Skill(format!(
                "forged skill '{}' tool '{}': entry_point is required",
                manifest.name, tool.name
            )));
        }
    }

    Ok(Skill {
        manifest,
        source,
        path: skill_dir.to_path_buf(),
    })
}

/// Scan a directory of skills; invalid ones are skipped with a warning.
pub fn load_skills(dir: &Path, source: SkillSource) -> Vec<Skill> {
    let mut skills = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "Cannot read skills directory");
            return skills;
        }
    };

    for entry in entries.flatten() {
        let skill_dir = entry.path();
        if !skill_dir.is_dir() || !skill_dir.join("skill.toml").exists() {
            continue;
        }
        match load_skill(&skill_dir, source) {
            Ok(skill) => skills.push(skill),
            Err(e) => {
                warn!(path = %skill_dir.display(), error = %e, "Skipping invalid skill");
            }
        }
    }

    skills.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
    skills
}
