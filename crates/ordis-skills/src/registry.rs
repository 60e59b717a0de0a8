use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use ordis_tools::ToolRegistry;

use crate::loader::Skill;
use crate::skill_tool::SkillTool;

/// Owner of the loaded skill set.
///
/// Readers take shared `Arc<Skill>` references; writers build a new
/// immutable `Skill` value and swap it in, so in-flight tool calls keep the
/// snapshot they started with.
pub struct SkillRegistry {
    skills: RwLock<HashMap<String, Arc<Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, skill: Skill) -> Arc<Skill> {
        let arc = Arc::new(skill);
        self.skills
            .write()
            .expect("skill registry lock")
            .insert(arc.name().to_string(), Arc::clone(&arc));
        arc
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills
            .read()
            .expect("skill registry lock")
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills
            .write()
            .expect("skill registry lock")
            .remove(name)
    }

    pub fn list(&self) -> Vec<Arc<Skill>> {
        let mut skills: Vec<_> = self
            .skills
            .read()
            .expect("skill registry lock")
            .values()
            .cloned()
            .collect();
        skills.sort_by(|a, b| a.name().cmp(b.name()));
        skills
    }

    /// Names of skills currently enabled. Used by the gap detector to drop
    /// gaps an existing skill already covers.
    pub fn enabled_names(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|s| s.enabled())
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Flip a skill's enabled flag by swapping in a new snapshot.
    /// Returns false when the skill is unknown.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut skills = self.skills.write().expect("skill registry lock");
        match skills.get(name) {
            Some(current) => {
                let mut next = (**current).clone();
                next.manifest.enabled = enabled;
                skills.insert(name.to_string(), Arc::new(next));
                true
            }
            None => false,
        }
    }

    /// Register every tool of every enabled skill into the tool registry.
    /// Disabled (quarantined) skills are never registered, so the executor
    /// cannot select them.
    pub fn register_tools(&self, registry: &mut ToolRegistry) -> usize {
        let mut count = 0;
        for skill in self.list() {
            if !skill.enabled() {
                continue;
            }
            match SkillTool::for_skill(&skill) {
                Ok(tools) => {
                    for tool in tools {
                        info!(skill = %skill.name(), tool = %ordis_core::traits::Tool::name(&tool), "Registered skill tool");
                        registry.register(tool);
                        count += 1;
                    }
                }
                Err(e) => {
                    warn!(skill = %skill.name(), error = %e, "Failed to wrap skill tools");
                }
            }
        }
        count
    }

    /// Remove a skill's tools from the tool registry (quarantine path).
    pub fn unregister_tools(&self, name: &str, registry: &mut ToolRegistry) {
        if let Some(skill) = self.get(name) {
            for decl in &skill.manifest.tools {
                registry.unregister(&decl.name);
            }
        }
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}
