pub mod loader;
pub mod manifest;
pub mod registry;
pub mod skill_tool;

pub use loader::{load_skill, load_skills, resolve_entry_point, Skill};
pub use manifest::{SkillManifest, SkillSource, ToolDecl};
pub use registry::SkillRegistry;
pub use skill_tool::SkillTool;
