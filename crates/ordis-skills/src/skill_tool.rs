use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::Tool;
use ordis_core::types::{ToolContext, ToolResult};

use crate::loader::{resolve_entry_point, Skill};
use crate::manifest::ToolDecl;

/// Environment variables a sandboxed (forged) tool process may inherit.
/// Everything else is scrubbed before exec.
const SANDBOX_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "LANG", "LC_ALL", "TZ"];

/// A tool backed by a skill's declared entry point or command. The JSON
/// input arrives on the child's stdin; stdout is the result.
pub struct SkillTool {
    skill: Arc<Skill>,
    decl: ToolDecl,
    schema: serde_json::Value,
}

impl SkillTool {
    pub fn new(skill: Arc<Skill>, decl: ToolDecl) -> Result<Self> {
        let schema: serde_json::Value = serde_json::from_str(&decl.parameters_json)
            .map_err(|e| {
                OrdisError::Skill(format!(
                    "invalid parameters_json for tool '{}': {}",
                    decl.name, e
                ))
            })?;
        Ok(Self {
            skill,
            decl,
            schema,
        })
    }

    /// All tools of an enabled skill, wrapped for registration.
    pub fn for_skill(skill: &Arc<Skill>) -> Result<Vec<Self>> {
        skill
            .manifest
            .tools
            .iter()
            .map(|decl| Self::new(Arc::clone(skill), decl.clone()))
            .collect()
    }

    fn build_command(&self) -> Result<tokio::process::Command> {
        if let Some(ref entry) = self.decl.entry_point {
            let resolved: PathBuf = resolve_entry_point(&self.skill.path, entry)?;
            let mut cmd = tokio::process::Command::new(resolved);
            cmd.current_dir(&self.skill.path);
            return Ok(cmd);
        }

        let raw = self.decl.command.as_deref().ok_or_else(|| {
            OrdisError::Skill(format!("tool '{}' has no entry point or command", self.decl.name))
        })?;
        let command = raw.replace("$SKILL_DIR", &self.skill.path.display().to_string());
        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(command).current_dir(&self.skill.path);
        Ok(cmd)
    }
}

impl Tool for SkillTool {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn description(&self) -> &str {
        &self.decl.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        self.decl.timeout_secs
    }

    fn sandboxed(&self) -> bool {
        !self.skill.source.trusted()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let mut cmd = self.build_command()?;
            let input_bytes = serde_json::to_vec(&input)?;

            if self.sandboxed() {
                // Isolated context: scrub the environment down to the
                // allow-list. The wall-clock cap is enforced by the executor.
                cmd.env_clear();
                for key in SANDBOX_ENV_ALLOWLIST {
                    if let Ok(val) = std::env::var(key) {
                        cmd.env(key, val);
                    }
                }
            }

            debug!(
                skill = %self.skill.name(),
                tool = %self.decl.name,
                sandboxed = self.sandboxed(),
                "Executing skill tool"
            );

            let mut child = cmd
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| OrdisError::ToolExecution {
                    tool: self.decl.name.clone(),
                    message: e.to_string(),
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                stdin.write_all(&input_bytes).await.ok();
                // Drop stdin to close it so the child can read EOF
            }

            let output = child
                .wait_with_output()
                .await
                .map_err(|e| OrdisError::ToolExecution {
                    tool: self.decl.name.clone(),
                    message: e.to_string(),
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();

            if output.status.success() {
                Ok(ToolResult::success(if stdout.is_empty() {
                    "(no output)".to_string()
                } else {
                    stdout
                }))
            } else {
                let msg = if stderr.is_empty() { stdout } else { stderr };
                Ok(ToolResult::error(format!(
                    "Exit code {}\n{}",
                    output.status.code().unwrap_or(-1),
                    msg
                )))
            }
        })
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::loader::load_skill;
    use crate::manifest::SkillSource;
    use ordis_core::types::SessionId;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::new(), "default", "cli")
    }

    fn make_skill(manifest: &str, scripts: &[(&str, &str)], source: SkillSource) -> Arc<Skill> {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.keep().join("skill");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("skill.toml"), manifest).unwrap();
        for (name, body) in scripts {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        Arc::new(load_skill(&dir, source).unwrap())
    }

    #[tokio::test]
    async fn command_tool_echoes_stdin() {
        let skill = make_skill(
            r#"
name = "echo"

[[tools]]
name = "echo"
description = "Echo"
command = "cat"
"#,
            &[],
            SkillSource::Bundled,
        );
        let tool = SkillTool::for_skill(&skill).unwrap().remove(0);
        let input = serde_json::json!({"text": "hello"});
        let result = tool.execute(input.clone(), ctx()).await.unwrap();
        assert!(!result.is_error);
        let echoed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(echoed, input);
        assert!(!tool.sandboxed());
    }

    #[tokio::test]
    async fn entry_point_tool_runs_sandboxed() {
        let skill = make_skill(
            r#"
name = "env_probe"

[[tools]]
name = "env_probe"
description = "Print a scrubbed env var"
entry_point = "probe.sh"
"#,
            &[(
                "probe.sh",
                "#!/bin/sh\nprintf '%s' \"${ORDIS_SECRET_TEST:-scrubbed}\"\n",
            )],
            SkillSource::Forged,
        );
        std::env::set_var("ORDIS_SECRET_TEST", "leaky");

        let tool = SkillTool::for_skill(&skill).unwrap().remove(0);
        assert!(tool.sandboxed());
        let result = tool.execute(serde_json::json!({}), ctx()).await.unwrap();
        assert_eq!(result.content, "scrubbed");

        std::env::remove_var("ORDIS_SECRET_TEST");
    }

    #[tokio::test]
    async fn failing_tool_reports_exit_code() {
        let skill = make_skill(
            r#"
name = "fail"

[[tools]]
name = "fail"
description = "Always fails"
command = "exit 42"
"#,
            &[],
            SkillSource::Bundled,
        );
        let tool = SkillTool::for_skill(&skill).unwrap().remove(0);
        let result = tool.execute(serde_json::json!({}), ctx()).await.unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("Exit code 42"));
    }
}
