use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::debug;

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::Tool;
use ordis_core::types::{ToolContext, ToolResult};

const MAX_OUTPUT_BYTES: usize = 30_000;

pub struct ShellTool;

#[derive(Deserialize)]
struct ShellInput {
    command: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    120
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command. Returns stdout and stderr. Use for system commands, git operations, builds, etc."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120)",
                    "default": 120
                }
            },
            "required": ["command"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: ShellInput = serde_json::from_value(input)
                .map_err(|e| OrdisError::InvalidArgs(e.to_string()))?;

            debug!(command = %params.command, "Executing shell command");

            let mut child = tokio::process::Command::new("bash")
                .arg("-c")
                .arg(&params.command)
                .current_dir(&ctx.working_dir)
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| OrdisError::ToolExecution {
                    tool: "shell".to_string(),
                    message: e.to_string(),
                })?;

            // Drain pipes into shared buffers so partial output survives a
            // forceful kill on timeout.
            let stdout_buf = Arc::new(Mutex::new(Vec::new()));
            let stderr_buf = Arc::new(Mutex::new(Vec::new()));
            let stdout_task = child.stdout.take().map(|pipe| {
                let buf = Arc::clone(&stdout_buf);
                tokio::spawn(drain_pipe(pipe, buf))
            });
            let stderr_task = child.stderr.take().map(|pipe| {
                let buf = Arc::clone(&stderr_buf);
                tokio::spawn(drain_pipe(pipe, buf))
            });

            let timeout = std::time::Duration::from_secs(params.timeout);
            let status = tokio::time::timeout(timeout, child.wait()).await;

            let timed_out = status.is_err();
            if timed_out {
                child.start_kill().ok();
                child.wait().await.ok();
            }
            if let Some(t) = stdout_task {
                t.await.ok();
            }
            if let Some(t) = stderr_task {
                t.await.ok();
            }

            let stdout = String::from_utf8_lossy(&stdout_buf.lock().await).to_string();
            let stderr = String::from_utf8_lossy(&stderr_buf.lock().await).to_string();
            let content = combine_output(&stdout, &stderr);

            if timed_out {
                return Ok(ToolResult::error(format!(
                    "Command timed out after {}s (killed)\n{}",
                    params.timeout, content
                )));
            }

            match status {
                Ok(Ok(exit)) if exit.success() => Ok(ToolResult::success(content)),
                Ok(Ok(exit)) => Ok(ToolResult::error(format!(
                    "Exit code {}\n{}",
                    exit.code().unwrap_or(-1),
                    content
                ))),
                Ok(Err(e)) => Err(OrdisError::ToolExecution {
                    tool: "shell".to_string(),
                    message: e.to_string(),
                }),
                Err(_) => unreachable!("timeout handled above"),
            }
        })
    }
}

async fn drain_pipe(mut pipe: impl tokio::io::AsyncRead + Unpin, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 4096];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut guard = buf.lock().await;
                if guard.len() < MAX_OUTPUT_BYTES {
                    guard.extend_from_slice(&chunk[..n]);
                }
            }
        }
    }
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut content = String::new();
    if !stdout.is_empty() {
        content.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str("STDERR:\n");
        content.push_str(stderr);
    }
    if content.len() > MAX_OUTPUT_BYTES {
        content.truncate(MAX_OUTPUT_BYTES);
        content.push_str("\n... (output truncated)");
    }
    if content.is_empty() {
        content = "(no output)".to_string();
    }
    content
}
