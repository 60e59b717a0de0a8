use futures::future::BoxFuture;
use serde::Deserialize;

use ordis_core::error::{OrdisError, Result};
use ordis_core::traits::Tool;
use ordis_core::types::{ToolContext, ToolResult};

const MAX_READ_BYTES: u64 = 1_000_000;

pub struct FileReadTool;

#[derive(Deserialize)]
struct ReadInput {
    path: String,
}

impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its contents."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"}
            },
            "required": ["path"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: ReadInput = serde_json::from_value(input)
                .map_err(|e| OrdisError::InvalidArgs(e.to_string()))?;

            let meta = tokio::fs::metadata(&params.path).await;
            match meta {
                Ok(m) if m.len() > MAX_READ_BYTES => {
                    return Ok(ToolResult::error(format!(
                        "File too large ({} bytes, limit {})",
                        m.len(),
                        MAX_READ_BYTES
                    )))
                }
                Err(e) => return Ok(ToolResult::error(format!("{}: {}", params.path, e))),
                _ => {}
            }

            match tokio::fs::read_to_string(&params.path).await {
                Ok(content) => Ok(ToolResult::success(content)),
                Err(e) => Ok(ToolResult::error(format!("{}: {}", params.path, e))),
            }
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }
}

pub struct FileWriteTool;

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text to a file, creating parent directories as needed. Set append=true to append."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"},
                "append": {"type": "boolean", "default": false}
            },
            "required": ["path", "content"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: WriteInput = serde_json::from_value(input)
                .map_err(|e| OrdisError::InvalidArgs(e.to_string()))?;

            let path = std::path::Path::new(&params.path);
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Ok(ToolResult::error(format!("create {}: {}", parent.display(), e)));
                }
            }

            let outcome = if params.append {
                use tokio::io::AsyncWriteExt;
                match tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                {
                    Ok(mut f) => f.write_all(params.content.as_bytes()).await,
                    Err(e) => Err(e),
                }
            } else {
                tokio::fs::write(path, &params.content).await
            };

            match outcome {
                Ok(()) => Ok(ToolResult::success(format!(
                    "Wrote {} bytes to {}",
                    params.content.len(),
                    params.path
                ))),
                Err(e) => Ok(ToolResult::error(format!("{}: {}", params.path, e))),
            }
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }
}

pub struct DirListTool;

#[derive(Deserialize)]
struct ListInput {
    path: String,
}

impl Tool for DirListTool {
    fn name(&self) -> &str {
        "dir_list"
    }

    fn description(&self) -> &str {
        "List directory entries with type and size."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list"}
            },
            "required": ["path"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: ListInput = serde_json::from_value(input)
                .map_err(|e| OrdisError::InvalidArgs(e.to_string()))?;

            let mut read_dir = match tokio::fs::read_dir(&params.path).await {
                Ok(rd) => rd,
                Err(e) => return Ok(ToolResult::error(format!("{}: {}", params.path, e))),
            };

            let mut entries = Vec::new();
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let meta = entry.metadata().await.ok();
                entries.push(serde_json::json!({
                    "name": entry.file_name().to_string_lossy(),
                    "dir": meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                    "size": meta.as_ref().map(|m| m.len()).unwrap_or(0),
                }));
            }
            entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

            Ok(ToolResult::success(
                serde_json::json!({"entries": entries}).to_string(),
            ))
        })
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordis_core::types::SessionId;

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::new(), "default", "cli")
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");

        let write = FileWriteTool
            .execute(
                serde_json::json!({"path": path.to_str().unwrap(), "content": "remember the milk"}),
                ctx(),
            )
            .await
            .unwrap();
        assert!(!write.is_error);

        let read = FileReadTool
            .execute(serde_json::json!({"path": path.to_str().unwrap()}), ctx())
            .await
            .unwrap();
        assert_eq!(read.content, "remember the milk");
    }

    #[tokio::test]
    async fn missing_file_is_error_result_not_panic() {
        let read = FileReadTool
            .execute(serde_json::json!({"path": "/nonexistent/nowhere.txt"}), ctx())
            .await
            .unwrap();
        assert!(read.is_error);
    }

    #[tokio::test]
    async fn dir_list_returns_sorted_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let result = DirListTool
            .execute(serde_json::json!({"path": dir.path().to_str().unwrap()}), ctx())
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        let names: Vec<&str> = parsed["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }
}
