//! File tools confined to the workspace root

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{BlockingTool, ToolResult};

/// Read a text file
pub struct FileReadTool {
    workspace: PathBuf,
}

impl FileReadTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
}

impl BlockingTool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }
    fn description(&self) -> &str {
        "Read a text file from the workspace."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string", "description": "File path" } },
            "required": ["path"]
        })
    }
    fn execute(&self, args: Value) -> ToolResult {
        let args: ReadArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace)?;

        debug!("◆ READING: {:?}", path);
        if !path.is_file() {
            return Err(format!("no file at {}", args.path).into());
        }
        Ok(Value::String(std::fs::read_to_string(&path)?))
    }
}

/// Append text to a file, creating it if needed
pub struct FileAppendTool {
    workspace: PathBuf,
}

impl FileAppendTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct AppendArgs {
    path: String,
    text: String,
}

impl BlockingTool for FileAppendTool {
    fn name(&self) -> &str {
        "file_append_text"
    }
    fn description(&self) -> &str {
        "Append text to a workspace file, creating it if missing."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "text": { "type": "string", "description": "Text to append" }
            },
            "required": ["path", "text"]
        })
    }
    fn execute(&self, args: Value) -> ToolResult {
        let args: AppendArgs = serde_json::from_value(args)?;
        let path = validate_workspace_path(&args.path, &self.workspace)?;

        debug!("◆ APPENDING: {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(args.text.as_bytes())?;
        Ok(Value::String(format!(
            "appended {} bytes to {}",
            args.text.len(),
            args.path
        )))
    }
}

/// Replace every occurrence of a substring in a file
pub struct FileReplaceTool {
    workspace: PathBuf,
}

impl FileReplaceTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ReplaceArgs {
    path: String,
    old: String,
    new: String,
}

impl BlockingTool for FileReplaceTool {
    fn name(&self) -> &str {
        "file_replace_text"
    }
    fn description(&self) -> &str {
        "Replace all occurrences of `old` with `new` in a workspace file."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path" },
                "old": { "type": "string", "description": "Text to find" },
                "new": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old", "new"]
        })
    }
    fn execute(&self, args: Value) -> ToolResult {
        let args: ReplaceArgs = serde_json::from_value(args)?;
        if args.old.is_empty() {
            return Err("search text must not be empty".into());
        }
        let path = validate_workspace_path(&args.path, &self.workspace)?;

        debug!("◆ REPLACING IN: {:?}", path);
        if !path.is_file() {
            return Err(format!("no file at {}", args.path).into());
        }
        let content = std::fs::read_to_string(&path)?;
        let count = content.matches(&args.old).count();
        if count == 0 {
            return Err(format!("text not found in {}", args.path).into());
        }
        std::fs::write(&path, content.replace(&args.old, &args.new))?;
        Ok(Value::String(format!(
            "replaced {} occurrence(s) in {}",
            count, args.path
        )))
    }
}
