//! Shell commands run inside the workspace

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{ToolResult, ToolTrait};

const MAX_OUTPUT: usize = 10000;

pub struct ShellExecTool {
    timeout_secs: u64,
    workspace: PathBuf,
}

impl ShellExecTool {
    pub fn new(timeout_secs: u64, workspace: PathBuf) -> Self {
        Self {
            timeout_secs: timeout_secs.max(1),
            workspace,
        }
    }
}

#[derive(Deserialize)]
struct ShellArgs {
    command: String,
    working_dir: Option<String>,
}

#[async_trait]
impl ToolTrait for ShellExecTool {
    fn name(&self) -> &str {
        "shell_exec"
    }
    fn description(&self) -> &str {
        "Run a shell command in the workspace and return its output."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line" },
                "working_dir": { "type": "string", "description": "Directory inside the workspace" }
            },
            "required": ["command"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: ShellArgs = serde_json::from_value(args)?;
        let working_dir = match args.working_dir {
            Some(dir) => validate_workspace_path(&dir, &self.workspace)?,
            None => self.workspace.clone(),
        };
        tokio::fs::create_dir_all(&working_dir).await?;

        debug!("◆ EXECUTING: {}", args.command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(format!("timed out after {} seconds", self.timeout_secs).into()),
        };

        let mut parts = Vec::new();
        if !output.stdout.is_empty() {
            parts.push(String::from_utf8_lossy(&output.stdout).to_string());
        }
        if !output.stderr.is_empty() {
            parts.push(format!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr)));
        }
        if output.status.code() != Some(0) {
            parts.push(format!("EXIT CODE: {}", output.status.code().unwrap_or(-1)));
        }
        let text = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };
        Ok(Value::String(truncate(text)))
    }
}

fn truncate(text: String) -> String {
    if text.len() <= MAX_OUTPUT {
        return text;
    }
    let mut cut = MAX_OUTPUT;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... output truncated, {} more bytes",
        &text[..cut],
        text.len() - cut
    )
}
