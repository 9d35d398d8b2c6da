//! Image generation stand-in
//!
//! Rendering is out of scope; the tool writes a placeholder file carrying the
//! prompt and reports its path, which the analyzer returns verbatim.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

use super::path_utils::validate_workspace_path;
use super::{BlockingTool, ToolResult};

const DEFAULT_FILENAME: &str = "generated.png";

pub struct GenerateImageTool {
    workspace: PathBuf,
}

impl GenerateImageTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[derive(Deserialize)]
struct ImageArgs {
    prompt: String,
    filename: Option<String>,
}

impl BlockingTool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }
    fn description(&self) -> &str {
        "Generate an image from a prompt and return the file path."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "What to draw" },
                "filename": { "type": "string", "description": "Output file name" }
            },
            "required": ["prompt"]
        })
    }
    fn produces_artifact(&self) -> bool {
        true
    }
    fn execute(&self, args: Value) -> ToolResult {
        let args: ImageArgs = serde_json::from_value(args)?;
        let filename = args
            .filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILENAME.to_string());
        let path = validate_workspace_path(&filename, &self.workspace)?;

        debug!("◆ RENDERING: {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("Prompt: {}", args.prompt))?;
        Ok(Value::String(path.display().to_string()))
    }
}
