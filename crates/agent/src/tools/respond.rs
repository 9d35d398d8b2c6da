//! Direct reply to the user

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ToolResult, ToolTrait};

/// Returns its text unchanged; the planner's way to answer directly
pub struct RespondTool;

#[derive(Deserialize)]
struct RespondArgs {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ToolTrait for RespondTool {
    fn name(&self) -> &str {
        "respond_to_user"
    }
    fn description(&self) -> &str {
        "Reply to the user with the given text."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string", "description": "Reply text" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let args: RespondArgs = serde_json::from_value(args)?;
        Ok(Value::String(args.text))
    }
}
