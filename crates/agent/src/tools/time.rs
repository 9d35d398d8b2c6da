//! Wall-clock time

use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

use super::{ToolResult, ToolTrait};

pub struct CurrentTimeTool;

#[async_trait]
impl ToolTrait for CurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }
    fn description(&self) -> &str {
        "Current local date and time."
    }
    fn parameters(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: Value) -> ToolResult {
        Ok(Value::String(
            Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        ))
    }
}
