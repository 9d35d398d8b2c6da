//! Prompt text for each pipeline stage

use cappuccino_bus::TaskResult;
use serde_json::{Map, Value};

use crate::tools::ToolSchema;

/// System prompt for every model request
pub const SYSTEM_PROMPT: &str = "You are Cappuccino, a helpful multitool assistant.";

/// Ask the model for a JSON plan over the available tools
pub fn planning_prompt(query: &str, tools: &[ToolSchema]) -> String {
    let mut prompt = String::from(
        "Break the user's request into steps. Reply with only a JSON array where \
         each element is {\"step\": <number>, \"action\": <tool name>, \"parameters\": {...}}.\n\
         Use a tool from the list below when one fits; otherwise describe the step \
         in plain words as the action. Use respond_to_user to answer directly.\n\n\
         Available tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    prompt.push_str(&format!("\nRequest: {}\n", query));
    prompt
}

/// Free-text step handed to the model when no tool matches
pub fn execution_prompt(action: &str, parameters: &Map<String, Value>) -> String {
    if parameters.is_empty() {
        action.to_string()
    } else {
        format!(
            "{}\n\nParameters: {}",
            action,
            Value::Object(parameters.clone())
        )
    }
}

/// Ask the model to combine step results into one answer
pub fn analysis_prompt(query: &str, results: &[TaskResult]) -> String {
    let mut prompt = format!(
        "The user asked: {}\n\nThese steps were carried out:\n",
        query
    );
    for result in results {
        let status = if result.is_error { "failed" } else { "ok" };
        prompt.push_str(&format!(
            "Step {} ({}, {}): {}\n",
            result.step,
            result.action,
            status,
            result.output_text()
        ));
    }
    prompt.push_str("\nWrite the final answer for the user based on these results.");
    prompt
}
