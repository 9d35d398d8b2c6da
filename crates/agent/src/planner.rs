//! Planner: query in, tasks out
//!
//! The model is asked for a JSON array of steps. Its reply is searched for
//! the first balanced `[...]` region, trailing commas are repaired, and each
//! element becomes a [`Task`]. Anything unusable collapses to a single
//! `respond_to_user` task so a run always has at least one step.

use cappuccino_bus::{StageSender, Task};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::llm::LlmClient;
use crate::prompt;
use crate::tools::ToolSchema;
use crate::{AgentError, Result};

/// Tool used for direct answers and fallback plans
pub const RESPOND_ACTION: &str = "respond_to_user";

const ACTION_KEYS: [&str; 3] = ["action", "tool_name", "tool"];
const PARAMETER_KEYS: [&str; 3] = ["parameters", "params", "args"];

pub struct Planner {
    llm: LlmClient,
}

impl Planner {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Plan `query`, send every task followed by the sentinel, return the plan
    pub async fn plan(&self, query: &str, tools: &[ToolSchema], tx: StageSender<Task>) -> Vec<Task> {
        let tasks = self.build_plan(query, tools).await;
        dispatch(&tasks, tx).await;
        tasks
    }

    /// Produce the plan without sending it anywhere
    pub async fn build_plan(&self, query: &str, tools: &[ToolSchema]) -> Vec<Task> {
        if !self.llm.is_available() {
            info!("◆ PLANNER: NO MODEL, SPLITTING QUERY");
            return heuristic_plan(query);
        }

        let text = match self.llm.complete(&prompt::planning_prompt(query, tools)).await {
            Ok(text) => text,
            Err(e) => {
                warn!("◆ PLANNER: {}, SPLITTING QUERY", e);
                return heuristic_plan(query);
            }
        };

        match parse_plan(&text) {
            Ok(tasks) if !tasks.is_empty() => {
                info!("◆ PLANNER: {} TASKS", tasks.len());
                tasks
            }
            Ok(_) => {
                warn!("◆ PLANNER: EMPTY PLAN, FALLING BACK");
                vec![fallback_task(&text, query)]
            }
            Err(e) => {
                warn!("◆ PLANNER: {}, FALLING BACK", e);
                vec![fallback_task(&text, query)]
            }
        }
    }
}

/// Send `tasks` then the sentinel; stops early if the consumer is gone
pub async fn dispatch(tasks: &[Task], tx: StageSender<Task>) -> usize {
    let mut sent = 0;
    for task in tasks {
        if tx.send(task.clone()).await.is_err() {
            warn!("◆ PLANNER: EXECUTOR GONE AFTER {} TASKS", sent);
            break;
        }
        sent += 1;
    }
    tx.finish().await;
    sent
}

/// The single task used when no plan can be read
pub fn fallback_task(text: &str, query: &str) -> Task {
    let text = if text.trim().is_empty() { query } else { text };
    Task::new(1, RESPOND_ACTION).with_param("text", text.trim())
}

/// One free-text task per sentence of the query
pub fn heuristic_plan(query: &str) -> Vec<Task> {
    let tasks: Vec<Task> = query
        .split(['.', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, sentence)| Task::new(i as u32 + 1, sentence))
        .collect();

    if tasks.is_empty() {
        vec![fallback_task("", query)]
    } else {
        tasks
    }
}

/// Parse a model reply into tasks.
///
/// Elements without an action are skipped. Tasks are returned in array
/// order. When any step number is missing, invalid or not increasing the
/// whole plan is renumbered by position.
pub fn parse_plan(text: &str) -> Result<Vec<Task>> {
    let region = extract_bracketed(text)
        .ok_or_else(|| AgentError::PlanParse("no balanced [...] region".into()))?;
    let repaired = repair_trailing_commas(region);
    let value: Value =
        serde_json::from_str(&repaired).map_err(|e| AgentError::PlanParse(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(AgentError::PlanParse("plan is not an array".into()));
    };

    let mut tasks = Vec::with_capacity(items.len());
    let mut steps = Vec::with_capacity(items.len());
    for item in &items {
        let Some(obj) = item.as_object() else {
            debug!("◆ PLANNER: SKIPPING NON-OBJECT ELEMENT");
            continue;
        };
        let Some(action) = read_action(obj) else {
            debug!("◆ PLANNER: SKIPPING ELEMENT WITHOUT ACTION");
            continue;
        };
        steps.push(read_step(obj));
        tasks.push(Task {
            step: 0,
            action,
            parameters: read_parameters(obj),
        });
    }

    // Tasks keep array order; declared steps survive only when they already
    // increase along it.
    let increasing = steps
        .iter()
        .try_fold(0u32, |prev, step| step.filter(|s| *s > prev))
        .is_some();

    for (i, (task, step)) in tasks.iter_mut().zip(&steps).enumerate() {
        task.step = if increasing {
            step.unwrap_or_default()
        } else {
            i as u32 + 1
        };
    }
    Ok(tasks)
}

fn read_action(obj: &Map<String, Value>) -> Option<String> {
    ACTION_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn read_parameters(obj: &Map<String, Value>) -> Map<String, Value> {
    PARAMETER_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_object))
        .cloned()
        .unwrap_or_default()
}

fn read_step(obj: &Map<String, Value>) -> Option<u32> {
    let step = match obj.get("step")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(step).ok().filter(|s| *s > 0)
}

/// First balanced `[...]` region, ignoring brackets inside string literals
pub fn extract_bracketed(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop commas that directly precede `]` or `}` outside string literals
pub fn repair_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some(']') | Some('}')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_bracketed_ignores_brackets_in_strings() {
        let text = r#"Plan: [{"action": "respond_to_user", "parameters": {"text": "a ] b [ c"}}] done"#;
        assert_eq!(
            extract_bracketed(text),
            Some(r#"[{"action": "respond_to_user", "parameters": {"text": "a ] b [ c"}}]"#)
        );
    }

    #[test]
    fn test_extract_bracketed_escaped_quote() {
        let text = r#"[{"action": "say \"]\" now"}]"#;
        assert_eq!(extract_bracketed(text), Some(text));
    }

    #[test]
    fn test_extract_bracketed_unbalanced() {
        assert_eq!(extract_bracketed("I will do: [1,2"), None);
        assert_eq!(extract_bracketed("no brackets"), None);
    }

    #[test]
    fn test_repair_trailing_commas() {
        assert_eq!(repair_trailing_commas("[1, 2, ]"), "[1, 2 ]");
        assert_eq!(
            repair_trailing_commas(r#"{"a": [1,], "b": ",]",}"#),
            r#"{"a": [1], "b": ",]"}"#
        );
    }

    #[test]
    fn test_parse_plan_well_formed() {
        let text = r#"[{"step": 1, "action": "simple_math", "parameters": {"expression": "3 + 5"}},
                      {"step": 2, "action": "respond_to_user", "parameters": {"text": "done"}}]"#;
        let tasks = parse_plan(text).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].action, "simple_math");
        assert_eq!(tasks[0].parameters["expression"], json!("3 + 5"));
        assert_eq!(tasks[1].step, 2);
    }

    #[test]
    fn test_parse_plan_keeps_array_order() {
        let text = r#"[{"step": 2, "action": "b"}, {"step": 1, "action": "a"}]"#;
        let tasks = parse_plan(text).unwrap();
        let actions: Vec<_> = tasks.iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["b", "a"]);
        let steps: Vec<_> = tasks.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![1, 2]);
    }

    #[test]
    fn test_parse_plan_keeps_increasing_gapped_steps() {
        let text = r#"[{"step": 10, "action": "a"}, {"step": 20, "action": "b"}]"#;
        let steps: Vec<_> = parse_plan(text).unwrap().iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![10, 20]);
    }

    #[test]
    fn test_parse_plan_renumbers_missing_and_duplicate_steps() {
        let text = r#"[{"step": 3, "action": "a"}, {"action": "b"}, {"step": 3, "tool_name": "c"}]"#;
        let tasks = parse_plan(text).unwrap();
        let steps: Vec<_> = tasks.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
        assert_eq!(tasks[2].action, "c");
        assert!(tasks[1].parameters.is_empty());
    }

    #[test]
    fn test_parse_plan_skips_elements_without_action() {
        let text = r#"[{"step": 1, "parameters": {}}, 42, {"step": 2, "action": "  "}, {"step": 3, "tool": "x"}]"#;
        let tasks = parse_plan(text).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].action, "x");
        assert_eq!(tasks[0].step, 3);
    }

    #[test]
    fn test_parse_plan_errors() {
        assert!(matches!(parse_plan("nothing"), Err(AgentError::PlanParse(_))));
        assert!(matches!(parse_plan("[1, 2"), Err(AgentError::PlanParse(_))));
        assert!(matches!(parse_plan("[oops]"), Err(AgentError::PlanParse(_))));
        assert!(parse_plan("[]").unwrap().is_empty());
    }

    #[test]
    fn test_fallback_task() {
        let task = fallback_task("  some prose  ", "q");
        assert_eq!(task.step, 1);
        assert_eq!(task.action, RESPOND_ACTION);
        assert_eq!(task.parameters["text"], json!("some prose"));
        assert_eq!(fallback_task("", "the query").parameters["text"], json!("the query"));
    }

    #[test]
    fn test_heuristic_plan() {
        let tasks = heuristic_plan("Find the weather. Then summarize it.\nThanks");
        let actions: Vec<_> = tasks.iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["Find the weather", "Then summarize it", "Thanks"]);
        assert_eq!(tasks[2].step, 3);

        let tasks = heuristic_plan(" ... ");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].action, RESPOND_ACTION);
    }
}
