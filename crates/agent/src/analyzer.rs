//! Analyzer: results in, one answer out

use cappuccino_bus::{StageReceiver, TaskResult};
use tracing::{info, warn};

use crate::llm::LlmClient;
use crate::planner::RESPOND_ACTION;
use crate::prompt;

/// Answer when a run produced nothing
pub const NO_RESULTS: &str = "No results were produced.";

pub struct Analyzer {
    llm: LlmClient,
}

impl Analyzer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Drain the result queue, then summarize
    pub async fn analyze(&self, query: &str, rx: StageReceiver<TaskResult>) -> String {
        let results = rx.collect().await;
        self.summarize(query, &results).await
    }

    /// Combine results into the final answer.
    ///
    /// An artifact or a lone direct reply is returned verbatim; anything else
    /// goes to the model, with a plain join of the outputs if it cannot answer.
    pub async fn summarize(&self, query: &str, results: &[TaskResult]) -> String {
        if results.is_empty() {
            return NO_RESULTS.to_string();
        }

        if let Some(artifact) = results
            .iter()
            .filter(|r| !r.is_error)
            .find_map(|r| r.artifact.clone())
        {
            info!("◆ ANALYZER: RETURNING ARTIFACT");
            return artifact;
        }

        if let [only] = results {
            if !only.is_error && only.action == RESPOND_ACTION {
                return only.output_text();
            }
        }

        match self
            .llm
            .complete(&prompt::analysis_prompt(query, results))
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!("◆ ANALYZER: {}, JOINING OUTPUTS", e);
                literal_join(results)
            }
        }
    }
}

/// Successful outputs joined by newlines, or all outputs if none succeeded
pub fn literal_join(results: &[TaskResult]) -> String {
    let succeeded: Vec<String> = results
        .iter()
        .filter(|r| !r.is_error)
        .map(TaskResult::output_text)
        .collect();

    if succeeded.is_empty() {
        results
            .iter()
            .map(TaskResult::output_text)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        succeeded.join("\n")
    }
}
