//! Command implementations

use anyhow::{Context, Result};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use cappuccino_agent::{Orchestrator, OrchestratorBuilder, RunEvent};
use cappuccino_config::{self, Config};
use cappuccino_provider::{OpenAiProvider, Provider, RetryPolicy, RetryProvider};
use cappuccino_state::StateStore;

/// Model client from configuration, if an API key is available
pub fn build_provider(config: &Config) -> Option<Arc<dyn Provider>> {
    if !config.has_api_key() {
        debug!("No API key configured, running without a model");
        return None;
    }
    let settings = &config.provider;
    let openai = OpenAiProvider::with_timeout(
        settings.api_key.clone(),
        settings.api_base.clone(),
        Some(settings.model.clone()),
        Duration::from_secs(settings.timeout_secs),
    );
    let policy = RetryPolicy {
        max_retries: settings.max_retries,
        initial_backoff: Duration::from_millis(settings.retry_backoff_ms),
        ..RetryPolicy::default()
    };
    Some(Arc::new(RetryProvider::new(openai, policy)))
}

fn build_agent(config: &Config) -> Orchestrator {
    OrchestratorBuilder::from_config(config, build_provider(config)).build()
}

fn open_store(config: &Config) -> StateStore {
    StateStore::open(config.state_path(), config.state.agent_id.clone())
}

/// Create config, workspace and state directories
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing Cappuccino...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = cappuccino_config::init()
        .await
        .context("Failed to create configuration")?;

    println!("Config:    {}", cappuccino_config::config_path().display());
    println!("Workspace: {}", config.workspace_path().display());
    println!("State:     {}", config.state_path().display());

    println!("\n◆ Cappuccino initialized");
    println!("\nNext steps:");
    println!("  1. Add your API key to the config file or set OPENAI_API_KEY");
    println!("  2. Ask something: cappuccino run -m \"What is 3 + 5?\"");

    Ok(())
}

/// Answer one query, or read queries from stdin until `exit`
pub async fn run_command(message: Option<String>) -> Result<()> {
    let config = Config::load().await.context("Failed to load config")?;
    let agent = build_agent(&config);
    info!("Agent ready with {} tools", agent.tools().len());

    if let Some(msg) = message {
        let answer = ask(&agent, &msg).await;
        println!("\n◆ {}", answer);
        return Ok(());
    }

    println!("◆ Interactive mode (type 'exit' to quit)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("◆ ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let answer = ask(&agent, input).await;
        println!("\n◆ {}\n", answer);
    }

    Ok(())
}

/// Run a query, tracing pipeline progress as it happens
async fn ask(agent: &Orchestrator, query: &str) -> String {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::Phase(phase) => debug!("phase {:?}", phase),
                RunEvent::TaskPlanned(task) => debug!("planned step {}: {}", task.step, task.action),
                RunEvent::TaskFinished(result) => debug!(
                    "step {} {}",
                    result.step,
                    if result.is_error { "failed" } else { "done" }
                ),
                RunEvent::Answer(_) => break,
            }
        }
    });
    let answer = agent.run_with_events(query, tx).await;
    let _ = progress.await;
    answer
}

/// Print configuration and state locations
pub async fn status_command() -> Result<()> {
    let config_path = cappuccino_config::config_path();

    println!("◆ Cappuccino Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "[OK]" } else { "[Missing]" }
    );

    let config = Config::load().await.context("Failed to load config")?;
    let workspace = config.workspace_path();
    println!(
        "Workspace: {} {}",
        workspace.display(),
        if workspace.exists() { "[OK]" } else { "[Missing]" }
    );
    println!("State:     {}", config.state_path().display());
    println!("Agent:     {}", config.state.agent_id);
    println!("Model:     {}", config.provider.model);
    println!(
        "API Key:   {}",
        if config.has_api_key() { "[Set]" } else { "[Missing]" }
    );
    println!(
        "Pipeline:  queue {} / workers {} / parallel {}",
        config.pipeline.queue_capacity,
        config.pipeline.worker_threads,
        config.pipeline.max_parallel_tasks
    );

    println!("\n◆ Ready");
    Ok(())
}

/// List the tools the planner can choose from
pub async fn tools_command() -> Result<()> {
    let config = Config::load().await.context("Failed to load config")?;
    let agent = build_agent(&config);

    println!("◆ Tools ({})", agent.tools().len());
    for schema in agent.tools().schema() {
        println!("  {:<20} {}", schema.name, schema.description);
    }
    Ok(())
}

/// Print the last `limit` history messages
pub async fn history_command(limit: usize) -> Result<()> {
    let config = Config::load().await.context("Failed to load config")?;
    let state = open_store(&config)
        .load()
        .await
        .context("Failed to load agent state")?;

    if state.history.is_empty() {
        println!("No history");
        return Ok(());
    }

    let skip = state.history.len().saturating_sub(limit);
    for message in &state.history[skip..] {
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.role,
            message.content
        );
    }
    Ok(())
}

/// Print one cached value as JSON
pub async fn cache_get_command(key: String) -> Result<()> {
    let config = Config::load().await.context("Failed to load config")?;
    let value = open_store(&config)
        .get_cached(&key)
        .await
        .context("Failed to read cache")?;

    match value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("No cached value for {}", key),
    }
    Ok(())
}
