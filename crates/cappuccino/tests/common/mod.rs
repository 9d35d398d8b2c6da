//! Isolated environments for CLI integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// A data directory of its own, so tests never touch `~/.cappuccino`
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".cappuccino");
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { temp_dir, data_dir })
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Binary pointed at this environment, with no model credentials
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cappuccino"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("CAPPUCCINO_HOME", &self.data_dir);
        cmd.env_remove("OPENAI_API_KEY");
        cmd.env_remove("OPENAI_API_BASE");
        cmd.env_remove("CAPPUCCINO_MODEL");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config file using a custom workspace
    pub fn create_config(&self) -> anyhow::Result<()> {
        let workspace = self.temp_dir.path().join("workspace");
        let config = serde_json::json!({
            "provider": {"model": "test/model"},
            "state": {"agent_id": "cli-test"},
            "tools": {"workspace": workspace.to_string_lossy()}
        });
        std::fs::write(
            self.data_file("config.json"),
            serde_json::to_string_pretty(&config)?,
        )?;
        Ok(())
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
