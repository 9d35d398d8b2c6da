//! Filesystem locations

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "CAPPUCCINO_HOME";

/// Data directory (`$CAPPUCCINO_HOME`, else `~/.cappuccino`)
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".cappuccino"))
        .unwrap_or_else(|| PathBuf::from(".cappuccino"))
}

/// Configuration file
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Default tool workspace
pub fn workspace_path() -> PathBuf {
    data_dir().join("workspace")
}

/// Persistent agent state and cache
pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Sanitize a string for use as a file name
pub fn safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            _ => c,
        })
        .collect()
}
