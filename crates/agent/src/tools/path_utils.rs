//! Workspace confinement for file-touching tools

use std::path::{Component, Path, PathBuf};

use cappuccino_config::paths::expand_tilde;

/// Path resolved outside the workspace root
#[derive(Debug, Clone, thiserror::Error)]
#[error("path {path} is outside workspace {workspace}")]
pub struct PathValidationError {
    pub path: String,
    pub workspace: String,
}

/// Resolve `path` against `workspace_root` and refuse anything outside it.
///
/// Relative paths are joined to the root, `~` is expanded, `..` is
/// resolved lexically and the deepest existing ancestor is canonicalized so
/// symlinks cannot escape either.
pub fn validate_workspace_path(
    path: &str,
    workspace_root: &Path,
) -> Result<PathBuf, PathValidationError> {
    let expanded = if path.starts_with('/') || path.starts_with('~') {
        expand_tilde(path)
    } else {
        workspace_root.join(path)
    };

    let resolved = resolve_existing_prefix(&normalize(&expanded));
    let workspace = resolve_existing_prefix(&normalize(workspace_root));

    if !is_path_within_workspace(&resolved, &workspace) {
        return Err(PathValidationError {
            path: path.to_string(),
            workspace: workspace.display().to_string(),
        });
    }
    Ok(resolved)
}

/// Lexically resolve `.` and `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the longest existing ancestor and re-append the rest
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    resolved
}

fn is_path_within_workspace(path: &Path, workspace: &Path) -> bool {
    path.starts_with(workspace)
}
