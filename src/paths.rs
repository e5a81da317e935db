// ABOUTME: XDG Base Directory paths for cross-platform config and data storage
// ABOUTME: Provides standardized paths for the config file and the jsonl outbox

use directories::ProjectDirs;
use std::path::PathBuf;

/// Application identifier for XDG directories
const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "Agent Relay";
const APPLICATION: &str = "agent-relay";

/// Get XDG-compliant directories for the application
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Get the data directory path (e.g., ~/.local/share/agent-relay/)
/// Falls back to ./data if XDG directories unavailable
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Default file for the jsonl adapter
/// e.g., ~/.local/share/agent-relay/outbox.jsonl
pub fn default_outbox_file() -> PathBuf {
    data_dir().join("outbox.jsonl")
}

/// Get the config directory path (e.g., ~/.config/agent-relay/)
/// Falls back to current directory if XDG directories unavailable
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the default config file path
/// e.g., ~/.config/agent-relay/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_named_after_the_application() {
        assert!(default_outbox_file().ends_with("outbox.jsonl"));
        assert!(config_file().ends_with("config.toml"));
        if let Some(dirs) = project_dirs() {
            let project = dirs.project_path().to_string_lossy().to_lowercase();
            assert!(project.contains("agent"));
            assert!(!project.contains("2389"));
        }
    }
}
