//! Configuration and artifact paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/certverify/` and `~/.local/share/certverify/`
//! - macOS: `~/Library/Application Support/certverify/`

use std::io;
use std::path::PathBuf;

/// Application name used for config and data directories
const APP_NAME: &str = "certverify";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default root for run artifacts
///
/// Falls back to a directory under the system temp dir when no home
/// directory can be determined (e.g. inside CI containers).
pub fn default_artifacts_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("runs"))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME).join("runs"))
}

/// Ensure a directory exists, creating parents as needed
pub fn ensure_dir(dir: &std::path::Path) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_dir_is_valid() {
        let dir = default_artifacts_dir();
        assert!(dir.ends_with("runs"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let created = ensure_dir(&nested).unwrap();
        assert!(created.is_dir());
    }
}
