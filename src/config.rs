//! Runtime configuration for dredge.
//!
//! Everything comes from the environment; the process takes no flags or
//! subcommands. `GITHUB_TOKEN` is required. The rest defaults to paths
//! relative to the working directory, suitable for running next to an
//! issue-export dump.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the source-hosting bearer token.
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{TOKEN_VAR} environment variable not set")]
    MissingToken,
}

/// Process-wide configuration, built once at startup and passed by
/// reference into each component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the source-hosting API.
    pub github_token: String,

    /// Root directory of the issue-export corpus.
    pub issues_dir: PathBuf,

    /// Processed-file ledger path.
    pub processed_ledger: PathBuf,

    /// Import ledger path.
    pub imports_ledger: PathBuf,

    /// Sleep between successive commit fetches within one pull request.
    /// Keeps the run under the source host's secondary rate limits.
    pub commit_pacing: Duration,

    /// Minimal sleep before the first live-issue fetch of each document.
    pub issue_pacing: Duration,
}

impl Config {
    /// Build configuration from the environment.
    ///
    /// A missing or empty `GITHUB_TOKEN` is fatal: nothing can be mined
    /// from the source-hosting API without it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let github_token = match env::var(TOKEN_VAR) {
            Ok(token) if !token.is_empty() => token,
            _ => return Err(ConfigError::MissingToken),
        };

        Ok(Self {
            github_token,
            issues_dir: path_from_env("DREDGE_ISSUES_DIR", "./issues"),
            processed_ledger: path_from_env("DREDGE_PROCESSED_LEDGER", "./processed_issues.csv"),
            imports_ledger: path_from_env("DREDGE_IMPORTS_LEDGER", "./discovered_imports.csv"),
            commit_pacing: Duration::from_secs(2),
            issue_pacing: Duration::from_secs(1),
        })
    }
}

fn path_from_env(var: &str, default: &str) -> PathBuf {
    match env::var(var) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(default),
    }
}
