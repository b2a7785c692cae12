//! Runtime settings for the tool catalog.
//!
//! The `steward-config` crate deserializes the config file and converts it
//! into [`ToolSettings`]; the serde-facing pieces shared with it live here.

use std::time::Duration;

use serde::Deserialize;
use steward_types::PermissionDecision;

use crate::terminal::{DetectedShell, detect_shell};

/// Shell override for terminal commands.
///
/// ```toml
/// [terminal.shell]
/// binary = "pwsh"
/// args = ["-NoProfile", "-Command"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "pwsh", "bash", "/usr/local/bin/fish").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]` or `["/C"]`).
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    /// Default for the `ignoreCase` argument.
    pub ignore_case: bool,
    pub max_results: usize,
    pub max_results_per_file: usize,
    /// Wall-clock budget for matching one line.
    pub line_budget: Duration,
    /// Upper bound on the compiled pattern size, in bytes.
    pub regex_size_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            ignore_case: true,
            max_results: 200,
            max_results_per_file: 20,
            line_budget: Duration::from_secs(1),
            regex_size_limit: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSettings {
    pub shell: DetectedShell,
    /// Terminal name commands run under.
    pub identifier: String,
    pub default_timeout: Duration,
    /// Cap on the agent-requested `timeoutSeconds`.
    pub max_timeout: Duration,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: detect_shell(None),
            identifier: "Steward".to_string(),
            default_timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(600),
        }
    }
}

impl TerminalSettings {
    /// Requested timeout, or the default, capped at `max_timeout`.
    #[must_use]
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        requested_secs
            .map_or(self.default_timeout, Duration::from_secs)
            .min(self.max_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSettings {
    /// Scopes granted for the whole session at startup.
    pub pre_granted: Vec<String>,
    /// Applied when a request is raised and nobody is listening.
    pub unattended: PermissionDecision,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            pre_granted: Vec::new(),
            unattended: PermissionDecision::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSettings {
    pub max_entries: usize,
}

impl Default for ListSettings {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}

/// Aggregated tool settings derived from config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolSettings {
    pub search: SearchSettings,
    pub list: ListSettings,
    pub terminal: TerminalSettings,
    pub permissions: PermissionSettings,
}
