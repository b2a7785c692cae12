//! Steward configuration file (`~/.steward/config.toml`).
//!
//! ```toml
//! [search]
//! max_results = 200
//! max_results_per_file = 20
//! line_budget_ms = 1000
//!
//! [terminal]
//! identifier = "Steward"
//! default_timeout_secs = 60
//! max_timeout_secs = 600
//!
//! [terminal.shell]
//! binary = "${STEWARD_SHELL}"
//!
//! [permissions]
//! pre_granted = ["editFile"]
//! unattended = "deny"
//! ```
//!
//! Every key is optional; anything left out keeps the built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use serde::{Deserialize, Deserializer};
use steward_tools::{ShellConfig, ToolSettings, detect_shell};
use steward_types::PermissionDecision;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSettings {
    pub search: Option<SearchConfig>,
    pub list: Option<ListConfig>,
    pub terminal: Option<TerminalConfig>,
    pub permissions: Option<PermissionsConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub ignore_case: Option<bool>,
    pub max_results: Option<usize>,
    pub max_results_per_file: Option<usize>,
    /// Per-line matching budget in milliseconds.
    pub line_budget_ms: Option<u64>,
    pub regex_size_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListConfig {
    pub max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TerminalConfig {
    pub shell: Option<ShellConfig>,
    pub identifier: Option<String>,
    pub default_timeout_secs: Option<u64>,
    pub max_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionsConfig {
    #[serde(default)]
    pub pre_granted: Vec<String>,
    /// `deny`, `once`, or `session`.
    #[serde(default, deserialize_with = "deserialize_decision")]
    pub unattended: Option<PermissionDecision>,
}

fn deserialize_decision<'de, D>(deserializer: D) -> Result<Option<PermissionDecision>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| raw.parse().map_err(serde::de::Error::custom))
        .transpose()
}

/// Replace `${VAR}` with the variable's value; unset variables become empty.
/// An unterminated `${` is kept as written.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let var = &after[..close];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

impl ConfigSettings {
    /// Load the default config file. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load an explicit config file; it must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to read config");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "Failed to parse config");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve into runtime settings, filling gaps with defaults.
    #[must_use]
    pub fn into_tool_settings(self) -> ToolSettings {
        let mut settings = ToolSettings::default();

        if let Some(search) = self.search {
            let target = &mut settings.search;
            target.ignore_case = search.ignore_case.unwrap_or(target.ignore_case);
            target.max_results = search.max_results.unwrap_or(target.max_results);
            target.max_results_per_file = search
                .max_results_per_file
                .unwrap_or(target.max_results_per_file);
            if let Some(ms) = search.line_budget_ms {
                target.line_budget = Duration::from_millis(ms);
            }
            target.regex_size_limit = search.regex_size_limit.unwrap_or(target.regex_size_limit);
        }

        if let Some(max_entries) = self.list.and_then(|list| list.max_entries) {
            settings.list.max_entries = max_entries;
        }

        if let Some(terminal) = self.terminal {
            let target = &mut settings.terminal;
            if let Some(shell) = terminal.shell {
                let shell = ShellConfig {
                    binary: shell.binary.map(|binary| expand_env_vars(&binary)),
                    args: shell
                        .args
                        .map(|args| args.iter().map(|arg| expand_env_vars(arg)).collect()),
                };
                target.shell = detect_shell(Some(&shell));
            }
            if let Some(identifier) = terminal.identifier {
                target.identifier = expand_env_vars(&identifier);
            }
            if let Some(secs) = terminal.max_timeout_secs {
                target.max_timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = terminal.default_timeout_secs {
                target.default_timeout = Duration::from_secs(secs);
            }
            target.default_timeout = target.default_timeout.min(target.max_timeout);
        }
        tracing::info!(
            shell = %settings.terminal.shell.name,
            binary = ?settings.terminal.shell.binary,
            "Detected shell"
        );

        if let Some(permissions) = self.permissions {
            settings.permissions.pre_granted = permissions
                .pre_granted
                .iter()
                .map(|scope| expand_env_vars(scope))
                .filter(|scope| !scope.trim().is_empty())
                .collect();
            if let Some(decision) = permissions.unattended {
                settings.permissions.unattended = decision;
            }
        }

        settings
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".steward").join("config.toml"))
}
