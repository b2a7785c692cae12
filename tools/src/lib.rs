//! Tool execution core: the agent-facing tool catalog, the permission gate in
//! front of it, and the edit-session engine that keeps agent edits reversible.

pub mod builtins;
pub mod config;
pub mod events;
pub mod files;
pub mod host;
pub mod invoke;
pub mod line_patch;
pub mod permission;
pub mod scheduler;
pub mod search;
pub mod session;
pub mod terminal;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use steward_types::{ExecutionContext, ToolDefinition};

pub use builtins::{builtin_registry, register_builtins};
pub use config::{
    ListSettings, PermissionSettings, SearchSettings, ShellConfig, TerminalSettings, ToolSettings,
};
pub use events::{EventBus, ToolEvent};
pub use files::FileService;
pub use host::HostServices;
pub use invoke::{InvokeError, ToolInvoker};
pub use permission::{DecisionError, PermissionGate, PermissionRequest, SessionGrants};
pub use scheduler::{SchedulerError, UiScheduler};
pub use terminal::{DetectedShell, ShellTerminal, TerminalRunner, detect_shell};

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("{tool} failed: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("No active project and no path provided.")]
    NoProject,
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
}

/// One agent-callable tool.
///
/// `execute` must not block the thread it is polled on: UI-context tools are
/// polled on the UI scheduler, and `UiThreadOnly` tools must complete on the
/// first poll.
pub trait Tool: Send + Sync {
    /// Function name exposed to the agent (e.g. `readFile`).
    fn name(&self) -> &'static str;
    /// Human-facing name used in events and prompts (e.g. `Read File`).
    fn display_name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn execution_context(&self) -> ExecutionContext;

    fn requires_permission(&self) -> bool {
        false
    }
    /// Explicit permission scope; the display name is used when `None`.
    fn permission_scope(&self) -> Option<&'static str> {
        None
    }
    /// Short detail shown next to the display name (file name, command).
    fn detail(&self, _args: &Value) -> Option<String> {
        None
    }
    /// Question put to the user when permission is required.
    fn question(&self, _args: &Value) -> String {
        format!("Allow {}?", self.display_name())
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a>;
}

/// Effective permission scope for a tool.
#[must_use]
pub fn scope_of(tool: &dyn Tool) -> &'static str {
    tool.permission_scope().unwrap_or_else(|| tool.display_name())
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Per-call tool context.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub call_id: String,
    pub files: Arc<FileService>,
    pub host: HostServices,
    pub settings: Arc<ToolSettings>,
}

/// Tools by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-calling manifest, sorted by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition::new(tool.name(), tool.description(), tool.schema()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    validator.validate(args).map_err(|err| ToolError::BadArgs {
        message: err.to_string(),
    })
}

/// Truncate output to at most `effective_max` bytes, marking the cut.
#[must_use]
pub fn truncate_output(output: String, effective_max: usize) -> String {
    if output.len() <= effective_max {
        return output;
    }
    let marker = "... [truncated]";
    if effective_max <= marker.len() {
        return marker[..effective_max].to_string();
    }
    let mut end = effective_max - marker.len();
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = output;
    truncated.truncate(end);
    truncated.push_str(marker);
    truncated
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ToolError, truncate_output, validate_args};

    #[test]
    fn truncate_keeps_short_output() {
        assert_eq!(truncate_output("short".to_string(), 256), "short");
    }

    #[test]
    fn truncate_respects_limit_and_char_boundaries() {
        let long = "é".repeat(300);
        let out = truncate_output(long, 256);
        assert!(out.len() <= 256);
        assert!(out.ends_with("... [truncated]"));
    }

    #[test]
    fn validate_args_reports_schema_violations() {
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });
        assert!(validate_args(&schema, &json!({"path": "a"})).is_ok());
        let err = validate_args(&schema, &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }
}
