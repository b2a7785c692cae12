//! The tool invocation wrapper.
//!
//! Every call goes through [`ToolInvoker::invoke`]: lookup, argument
//! validation, the permission gate, then dispatch on the tool's
//! [`ExecutionContext`]. Tool errors and panics are folded into the `error`
//! field of the result; only unknown tools, denials and a stopped UI scheduler
//! surface as [`InvokeError`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{Map, Value, json};
use steward_types::{ExecutionContext, ToolCall, ToolDefinition};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ToolSettings;
use crate::events::{EventBus, ToolEvent};
use crate::files::FileService;
use crate::host::HostServices;
use crate::permission::{Ask, PermissionGate, SessionGrants};
use crate::scheduler::{SchedulerError, UiScheduler, panic_message};
use crate::{Tool, ToolCtx, ToolError, ToolRegistry, scope_of, truncate_output, validate_args};

/// Upper bound on `ToolEvent::Completed::output_summary`, in bytes.
const SUMMARY_MAX_BYTES: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Permission denied for {tool} ({scope})")]
    PermissionDenied { tool: String, scope: String },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Result of running a tool body, with failures already rendered.
type Outcome = Result<Value, String>;

/// Shared entry point for agent tool calls.
#[derive(Debug)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    gate: PermissionGate,
    events: EventBus,
    files: Arc<FileService>,
    host: HostServices,
    settings: Arc<ToolSettings>,
    scheduler: Arc<UiScheduler>,
}

impl ToolInvoker {
    /// Build an invoker with a fresh grant set seeded from
    /// `settings.permissions.pre_granted`.
    #[must_use]
    pub fn new(
        registry: ToolRegistry,
        host: HostServices,
        settings: ToolSettings,
        scheduler: Arc<UiScheduler>,
    ) -> Self {
        let events = EventBus::default();
        let grants = Arc::new(SessionGrants::with_scopes(
            settings.permissions.pre_granted.iter(),
        ));
        let gate = PermissionGate::new(grants, events.clone())
            .with_unattended(settings.permissions.unattended);
        let files = Arc::new(FileService::new(Arc::clone(&host.editors)));
        Self {
            registry: Arc::new(registry),
            gate,
            events,
            files,
            host,
            settings: Arc::new(settings),
            scheduler,
        }
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn files(&self) -> &Arc<FileService> {
        &self.files
    }

    #[must_use]
    pub fn grants(&self) -> &Arc<SessionGrants> {
        self.gate.grants()
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    #[must_use]
    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Run one tool call to completion.
    pub async fn invoke(&self, call: &ToolCall) -> Result<Value, InvokeError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| InvokeError::UnknownTool {
                name: call.name.clone(),
            })?;
        let call_id = if call.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            call.id.clone()
        };
        let args = call.arguments.clone();

        if let Err(e) = validate_args(&tool.schema(), &args) {
            warn!(tool = tool.name(), call_id = %call_id, error = %e, "rejected tool arguments");
            return Ok(json!({ "error": e.to_string() }));
        }

        if tool.requires_permission() {
            let scope = scope_of(tool.as_ref());
            let decision = self
                .gate
                .authorize(Ask {
                    call_id: &call_id,
                    tool: tool.display_name(),
                    scope,
                    question: tool.question(&args),
                    detail: tool.detail(&args),
                })
                .await;
            if !decision.is_allowed() {
                return Err(InvokeError::PermissionDenied {
                    tool: tool.display_name().to_string(),
                    scope: scope.to_string(),
                });
            }
        }

        let context = tool.execution_context();
        debug!(tool = tool.name(), call_id = %call_id, ?context, "invoking tool");
        let started = ToolEvent::Started {
            call_id: call_id.clone(),
            tool: tool.display_name().to_string(),
            detail: tool.detail(&args),
        };
        let ctx = ToolCtx {
            call_id: call_id.clone(),
            files: Arc::clone(&self.files),
            host: self.host.clone(),
            settings: Arc::clone(&self.settings),
        };

        let finished = match context {
            ExecutionContext::UiThreadOnly => self.run_ui_only(tool, args, ctx, started).await,
            ExecutionContext::UiThreadPinned => self.run_pinned(tool, args, ctx, started).await,
            ExecutionContext::BackgroundThenNotifyOnUi => {
                self.run_background(tool, args, ctx, started).await
            }
        };
        match finished {
            Ok(value) => Ok(value),
            Err(SchedulerError::Stopped) => Err(InvokeError::Scheduler(SchedulerError::Stopped)),
            // The panic escaped before the body's own guard was in place.
            Err(e) => {
                let value = settle(Err(e.to_string()));
                self.events.publish(completed(&call_id, &value));
                Ok(value)
            }
        }
    }

    /// Events and body as one job; the body must finish on its first poll.
    async fn run_ui_only(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        ctx: ToolCtx,
        started: ToolEvent,
    ) -> Result<Value, SchedulerError> {
        let events = self.events.clone();
        self.scheduler
            .invoke(move || {
                events.publish(started);
                let polled = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    tool.execute(args, &ctx).now_or_never()
                }));
                let outcome = match polled {
                    Ok(Some(result)) => render(result),
                    Ok(None) => Err(SchedulerError::Suspended.to_string()),
                    Err(payload) => Err(panic_message(payload).to_string()),
                };
                let value = settle(outcome);
                events.publish(completed(&ctx.call_id, &value));
                value
            })
            .await
    }

    /// The whole body as a local task on the UI thread.
    async fn run_pinned(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        ctx: ToolCtx,
        started: ToolEvent,
    ) -> Result<Value, SchedulerError> {
        let events = self.events.clone();
        self.scheduler
            .run_pinned(move || async move {
                events.publish(started);
                let outcome = match AssertUnwindSafe(tool.execute(args, &ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => render(result),
                    Err(payload) => Err(panic_message(payload).to_string()),
                };
                let value = settle(outcome);
                events.publish(completed(&ctx.call_id, &value));
                value
            })
            .await
    }

    /// Body on the multi-threaded runtime; only events hop to the UI thread.
    async fn run_background(
        &self,
        tool: Arc<dyn Tool>,
        args: Value,
        ctx: ToolCtx,
        started: ToolEvent,
    ) -> Result<Value, SchedulerError> {
        self.notify_on_ui(started).await?;
        let call_id = ctx.call_id.clone();
        let handle = tokio::spawn(async move { tool.execute(args, &ctx).await });
        let outcome = match handle.await {
            Ok(result) => render(result),
            Err(e) if e.is_panic() => Err(panic_message(e.into_panic()).to_string()),
            Err(e) => Err(e.to_string()),
        };
        let value = settle(outcome);
        self.notify_on_ui(completed(&call_id, &value)).await?;
        Ok(value)
    }

    async fn notify_on_ui(&self, event: ToolEvent) -> Result<(), SchedulerError> {
        let events = self.events.clone();
        self.scheduler
            .invoke(move || {
                events.publish(event);
            })
            .await
    }
}

fn render(result: Result<Value, ToolError>) -> Outcome {
    result.map_err(|e| e.to_string())
}

/// Shape an outcome into the object returned to the agent.
///
/// Successful objects gain `"error": null` unless the tool reported an
/// operational error itself; non-object values are wrapped under `result`.
fn settle(outcome: Outcome) -> Value {
    match outcome {
        Ok(Value::Object(mut map)) => {
            map.entry("error").or_insert(Value::Null);
            Value::Object(map)
        }
        Ok(other) => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map.insert("error".to_string(), Value::Null);
            Value::Object(map)
        }
        Err(message) => {
            warn!(error = %message, "tool failed");
            json!({ "error": message })
        }
    }
}

fn completed(call_id: &str, value: &Value) -> ToolEvent {
    ToolEvent::Completed {
        call_id: call_id.to_string(),
        success: value.get("error").is_none_or(Value::is_null),
        output_summary: truncate_output(value.to_string(), SUMMARY_MAX_BYTES),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};
    use steward_types::{ExecutionContext, ToolCall};

    use super::{InvokeError, ToolInvoker, settle};
    use crate::config::ToolSettings;
    use crate::events::ToolEvent;
    use crate::host::{
        HostServices, InMemoryEditors, RecordingSettings, StaticDiagnostics, StaticProject,
    };
    use crate::scheduler::UiScheduler;
    use crate::terminal::{ShellTerminal, detect_shell};
    use crate::{Tool, ToolCtx, ToolError, ToolFut, ToolRegistry};

    struct Probe {
        name: &'static str,
        context: ExecutionContext,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Scalar,
        Fail,
        Panic,
        Suspend,
    }

    impl Tool for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn display_name(&self) -> &'static str {
            "Probe"
        }

        fn description(&self) -> &'static str {
            "test probe"
        }

        fn schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        fn execution_context(&self) -> ExecutionContext {
            self.context
        }

        fn execute<'a>(&'a self, _args: Value, _ctx: &'a ToolCtx) -> ToolFut<'a> {
            let behavior = self.behavior;
            Box::pin(async move {
                match behavior {
                    Behavior::Scalar => Ok(json!(42)),
                    Behavior::Fail => Err(ToolError::ExecutionFailed {
                        tool: "Probe".to_string(),
                        message: "nope".to_string(),
                    }),
                    Behavior::Panic => panic!("probe exploded"),
                    Behavior::Suspend => {
                        tokio::task::yield_now().await;
                        Ok(json!({}))
                    }
                }
            })
        }
    }

    fn invoker(tools: Vec<Probe>) -> ToolInvoker {
        let mut registry = ToolRegistry::default();
        for tool in tools {
            registry.register(Arc::new(tool)).unwrap();
        }
        let editors = Arc::new(InMemoryEditors::new());
        let host = HostServices {
            editors,
            project: Arc::new(StaticProject::new(None)),
            diagnostics: Arc::new(StaticDiagnostics::default()),
            terminal: Arc::new(ShellTerminal::new(detect_shell(None))),
            settings: Arc::new(RecordingSettings::new()),
        };
        ToolInvoker::new(
            registry,
            host,
            ToolSettings::default(),
            Arc::new(UiScheduler::start().unwrap()),
        )
    }

    fn probe(name: &'static str, context: ExecutionContext, behavior: Behavior) -> Probe {
        Probe {
            name,
            context,
            behavior,
        }
    }

    #[test]
    fn settle_adds_null_error_and_wraps_scalars() {
        assert_eq!(settle(Ok(json!({"a": 1}))), json!({"a": 1, "error": null}));
        assert_eq!(
            settle(Ok(json!({"result": null, "error": "bad"}))),
            json!({"result": null, "error": "bad"})
        );
        assert_eq!(settle(Ok(json!(3))), json!({"result": 3, "error": null}));
        assert_eq!(settle(Err("x".to_string())), json!({"error": "x"}));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let invoker = invoker(vec![]);
        let err = invoker
            .invoke(&ToolCall::new("", "missing", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::UnknownTool { name } if name == "missing"));
    }

    #[tokio::test]
    async fn panics_become_error_results_in_every_context() {
        let invoker = invoker(vec![
            probe("ui", ExecutionContext::UiThreadOnly, Behavior::Panic),
            probe("pinned", ExecutionContext::UiThreadPinned, Behavior::Panic),
            probe("bg", ExecutionContext::BackgroundThenNotifyOnUi, Behavior::Panic),
        ]);
        for name in ["ui", "pinned", "bg"] {
            let out = invoker
                .invoke(&ToolCall::new("", name, json!({})))
                .await
                .unwrap();
            let error = out["error"].as_str().unwrap();
            assert!(error.contains("probe exploded"), "{name}: {error}");
        }
        // The UI thread is still serving jobs.
        let out = invoker
            .invoke(&ToolCall::new("", "ui", json!({})))
            .await
            .unwrap();
        assert!(out["error"].is_string());
    }

    #[tokio::test]
    async fn suspending_ui_only_tool_is_reported() {
        let invoker = invoker(vec![probe(
            "ui",
            ExecutionContext::UiThreadOnly,
            Behavior::Suspend,
        )]);
        let out = invoker
            .invoke(&ToolCall::new("", "ui", json!({})))
            .await
            .unwrap();
        assert!(out["error"].as_str().unwrap().contains("suspended"));
    }

    #[tokio::test]
    async fn tool_errors_fill_the_error_field() {
        let invoker = invoker(vec![probe(
            "bg",
            ExecutionContext::BackgroundThenNotifyOnUi,
            Behavior::Fail,
        )]);
        let out = invoker
            .invoke(&ToolCall::new("", "bg", json!({})))
            .await
            .unwrap();
        assert_eq!(out, json!({"error": "Probe failed: nope"}));
    }

    #[tokio::test]
    async fn events_bracket_each_call() {
        let invoker = invoker(vec![probe(
            "pinned",
            ExecutionContext::UiThreadPinned,
            Behavior::Scalar,
        )]);
        let mut rx = invoker.subscribe();
        let out = invoker
            .invoke(&ToolCall::new("call-7", "pinned", json!({})))
            .await
            .unwrap();
        assert_eq!(out, json!({"result": 42, "error": null}));

        match rx.recv().await.unwrap() {
            ToolEvent::Started { call_id, tool, .. } => {
                assert_eq!(call_id, "call-7");
                assert_eq!(tool, "Probe");
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ToolEvent::Completed {
                call_id,
                success,
                output_summary,
            } => {
                assert_eq!(call_id, "call-7");
                assert!(success);
                assert!(output_summary.contains("42"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_call_id_is_generated() {
        let invoker = invoker(vec![probe(
            "bg",
            ExecutionContext::BackgroundThenNotifyOnUi,
            Behavior::Scalar,
        )]);
        let mut rx = invoker.subscribe();
        invoker
            .invoke(&ToolCall::new("", "bg", json!({})))
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert!(uuid::Uuid::parse_str(event.id()).is_ok());
    }
}
