//! Answers permission requests raised on the event bus.

use clap::ValueEnum;
use dialoguer::Select;
use steward_tools::{PermissionRequest, ToolEvent};
use steward_types::PermissionDecision;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum DecideMode {
    /// Prompt on the terminal
    Ask,
    Deny,
    Once,
    Session,
}

impl DecideMode {
    fn fixed(self) -> Option<PermissionDecision> {
        match self {
            DecideMode::Ask => None,
            DecideMode::Deny => Some(PermissionDecision::Deny),
            DecideMode::Once => Some(PermissionDecision::AllowOnce),
            DecideMode::Session => Some(PermissionDecision::AllowForSession),
        }
    }
}

const CHOICES: [(&str, PermissionDecision); 3] = [
    ("Deny", PermissionDecision::Deny),
    ("Allow once", PermissionDecision::AllowOnce),
    ("Allow for this session", PermissionDecision::AllowForSession),
];

/// Follow the event stream: log tool activity and decide every request.
pub(crate) fn spawn_responder(
    mut rx: broadcast::Receiver<ToolEvent>,
    mode: DecideMode,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ToolEvent::PermissionRequested(request)) => {
                    let decision = match mode.fixed() {
                        Some(decision) => decision,
                        None => ask(request.clone()).await,
                    };
                    if let Err(e) = request.decide(decision) {
                        warn!(id = request.id(), error = %e, "permission decision not delivered");
                    }
                }
                Ok(ToolEvent::Started {
                    call_id,
                    tool,
                    detail,
                }) => {
                    info!(call_id = %call_id, tool = %tool, detail = detail.as_deref().unwrap_or(""), "tool started");
                }
                Ok(ToolEvent::Completed {
                    call_id,
                    success,
                    output_summary,
                }) => {
                    info!(call_id = %call_id, success, summary = %output_summary, "tool completed");
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn ask(request: PermissionRequest) -> PermissionDecision {
    let prompt = match request.detail() {
        Some(detail) => format!("{} [{detail}]", request.question()),
        None => request.question().to_string(),
    };
    let labels: Vec<&str> = CHOICES.iter().map(|(label, _)| *label).collect();
    let answer = tokio::task::spawn_blocking(move || {
        Select::new()
            .with_prompt(prompt)
            .items(&labels)
            .default(0)
            .interact_opt()
    })
    .await;

    match answer {
        Ok(Ok(Some(index))) => CHOICES
            .get(index)
            .map_or(PermissionDecision::Deny, |(_, decision)| *decision),
        Ok(Ok(None)) => PermissionDecision::Deny,
        Ok(Err(e)) => {
            warn!(error = %e, scope = request.scope(), "permission prompt failed; denying");
            PermissionDecision::Deny
        }
        Err(e) => {
            warn!(error = %e, scope = request.scope(), "permission prompt task failed; denying");
            PermissionDecision::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use steward_types::PermissionDecision;

    use super::DecideMode;

    #[test]
    fn fixed_modes_map_to_decisions() {
        assert_eq!(DecideMode::Ask.fixed(), None);
        assert_eq!(DecideMode::Deny.fixed(), Some(PermissionDecision::Deny));
        assert_eq!(DecideMode::Once.fixed(), Some(PermissionDecision::AllowOnce));
        assert_eq!(
            DecideMode::Session.fixed(),
            Some(PermissionDecision::AllowForSession)
        );
    }
}
