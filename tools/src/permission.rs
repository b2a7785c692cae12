//! Permission gate.
//!
//! A tool that requires permission names a scope. If the scope is already
//! granted for this session the call proceeds; otherwise the gate publishes a
//! [`PermissionRequest`] and suspends until someone decides it. There is no
//! timeout: the user may take as long as they like.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use steward_types::PermissionDecision;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::events::{EventBus, ToolEvent};

/// Scopes the user allowed "for this session". Never persisted.
#[derive(Debug, Default)]
pub struct SessionGrants {
    scopes: Mutex<HashSet<String>>,
}

impl SessionGrants {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: Mutex::new(scopes.into_iter().map(Into::into).collect()),
        }
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.lock().contains(scope)
    }

    /// Returns `true` if the scope was newly granted.
    pub fn grant(&self, scope: &str) -> bool {
        self.lock().insert(scope.to_string())
    }

    pub fn revoke(&self, scope: &str) -> bool {
        self.lock().remove(scope)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Granted scopes, sorted.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.lock()
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.scopes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("permission request was already decided")]
    AlreadyDecided,
    #[error("the waiting tool call is gone")]
    Abandoned,
}

/// Single-fulfillment decision slot. The first `decide` wins.
#[derive(Debug)]
pub struct DecisionSlot {
    tx: Mutex<Option<oneshot::Sender<PermissionDecision>>>,
}

impl DecisionSlot {
    fn new() -> (Self, oneshot::Receiver<PermissionDecision>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub fn decide(&self, decision: PermissionDecision) -> Result<(), DecisionError> {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DecisionError::AlreadyDecided)?;
        tx.send(decision).map_err(|_| DecisionError::Abandoned)
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// A pending request for the user to allow or deny a tool call.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    id: String,
    tool: String,
    scope: String,
    question: String,
    detail: Option<String>,
    slot: Arc<DecisionSlot>,
}

impl PermissionRequest {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name of the tool asking.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn decide(&self, decision: PermissionDecision) -> Result<(), DecisionError> {
        self.slot.decide(decision)
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.slot.is_decided()
    }
}

/// What a tool call needs from the gate.
#[derive(Debug, Clone)]
pub struct Ask<'a> {
    pub call_id: &'a str,
    pub tool: &'a str,
    pub scope: &'a str,
    pub question: String,
    pub detail: Option<String>,
}

/// Consults session grants and, when needed, asks the user.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    grants: Arc<SessionGrants>,
    events: EventBus,
    unattended: PermissionDecision,
}

impl PermissionGate {
    #[must_use]
    pub fn new(grants: Arc<SessionGrants>, events: EventBus) -> Self {
        Self {
            grants,
            events,
            unattended: PermissionDecision::Deny,
        }
    }

    /// Decision applied when nobody is subscribed to answer requests.
    #[must_use]
    pub fn with_unattended(mut self, decision: PermissionDecision) -> Self {
        self.unattended = decision;
        self
    }

    #[must_use]
    pub fn grants(&self) -> &Arc<SessionGrants> {
        &self.grants
    }

    /// Resolve a permission for one call.
    ///
    /// Suspends without a timeout until the request is decided. A slot dropped
    /// without a decision counts as `Deny`.
    pub async fn authorize(&self, ask: Ask<'_>) -> PermissionDecision {
        if self.grants.contains(ask.scope) {
            debug!(scope = ask.scope, call_id = ask.call_id, "scope already granted");
            return PermissionDecision::AllowForSession;
        }

        let (slot, rx) = DecisionSlot::new();
        let request = PermissionRequest {
            id: ask.call_id.to_string(),
            tool: ask.tool.to_string(),
            scope: ask.scope.to_string(),
            question: ask.question,
            detail: ask.detail,
            slot: Arc::new(slot),
        };

        let decision = if self.events.publish(ToolEvent::PermissionRequested(request)) == 0 {
            warn!(
                scope = ask.scope,
                decision = %self.unattended,
                "no one to answer permission request; applying unattended decision"
            );
            self.unattended
        } else {
            rx.await.unwrap_or(PermissionDecision::Deny)
        };

        if decision == PermissionDecision::AllowForSession && self.grants.grant(ask.scope) {
            info!(scope = ask.scope, "scope granted for session");
        }
        info!(scope = ask.scope, call_id = ask.call_id, %decision, "permission decided");
        decision
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use steward_types::PermissionDecision;

    use super::{Ask, DecisionError, DecisionSlot, PermissionGate, SessionGrants};
    use crate::events::{EventBus, ToolEvent};

    fn ask(scope: &str) -> Ask<'_> {
        Ask {
            call_id: "call-1",
            tool: "Edit File",
            scope,
            question: "Allow editing?".to_string(),
            detail: None,
        }
    }

    /// Answer every permission request on `bus` with `decision`.
    fn auto_answer(bus: &EventBus, decision: PermissionDecision) -> tokio::task::JoinHandle<usize> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let mut answered = 0;
            while let Ok(event) = rx.recv().await {
                if let ToolEvent::PermissionRequested(request) = event {
                    request.decide(decision).unwrap();
                    answered += 1;
                }
            }
            answered
        })
    }

    #[test]
    fn slot_rejects_second_decision() {
        let (slot, _rx) = DecisionSlot::new();
        assert!(!slot.is_decided());
        slot.decide(PermissionDecision::AllowOnce).unwrap();
        assert!(slot.is_decided());
        assert_eq!(
            slot.decide(PermissionDecision::Deny),
            Err(DecisionError::AlreadyDecided)
        );
    }

    #[test]
    fn slot_reports_abandoned_waiter() {
        let (slot, rx) = DecisionSlot::new();
        drop(rx);
        assert_eq!(
            slot.decide(PermissionDecision::AllowOnce),
            Err(DecisionError::Abandoned)
        );
    }

    #[test]
    fn grants_are_sorted_and_revocable() {
        let grants = SessionGrants::with_scopes(["movePath", "editFile"]);
        assert_eq!(grants.scopes(), vec!["editFile", "movePath"]);
        assert!(grants.revoke("editFile"));
        assert!(!grants.contains("editFile"));
        grants.clear();
        assert!(grants.scopes().is_empty());
    }

    #[tokio::test]
    async fn allow_for_session_suppresses_second_prompt() {
        let bus = EventBus::default();
        let gate = PermissionGate::new(Arc::new(SessionGrants::new()), bus.clone());
        let answers = auto_answer(&bus, PermissionDecision::AllowForSession);

        assert_eq!(gate.authorize(ask("editFile")).await, PermissionDecision::AllowForSession);
        assert_eq!(gate.authorize(ask("editFile")).await, PermissionDecision::AllowForSession);
        drop(gate);
        drop(bus);
        assert_eq!(answers.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn allow_once_prompts_every_time() {
        let bus = EventBus::default();
        let gate = PermissionGate::new(Arc::new(SessionGrants::new()), bus.clone());
        let answers = auto_answer(&bus, PermissionDecision::AllowOnce);

        assert_eq!(gate.authorize(ask("runTerminalCommand")).await, PermissionDecision::AllowOnce);
        assert_eq!(gate.authorize(ask("runTerminalCommand")).await, PermissionDecision::AllowOnce);
        assert!(!gate.grants().contains("runTerminalCommand"));
        drop(gate);
        drop(bus);
        assert_eq!(answers.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fresh_gate_prompts_again() {
        let bus = EventBus::default();
        let first = PermissionGate::new(Arc::new(SessionGrants::new()), bus.clone());
        let _answers = auto_answer(&bus, PermissionDecision::AllowForSession);
        first.authorize(ask("editFile")).await;

        let second = PermissionGate::new(Arc::new(SessionGrants::new()), EventBus::default());
        assert_eq!(second.authorize(ask("editFile")).await, PermissionDecision::Deny);
    }

    #[tokio::test]
    async fn unattended_decision_applies_without_subscribers() {
        let gate = PermissionGate::new(Arc::new(SessionGrants::new()), EventBus::default())
            .with_unattended(PermissionDecision::AllowOnce);
        assert_eq!(gate.authorize(ask("deletePath")).await, PermissionDecision::AllowOnce);
    }

    #[tokio::test]
    async fn dropped_request_counts_as_deny() {
        let bus = EventBus::default();
        let gate = PermissionGate::new(Arc::new(SessionGrants::new()), bus.clone());
        let mut rx = bus.subscribe();
        let dropper = tokio::spawn(async move {
            if let Ok(ToolEvent::PermissionRequested(request)) = rx.recv().await {
                drop(request);
            }
        });
        assert_eq!(gate.authorize(ask("editFile")).await, PermissionDecision::Deny);
        dropper.await.unwrap();
    }

    #[tokio::test]
    async fn pre_granted_scope_skips_prompt() {
        let gate = PermissionGate::new(
            Arc::new(SessionGrants::with_scopes(["editFile"])),
            EventBus::default(),
        );
        assert_eq!(gate.authorize(ask("editFile")).await, PermissionDecision::AllowForSession);
    }
}
