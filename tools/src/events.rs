//! Tool lifecycle events.
//!
//! Publishing never blocks and never requires a subscriber. A subscriber that
//! falls too far behind misses events (`RecvError::Lagged`).

use tokio::sync::broadcast;

use crate::permission::PermissionRequest;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum ToolEvent {
    Started {
        call_id: String,
        /// Display name of the tool.
        tool: String,
        detail: Option<String>,
    },
    /// A tool call is suspended until the request's slot is decided.
    PermissionRequested(PermissionRequest),
    Completed {
        call_id: String,
        success: bool,
        /// Short, truncated rendering of the result or error.
        output_summary: String,
    },
}

impl ToolEvent {
    /// Call or request id this event belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Started { call_id, .. } | Self::Completed { call_id, .. } => call_id,
            Self::PermissionRequested(request) => request.id(),
        }
    }
}

/// Broadcast channel for [`ToolEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ToolEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ToolEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: ToolEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
