//! Progress events: fan-out of committed transitions to notification
//! collaborators and WebSocket clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A committed change to a creator's progression.
///
/// Published only after the store transaction commits, so subscribers never
/// see a transition that was rolled back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    CreatorInitialized {
        creator_id: String,
        rows: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        available: Option<String>,
    },
    MilestoneStarted {
        creator_id: String,
        milestone_id: String,
        actor: String,
    },
    MilestoneSubmitted {
        creator_id: String,
        milestone_id: String,
        actor: String,
    },
    MilestoneCompleted {
        creator_id: String,
        milestone_id: String,
        actor: String,
    },
    MilestoneUnlocked {
        creator_id: String,
        milestone_id: String,
        title: String,
        phase_id: String,
        requires_team_action: bool,
    },
    MilestoneReopened {
        creator_id: String,
        milestone_id: String,
        actor: String,
    },
    OptionalityChanged {
        creator_id: String,
        milestone_ids: Vec<String>,
        is_optional: bool,
        actor: String,
    },
    ProgressionRepaired {
        creator_id: String,
        backfilled: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unlocked: Option<String>,
    },
}

impl ProgressEvent {
    pub fn creator_id(&self) -> &str {
        match self {
            Self::CreatorInitialized { creator_id, .. }
            | Self::MilestoneStarted { creator_id, .. }
            | Self::MilestoneSubmitted { creator_id, .. }
            | Self::MilestoneCompleted { creator_id, .. }
            | Self::MilestoneUnlocked { creator_id, .. }
            | Self::MilestoneReopened { creator_id, .. }
            | Self::OptionalityChanged { creator_id, .. }
            | Self::ProgressionRepaired { creator_id, .. } => creator_id,
        }
    }
}

/// Broadcast sender wrapper; sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn publish_all(&self, events: Vec<ProgressEvent>) {
        for event in events {
            // Err only means nobody is listening
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
