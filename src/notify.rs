//! In-process event fan-out for subscription actions.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SubscriptionEvent {
    CancelToggled {
        user_id: Uuid,
        merchant: String,
        cancelled: bool,
    },
}

/// Broadcast hub. Publishing with no listeners is not an error; events are
/// advisory and a slow subscriber only loses its own backlog.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<SubscriptionEvent>,
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SubscriptionEvent) {
        debug!(?event, "Publishing subscription event");
        let _ = self.sender.send(event);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
