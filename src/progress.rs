/*!
 * Progress bus: broadcast channel of task events.
 *
 * Every subscriber sees every event, in publish order. Delivery is
 * best-effort with a bounded per-subscriber buffer; a subscriber that falls
 * more than [`SUBSCRIBER_BUFFER`] events behind loses the oldest ones and
 * keeps receiving from there. Subscribing never blocks publishers.
 */

use serde::Serialize;
use tokio::sync::broadcast;

use crate::database::models::TaskStatus;

/// Events buffered per subscriber before the oldest are dropped
pub const SUBSCRIBER_BUFFER: usize = 64;

/// One task event as pushed to observers (and over the wire as tagged JSON)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Progress percentage changed
    Progress { task_id: i64, progress: i64 },
    /// Lifecycle status changed
    Status { task_id: i64, status: TaskStatus },
    /// A task was created
    NewTask { task_id: i64 },
}

/// Single-process publish/subscribe channel for task events
pub struct ProgressBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl ProgressBus {
    /// Create a bus with the default per-subscriber buffer
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { sender }
    }

    /// Attach a new subscriber; it receives events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Publishing with no subscribers is a no-op, not an error.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}
