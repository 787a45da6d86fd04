//! Notifications emitted to presentation and connection layers.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::probe::ProbeTarget;
use crate::servers::{Latency, Scope};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TopologyEvent {
    NodesLoaded { count: usize },
    HubsLoaded { count: usize },
    /// Both directories are non-empty.
    ServerListsLoaded,
    PingUpdated { target: ProbeTarget, latency: Latency },
    ProbingComplete,
    JumpRequested { scope: Scope, id: usize },
}

impl TopologyEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Fan-out to any number of subscribers. Closed receivers are pruned on
/// the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<TopologyEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TopologyEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: TopologyEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
