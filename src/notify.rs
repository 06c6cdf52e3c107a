use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceKey};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub: booking events fanned out per resource.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<ResourceKey, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for a resource. Creates the channel if needed.
    pub fn subscribe(&self, resource: &ResourceKey) -> broadcast::Receiver<Event> {
        self.channels
            .entry(resource.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, resource: &ResourceKey, event: &Event) {
        if let Some(sender) = self.channels.get(resource) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels nobody listens to any more.
    pub fn prune(&self) {
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}
