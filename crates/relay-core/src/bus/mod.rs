//! The pub/sub message bus — the nervous system between sessions and
//! whatever is watching them.
//!
//! Channels are arbitrary strings (`session:{id}:messages`, `:system`,
//! `:lifecycle`). A channel is created lazily the first time anyone
//! publishes or subscribes to its name; `tokio::sync::broadcast` gives
//! us at-most-once, ordered-per-channel fan-out with no persistence —
//! durability is the JSONL writer's job, not the bus's.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::error::BusError;
use crate::message::Envelope;

/// Default per-channel broadcast buffer. A slow subscriber that falls more
/// than this many messages behind starts missing the oldest ones — matches
/// the `tokio::sync::broadcast` lagged-receiver contract.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Named-channel pub/sub broker.
///
/// Replaces a fixed pair of inbound/outbound queues with a general
/// broadcast fan-out keyed by channel name, so any number of sessions
/// can each get their own `messages`/`system`/`lifecycle` channels.
pub struct MessageBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl MessageBus {
    /// Create a new bus. `capacity` bounds each channel's broadcast buffer.
    pub fn new(capacity: usize) -> Self {
        MessageBus {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    async fn get_or_create(&self, channel: &str) -> broadcast::Sender<Envelope> {
        if let Some(tx) = self.channels.read().await.get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        // Re-check: another task may have created it while we waited for the write lock.
        if let Some(tx) = channels.get(channel) {
            return tx.clone();
        }
        let (tx, _rx) = broadcast::channel(self.capacity);
        channels.insert(channel.to_string(), tx.clone());
        tx
    }

    /// Publish an envelope on a channel. Never blocks on subscriber state;
    /// "no subscribers" is reported but not treated as fatal by callers —
    /// durable recording does not depend on the bus succeeding.
    pub async fn publish(&self, channel: &str, envelope: Envelope) -> Result<(), BusError> {
        let tx = self.get_or_create(channel).await;
        match tx.send(envelope) {
            Ok(_n) => Ok(()),
            Err(_) => Err(BusError::NoSubscribers(channel.to_string())),
        }
    }

    /// Subscribe to a single channel, creating it if it doesn't exist yet.
    /// Subscribers only observe messages published after this call.
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.get_or_create(channel).await.subscribe()
    }

    /// Whether a channel currently has at least one live subscriber.
    pub async fn has_subscribers(&self, channel: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Drop a channel's sender once nobody needs it anymore. Channels with
    /// remaining subscribers stay alive even if this is called (their
    /// receivers still hold a clone).
    pub async fn close_channel(&self, channel: &str) {
        self.channels.write().await.remove(channel);
    }
}

/// Conventional channel names for a given session.
pub fn messages_channel(session_id: &str) -> String {
    format!("session:{session_id}:messages")
}

pub fn system_channel(session_id: &str) -> String {
    format!("session:{session_id}:system")
}

pub fn lifecycle_channel(session_id: &str) -> String {
    format!("session:{session_id}:lifecycle")
}

pub type SharedBus = Arc<MessageBus>;
