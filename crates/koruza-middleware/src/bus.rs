//! Process-wide publish/subscribe message bus.
//!
//! Uses [`tokio::sync::broadcast`] channels so that every subscriber receives
//! every message without any single subscriber blocking the others.
//!
//! # Lanes
//!
//! Every publication is sent on two independent [`Lane`]s:
//!
//! | Lane | Exposed to |
//! |---|---|
//! | [`Lane::Local`] | same-host consumers (loopback publish socket) |
//! | [`Lane::Remote`] | network consumers (all-interfaces publish socket) |
//!
//! The remote lane mirrors the local one; they only differ in who listens.
//! `MessageBus` is `Send + Sync`, so the slow loop publishes through a clone
//! without touching anything else the fast loop owns.

use koruza_types::{Message, Topic};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of buffered messages before slow subscribers lag.
const DEFAULT_CAPACITY: usize = 256;

/// One of the two publish lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Local,
    Remote,
}

/// Shared message bus. Clone it cheaply – all clones share the same
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct MessageBus {
    local: broadcast::Sender<Message>,
    remote: broadcast::Sender<Message>,
}

impl MessageBus {
    /// Create a bus whose lanes each buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (local, _) = broadcast::channel(capacity);
        let (remote, _) = broadcast::channel(capacity);
        Self { local, remote }
    }

    /// Publish `message` on both lanes.
    ///
    /// Returns the total number of subscribers handed the message.  Having
    /// no subscribers is a normal condition: the message is simply dropped.
    pub fn send(&self, message: Message) -> usize {
        let local = self.local.send(message.clone()).unwrap_or(0);
        let remote = self.remote.send(message).unwrap_or(0);
        local + remote
    }

    /// Serialize `payload` and publish it under `topic`.
    ///
    /// A payload that fails to serialize is logged and dropped.
    pub fn publish<T: Serialize>(&self, topic: Topic, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(value) => {
                debug!(%topic, "publish");
                self.send(Message::new(topic, value))
            }
            Err(e) => {
                warn!(%topic, error = %e, "dropping unserializable payload");
                0
            }
        }
    }

    /// Subscribe to one lane.
    pub fn subscribe(&self, lane: Lane) -> LaneReceiver {
        LaneReceiver {
            lane,
            receiver: self.sender(lane).subscribe(),
        }
    }

    fn sender(&self, lane: Lane) -> &broadcast::Sender<Message> {
        match lane {
            Lane::Local => &self.local,
            Lane::Remote => &self.remote,
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Lane`].
pub struct LaneReceiver {
    lane: Lane,
    receiver: broadcast::Receiver<Message>,
}

impl LaneReceiver {
    /// Wait for the next message, skipping over any dropped while lagging.
    ///
    /// Returns `None` once every bus clone has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lane = ?self.lane, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_both_lanes() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MessageBus::default();
        let mut local = bus.subscribe(Lane::Local);
        let mut remote = bus.subscribe(Lane::Remote);

        let delivered = bus.publish(Topic::Status, &json!({"type": "motors", "next_x": 5}));
        assert_eq!(delivered, 2);

        let a = local.recv().await.ok_or("local lane closed")?;
        let b = remote.recv().await.ok_or("remote lane closed")?;
        assert_eq!(a, b);
        assert_eq!(a.topic, Topic::Status);
        assert_eq!(a.payload["next_x"], 5);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = MessageBus::default();
        assert_eq!(bus.publish(Topic::Process, &json!({"type": "watchdog"})), 0);
    }

    #[test]
    fn published_frame_splits_back_into_topic_and_payload() {
        let bus = MessageBus::default();
        let mut local = bus.subscribe(Lane::Local);
        let payload = json!({"type": "sfp", "rx_power_db": -3.2, "model": "x@y"});
        bus.publish(Topic::Status, &payload);

        let frame = local.try_recv().unwrap().to_frame();
        let (topic, json) = frame.split_once('@').unwrap();
        assert_eq!(topic, "status");
        assert_eq!(serde_json::from_str::<serde_json::Value>(json).unwrap(), payload);
    }

    #[tokio::test]
    async fn slow_subscriber_skips_lagged_messages() {
        let bus = MessageBus::new(4);
        let mut slow = bus.subscribe(Lane::Remote);
        for i in 0..16 {
            bus.publish(Topic::Status, &json!({"type": "motors", "seq": i}));
        }
        let next = slow.recv().await.unwrap();
        assert_eq!(next.payload["seq"], 12);
    }

    #[test]
    fn try_recv_on_empty_lane_is_none() {
        let bus = MessageBus::default();
        let mut rx = bus.subscribe(Lane::Local);
        assert!(rx.try_recv().is_none());
        assert_eq!(rx.lane(), Lane::Local);
    }
}
