//! In-process membership bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_core::{OutboundEvent, RoomId, SubscriberId};
use metrics::counter;
use tracing::{debug, warn};

use super::{BusError, MembershipBus};
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::websocket::connection::ClientConnection;

/// A joined connection plus the last log position it must not see.
struct Subscription {
    connection: Arc<ClientConnection>,
    watermark: i64,
}

/// Process-local fan-out, keyed by room.
///
/// Subscriptions carry a watermark so the relay can hold back log records
/// published before the join. Direct [`MembershipBus::publish`] calls deliver
/// to every current subscriber.
#[derive(Default)]
pub struct LocalBus {
    rooms: DashMap<RoomId, HashMap<SubscriberId, Subscription>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `room`, ignoring log records with
    /// `seq <= watermark`.
    pub fn subscribe(&self, room: &RoomId, connection: Arc<ClientConnection>, watermark: i64) {
        let id = connection.id.clone();
        let _ = self.rooms.entry(room.clone()).or_default().insert(
            id,
            Subscription {
                connection,
                watermark,
            },
        );
    }

    /// Remove a subscription. Returns whether it existed. Empty rooms are
    /// pruned.
    pub fn unsubscribe(&self, room: &RoomId, id: &SubscriberId) -> bool {
        let removed = self
            .rooms
            .get_mut(room)
            .is_some_and(|mut subs| subs.remove(id).is_some());
        let _ = self.rooms.remove_if(room, |_, subs| subs.is_empty());
        removed
    }

    /// Deliver a payload to every subscriber of `room`. Returns the number
    /// of subscribers the frame was queued for.
    pub fn deliver(&self, room: &RoomId, payload: &Arc<String>) -> usize {
        self.deliver_filtered(room, payload, |_| true)
    }

    /// Deliver a log record to subscribers that joined before `seq`.
    pub fn deliver_record(&self, room: &RoomId, seq: i64, payload: &Arc<String>) -> usize {
        self.deliver_filtered(room, payload, |sub| seq > sub.watermark)
    }

    fn deliver_filtered(
        &self,
        room: &RoomId,
        payload: &Arc<String>,
        wanted: impl Fn(&Subscription) -> bool,
    ) -> usize {
        let Some(subs) = self.rooms.get(room) else {
            return 0;
        };
        let mut delivered = 0;
        for sub in subs.values().filter(|s| wanted(s)) {
            if sub.connection.send(Arc::clone(payload)) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(
                    room = %room,
                    subscriber_id = %sub.connection.id,
                    dropped = sub.connection.drop_count(),
                    "outbound queue full or closed, frame dropped"
                );
            }
        }
        delivered
    }

    /// Number of subscribers in `room`.
    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, |subs| subs.len())
    }
}

#[async_trait]
impl MembershipBus for LocalBus {
    async fn join(&self, room: &RoomId, subscriber: Arc<ClientConnection>) -> Result<(), BusError> {
        debug!(room = %room, subscriber_id = %subscriber.id, "joined room");
        self.subscribe(room, subscriber, 0);
        Ok(())
    }

    async fn leave(&self, room: &RoomId, subscriber: &SubscriberId) {
        if self.unsubscribe(room, subscriber) {
            debug!(room = %room, subscriber_id = %subscriber, "left room");
        }
    }

    async fn publish(&self, room: &RoomId, event: &OutboundEvent) -> Result<(), BusError> {
        let payload = Arc::new(event.to_json()?);
        let recipients = self.deliver(room, &payload);
        debug!(room = %room, kind = event.kind(), recipients, "published");
        Ok(())
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection, drain};
    use huddle_core::{ConversationId, Principal, PrincipalId};

    fn room(n: i64) -> RoomId {
        RoomId::for_conversation(ConversationId::new(n))
    }

    fn typing(n: i64) -> OutboundEvent {
        OutboundEvent::Typing {
            user: Principal::new(PrincipalId::new(n), format!("user{n}")),
            receiver: PrincipalId::new(0),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_member() {
        let bus = LocalBus::new();
        let (a, mut rx_a) = connection(1, 8);
        let (b, mut rx_b) = connection(2, 8);
        bus.join(&room(7), a).await.unwrap();
        bus.join(&room(7), b).await.unwrap();

        bus.publish(&room(7), &typing(1)).await.unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let bus = LocalBus::new();
        let (a, mut rx_a) = connection(1, 8);
        let (b, mut rx_b) = connection(2, 8);
        bus.join(&room(1), a).await.unwrap();
        bus.join(&room(2), b).await.unwrap();

        bus.publish(&room(1), &typing(1)).await.unwrap();
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn late_joiner_gets_no_replay() {
        let bus = LocalBus::new();
        let (a, _rx_a) = connection(1, 8);
        bus.join(&room(1), a).await.unwrap();
        bus.publish(&room(1), &typing(1)).await.unwrap();

        let (b, mut rx_b) = connection(2, 8);
        bus.join(&room(1), b).await.unwrap();
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn publisher_order_is_preserved() {
        let bus = LocalBus::new();
        let (a, mut rx) = connection(1, 16);
        bus.join(&room(1), a).await.unwrap();
        for n in 0..10 {
            bus.publish(&room(1), &typing(n)).await.unwrap();
        }
        let users: Vec<i64> = drain(&mut rx)
            .iter()
            .map(|v| v["user"]["id"].as_i64().unwrap())
            .collect();
        assert_eq!(users, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_prunes() {
        let bus = LocalBus::new();
        let (a, _rx) = connection(1, 8);
        let id = a.id.clone();
        bus.join(&room(1), a).await.unwrap();
        assert_eq!(bus.room_count(), 1);

        bus.leave(&room(1), &id).await;
        bus.leave(&room(1), &id).await;
        bus.leave(&room(9), &id).await;
        assert_eq!(bus.room_count(), 0);
        assert_eq!(bus.subscriber_count(&room(1)), 0);
    }

    #[tokio::test]
    async fn full_queue_does_not_block_others() {
        let bus = LocalBus::new();
        let (slow, _rx_slow) = connection(1, 1);
        let (fast, mut rx_fast) = connection(2, 8);
        let slow_ref = Arc::clone(&slow);
        bus.join(&room(1), slow).await.unwrap();
        bus.join(&room(1), fast).await.unwrap();

        for n in 0..3 {
            bus.publish(&room(1), &typing(n)).await.unwrap();
        }
        assert_eq!(drain(&mut rx_fast).len(), 3);
        assert_eq!(slow_ref.drop_count(), 2);
    }

    #[test]
    fn records_respect_watermark() {
        let bus = LocalBus::new();
        let (old, mut rx_old) = connection(1, 8);
        let (new, mut rx_new) = connection(2, 8);
        bus.subscribe(&room(1), old, 0);
        bus.subscribe(&room(1), new, 5);

        let payload = Arc::new(r#"{"n":1}"#.to_owned());
        assert_eq!(bus.deliver_record(&room(1), 5, &payload), 1);
        assert_eq!(bus.deliver_record(&room(1), 6, &payload), 2);
        assert_eq!(drain(&mut rx_old).len(), 2);
        assert_eq!(drain(&mut rx_new).len(), 1);
    }
}
