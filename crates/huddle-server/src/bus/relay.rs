//! Cross-process membership bus over the shared store.
//!
//! `publish` appends the serialized event to the `bus_events` log. Each
//! process runs one relay task that tails the log past its cursor and hands
//! every record to its [`LocalBus`], which delivers only to subscribers whose
//! join watermark is below the record's sequence number.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use huddle_core::{InstanceId, OutboundEvent, RoomId, SubscriberId};
use huddle_store::{BlockingPool, BusLogRepo, StoreError};
use metrics::counter;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BusError, LocalBus, MembershipBus};
use crate::metrics::BUS_RELAY_RECORDS_TOTAL;
use crate::websocket::connection::ClientConnection;

/// Records fetched per relay read.
const RELAY_BATCH: u32 = 256;

impl From<StoreError> for BusError {
    fn from(e: StoreError) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Membership bus shared by every process attached to the same store.
pub struct RelayBus {
    local: LocalBus,
    pool: BlockingPool,
    instance: InstanceId,
    wake: Notify,
}

impl RelayBus {
    /// Create a relay bus publishing as `instance`.
    pub fn new(pool: BlockingPool, instance: InstanceId) -> Self {
        Self {
            local: LocalBus::new(),
            pool,
            instance,
            wake: Notify::new(),
        }
    }

    /// The local delivery stage.
    pub fn local(&self) -> &LocalBus {
        &self.local
    }

    /// Current end of the log.
    pub async fn head(&self) -> Result<i64, BusError> {
        Ok(self.pool.run(|conn| BusLogRepo::max_seq(conn)).await?)
    }

    /// Deliver every record after `cursor` to local subscribers.
    ///
    /// Returns the new cursor.
    pub async fn pump(&self, mut cursor: i64) -> Result<i64, BusError> {
        loop {
            let after = cursor;
            let batch = self
                .pool
                .run(move |conn| BusLogRepo::read_after(conn, after, RELAY_BATCH))
                .await?;
            let full = batch.len() == RELAY_BATCH as usize;
            for record in batch {
                let payload = Arc::new(record.payload);
                let recipients = self.local.deliver_record(&record.room, record.seq, &payload);
                counter!(BUS_RELAY_RECORDS_TOTAL).increment(1);
                debug!(
                    seq = record.seq,
                    room = %record.room,
                    origin = %record.origin,
                    recipients,
                    "relayed"
                );
                cursor = record.seq;
            }
            if !full {
                return Ok(cursor);
            }
        }
    }

    /// Start the relay task.
    ///
    /// The cursor is read before this returns, so anything published after
    /// `start` is relayed.
    pub async fn start(
        self: &Arc<Self>,
        poll: Duration,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError> {
        let cursor = self.head().await?;
        info!(instance_id = %self.instance, cursor, "bus relay started");
        let bus = Arc::clone(self);
        Ok(tokio::spawn(async move { bus.relay_loop(cursor, poll, token).await }))
    }

    async fn relay_loop(&self, mut cursor: i64, poll: Duration, token: CancellationToken) {
        let mut tick = tokio::time::interval(poll);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = tick.tick() => {}
                () = self.wake.notified() => {}
            }
            match self.pump(cursor).await {
                Ok(next) => cursor = next,
                Err(e) => warn!(error = %e, cursor, "bus relay read failed"),
            }
        }
        info!(instance_id = %self.instance, cursor, "bus relay stopped");
    }
}

#[async_trait]
impl MembershipBus for RelayBus {
    async fn join(&self, room: &RoomId, subscriber: Arc<ClientConnection>) -> Result<(), BusError> {
        let watermark = self.head().await?;
        debug!(room = %room, subscriber_id = %subscriber.id, watermark, "joined room");
        self.local.subscribe(room, subscriber, watermark);
        Ok(())
    }

    async fn leave(&self, room: &RoomId, subscriber: &SubscriberId) {
        if self.local.unsubscribe(room, subscriber) {
            debug!(room = %room, subscriber_id = %subscriber, "left room");
        }
    }

    async fn publish(&self, room: &RoomId, event: &OutboundEvent) -> Result<(), BusError> {
        let payload = event.to_json()?;
        let room_key = room.clone();
        let origin = self.instance.clone();
        let seq = self
            .pool
            .run(move |conn| BusLogRepo::append(conn, &room_key, &origin, &payload))
            .await?;
        debug!(room = %room, kind = event.kind(), seq, "published to bus log");
        self.wake.notify_one();
        Ok(())
    }

    fn room_count(&self) -> usize {
        self.local.room_count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connection, drain, file_pool};
    use assert_matches::assert_matches;
    use huddle_core::{ConversationId, Principal, PrincipalId};

    fn room() -> RoomId {
        RoomId::for_conversation(ConversationId::new(7))
    }

    fn typing(n: i64) -> OutboundEvent {
        OutboundEvent::Typing {
            user: Principal::new(PrincipalId::new(n), format!("user{n}")),
            receiver: PrincipalId::new(0),
        }
    }

    #[tokio::test]
    async fn pump_delivers_published_events() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RelayBus::new(file_pool(&dir), InstanceId::from("i-a"));
        let (a, mut rx) = connection(1, 8);
        bus.join(&room(), a).await.unwrap();

        bus.publish(&room(), &typing(1)).await.unwrap();
        bus.publish(&room(), &typing(2)).await.unwrap();
        let cursor = bus.pump(0).await.unwrap();
        assert!(cursor > 0);

        let users: Vec<i64> = drain(&mut rx)
            .iter()
            .map(|v| v["user"]["id"].as_i64().unwrap())
            .collect();
        assert_eq!(users, [1, 2]);
    }

    #[tokio::test]
    async fn events_before_join_are_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RelayBus::new(file_pool(&dir), InstanceId::from("i-a"));
        bus.publish(&room(), &typing(1)).await.unwrap();

        let (late, mut rx) = connection(2, 8);
        bus.join(&room(), late).await.unwrap();
        bus.publish(&room(), &typing(2)).await.unwrap();

        let _ = bus.pump(0).await.unwrap();
        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["user"]["id"], 2);
    }

    #[tokio::test]
    async fn two_instances_share_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let a = Arc::new(RelayBus::new(file_pool(&dir), InstanceId::from("i-a")));
        let b = Arc::new(RelayBus::new(file_pool(&dir), InstanceId::from("i-b")));
        let token = CancellationToken::new();
        let relay_b = b.start(Duration::from_millis(10), token.clone()).await.unwrap();

        let (sub, mut rx) = connection(1, 8);
        b.join(&room(), sub).await.unwrap();
        for n in 0..5 {
            a.publish(&room(), &typing(n)).await.unwrap();
        }

        let mut got = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while got.len() < 5 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
            got.extend(drain(&mut rx));
        }
        let users: Vec<i64> = got.iter().map(|v| v["user"]["id"].as_i64().unwrap()).collect();
        assert_eq!(users, (0..5).collect::<Vec<_>>());

        token.cancel();
        relay_b.await.unwrap();
    }

    #[tokio::test]
    async fn closed_store_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = file_pool(&dir);
        let bus = RelayBus::new(pool.clone(), InstanceId::from("i-a"));
        pool.close();

        let (a, _rx) = connection(1, 8);
        assert_matches!(bus.join(&room(), a).await, Err(BusError::Transport(_)));
        assert_matches!(
            bus.publish(&room(), &typing(1)).await,
            Err(BusError::Transport(_))
        );
    }
}
