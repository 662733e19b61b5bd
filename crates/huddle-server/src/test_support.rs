//! Fakes shared by unit tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use huddle_core::{
    ConversationId, ConversationRef, Message, OutboundEvent, Principal, PrincipalId, RoomId,
    SubscriberId,
};
use huddle_store::{
    BlockingPool, ConnectionConfig, PersistenceGateway, Result as StoreResult, StoreError,
    new_file, run_migrations,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bus::{BusError, LocalBus, MembershipBus};
use crate::websocket::connection::ClientConnection;

/// The conversation every fake gateway knows about.
pub const CONVERSATION: ConversationId = ConversationId::new(7);

/// A connection for `principal` with an outbound queue of `capacity`.
pub fn connection(
    principal: i64,
    capacity: usize,
) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = ClientConnection::new(SubscriberId::new(), PrincipalId::new(principal), tx);
    (Arc::new(conn), rx)
}

/// Everything currently queued on `rx`, parsed as JSON.
pub fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(serde_json::from_str(&frame).unwrap());
    }
    out
}

/// A migrated file-backed store in `dir`.
pub fn file_pool(dir: &tempfile::TempDir) -> BlockingPool {
    let path = dir.path().join("huddle.db");
    let pool = new_file(path.to_str().unwrap(), &ConnectionConfig::default()).unwrap();
    let _ = run_migrations(&pool.get().unwrap()).unwrap();
    BlockingPool::new(pool)
}

/// Shared, ordered record of gateway and bus calls.
pub type OpLog = Arc<Mutex<Vec<String>>>;

/// In-memory gateway. Users get IDs 1.. in the order given.
pub struct FakeGateway {
    users: BTreeMap<PrincipalId, Principal>,
    next_message: AtomicI64,
    /// Delay applied inside `append_message` before it records success.
    pub append_delay: Mutex<Option<Duration>>,
    /// Make every `append_message` fail.
    pub fail_writes: AtomicBool,
    /// Calls made so far.
    pub log: OpLog,
}

impl FakeGateway {
    pub fn with_users(names: &[&str]) -> Self {
        let users = names
            .iter()
            .zip(1..)
            .map(|(name, id)| (PrincipalId::new(id), Principal::new(PrincipalId::new(id), *name)))
            .collect();
        Self {
            users,
            next_message: AtomicI64::new(1),
            append_delay: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            log: OpLog::default(),
        }
    }

    pub fn principal(&self, id: i64) -> Principal {
        self.users[&PrincipalId::new(id)].clone()
    }
}

#[async_trait]
impl PersistenceGateway for FakeGateway {
    async fn resolve_principal(&self, id: PrincipalId) -> StoreResult<Principal> {
        self.users
            .get(&id)
            .cloned()
            .ok_or(StoreError::PrincipalNotFound(id))
    }

    async fn resolve_principals(&self, ids: Vec<PrincipalId>) -> StoreResult<Vec<Principal>> {
        let mut found: Vec<Principal> = ids.iter().filter_map(|id| self.users.get(id).cloned()).collect();
        found.sort_by_key(|p| p.id);
        Ok(found)
    }

    async fn resolve_conversation(&self, id: ConversationId) -> StoreResult<ConversationRef> {
        if id == CONVERSATION {
            Ok(ConversationRef {
                id,
                created_at: Utc::now(),
            })
        } else {
            Err(StoreError::ConversationNotFound(id))
        }
    }

    async fn append_message(
        &self,
        conversation: &ConversationRef,
        sender: &Principal,
        content: &str,
    ) -> StoreResult<Message> {
        let delay = *self.append_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            self.log.lock().push(format!("append_failed:{content}"));
            return Err(StoreError::Write("disk full".into()));
        }
        self.log.lock().push(format!("append:{content}"));
        Ok(Message {
            id: self.next_message.fetch_add(1, Ordering::SeqCst),
            conversation_id: conversation.id,
            sender: sender.id,
            content: content.to_owned(),
            timestamp: Utc::now(),
        })
    }
}

/// Local bus that records every publish into an [`OpLog`].
pub struct RecordingBus {
    inner: LocalBus,
    /// Make every `publish` fail.
    pub fail_publish: AtomicBool,
    /// Calls made so far.
    pub log: OpLog,
}

impl RecordingBus {
    pub fn new(log: OpLog) -> Self {
        Self {
            inner: LocalBus::new(),
            fail_publish: AtomicBool::new(false),
            log,
        }
    }

    /// Recorded publishes, oldest first.
    pub fn published(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|op| op.starts_with("publish:"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MembershipBus for RecordingBus {
    async fn join(&self, room: &RoomId, subscriber: Arc<ClientConnection>) -> Result<(), BusError> {
        self.inner.join(room, subscriber).await
    }

    async fn leave(&self, room: &RoomId, subscriber: &SubscriberId) {
        self.inner.leave(room, subscriber).await;
    }

    async fn publish(&self, room: &RoomId, event: &OutboundEvent) -> Result<(), BusError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::Transport("bus down".into()));
        }
        self.log.lock().push(format!("publish:{}", event.to_json()?));
        self.inner.publish(room, event).await
    }

    fn room_count(&self) -> usize {
        self.inner.room_count()
    }
}
