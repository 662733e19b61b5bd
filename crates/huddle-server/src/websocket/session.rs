//! `WebSocket` session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use huddle_auth::{AuthError, CredentialVerifier};
use huddle_core::{ConversationId, Principal, SubscriberId};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::{Dispatched, SessionScope, handle_frame};
use crate::bus::BusError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_HANDSHAKE_REJECTIONS_TOTAL,
};
use crate::presence::{PresenceChange, broadcast_online_status};
use crate::services::ChatServices;

/// How long teardown waits for the writer to flush its close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Where a session is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Upgraded, token not yet checked.
    Connecting,
    /// Principal known, not yet in the room.
    Authenticated,
    /// Subscribed to the room; frames are dispatched.
    Joined,
    /// Teardown in progress.
    Closing,
    /// Done.
    Closed,
}

/// Everything a session needs from the server.
#[derive(Clone)]
pub struct SessionContext {
    /// Token check.
    pub verifier: Arc<dyn CredentialVerifier>,
    /// Gateway, bus, presence.
    pub services: ChatServices,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Silence allowed before the client is dropped.
    pub heartbeat_timeout: Duration,
    /// Per-connection outbound queue capacity.
    pub outbound_queue: usize,
    /// Server-wide shutdown signal.
    pub shutdown: CancellationToken,
    /// Live joined sessions.
    pub active: Arc<AtomicUsize>,
}

/// One authenticated connection's room membership.
///
/// [`ChatSession::close`] runs teardown exactly once however many times it
/// is called, and only unregisters presence that was actually registered.
pub struct ChatSession {
    scope: SessionScope,
    connection: Arc<ClientConnection>,
    services: ChatServices,
    state: Mutex<SessionState>,
    joined: AtomicBool,
    registered: AtomicBool,
    closed: AtomicBool,
}

impl ChatSession {
    /// A session for an authenticated principal.
    pub fn new(scope: SessionScope, connection: Arc<ClientConnection>, services: ChatServices) -> Self {
        Self {
            scope,
            connection,
            services,
            state: Mutex::new(SessionState::Authenticated),
            joined: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Room and principal.
    pub fn scope(&self) -> &SessionScope {
        &self.scope
    }

    fn transition(&self, next: SessionState) {
        let prev = std::mem::replace(&mut *self.state.lock(), next);
        debug!(
            subscriber_id = %self.connection.id,
            from = ?prev,
            to = ?next,
            "session state"
        );
    }

    /// Join the room, register presence, and broadcast the new online set.
    ///
    /// Only a bus failure is an error; a presence failure is logged and the
    /// session stays joined without a presence entry.
    pub async fn join(&self) -> Result<(), BusError> {
        let room = &self.scope.room;
        self.services
            .bus
            .join(room, Arc::clone(&self.connection))
            .await?;
        self.joined.store(true, Ordering::SeqCst);
        self.transition(SessionState::Joined);

        match self
            .services
            .presence
            .register(room, self.scope.principal.id)
            .await
        {
            Ok(online) => {
                self.registered.store(true, Ordering::SeqCst);
                debug!(room = %room, online = online.len(), "presence registered");
                broadcast_online_status(
                    room,
                    self.services.presence.as_ref(),
                    self.services.gateway.as_ref(),
                    self.services.bus.as_ref(),
                )
                .await;
            }
            Err(e) => warn!(room = %room, error = %e, "presence register failed"),
        }
        Ok(())
    }

    /// Dispatch one inbound text frame.
    pub async fn dispatch(&self, text: &str) -> Dispatched {
        handle_frame(text, &self.scope, &self.services).await
    }

    /// Tear down: unregister, re-broadcast presence unless the room emptied,
    /// leave the bus. Returns `false` if teardown already ran.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.transition(SessionState::Closing);
        let room = &self.scope.room;

        if self.registered.swap(false, Ordering::SeqCst) {
            match self
                .services
                .presence
                .unregister(room, self.scope.principal.id)
                .await
            {
                Ok(PresenceChange::Updated(online)) => {
                    debug!(room = %room, online = online.len(), "presence unregistered");
                    broadcast_online_status(
                        room,
                        self.services.presence.as_ref(),
                        self.services.gateway.as_ref(),
                        self.services.bus.as_ref(),
                    )
                    .await;
                }
                Ok(PresenceChange::RoomNowEmpty) => debug!(room = %room, "room now empty"),
                Err(e) => warn!(room = %room, error = %e, "presence unregister failed"),
            }
        }

        if self.joined.swap(false, Ordering::SeqCst) {
            self.services.bus.leave(room, &self.connection.id).await;
        }
        self.transition(SessionState::Closed);
        true
    }
}

/// Run a `WebSocket` session for a connected client.
///
/// 1. Verifies the token; a failure closes with the auth error's code
/// 2. Joins the room and broadcasts presence
/// 3. Dispatches inbound frames one at a time
/// 4. Forwards outbound frames and sends periodic Pings from a writer task
/// 5. Tears down once on close, error, heartbeat timeout, or shutdown
#[instrument(skip_all, fields(conversation_id = %conversation_id))]
pub async fn run_ws_session(
    mut ws: WebSocket,
    conversation_id: ConversationId,
    token: Option<String>,
    ctx: SessionContext,
) {
    let principal = match authenticate(token.as_deref(), &ctx).await {
        Ok(principal) => {
            debug!(from = ?SessionState::Connecting, to = ?SessionState::Authenticated, "session state");
            principal
        }
        Err((code, reason)) => {
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => reason).increment(1);
            info!(code, reason, "handshake rejected");
            debug!(from = ?SessionState::Connecting, to = ?SessionState::Closed, "session state");
            close_with(&mut ws, code, reason).await;
            return;
        }
    };

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(ctx.outbound_queue);
    let connection = Arc::new(ClientConnection::new(
        SubscriberId::new(),
        principal.id,
        send_tx,
    ));
    let session = ChatSession::new(
        SessionScope::new(principal, conversation_id),
        Arc::clone(&connection),
        ctx.services.clone(),
    );
    let principal_id = session.scope().principal.id;
    let subscriber_id = connection.id.clone();

    if let Err(e) = session.join().await {
        warn!(%principal_id, error = %e, "bus join failed");
        counter!(WS_HANDSHAKE_REJECTIONS_TOTAL, "reason" => "bus_unavailable").increment(1);
        let _ = session.close().await;
        close_with(&mut ws, close_code::ERROR, "bus unavailable").await;
        return;
    }

    info!(%principal_id, %subscriber_id, "client joined");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    let _ = ctx.active.fetch_add(1, Ordering::SeqCst);

    let (ws_tx, mut ws_rx) = ws.split();
    let stop = ctx.shutdown.child_token();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
        stop.clone(),
        ctx.shutdown.clone(),
    ));

    loop {
        let next = tokio::select! {
            () = stop.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "socket error");
                break;
            }
            None => break,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    s.to_owned()
                } else {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let _ = session.dispatch(&text).await;
    }

    let _ = session.close().await;
    stop.cancel();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        abort.abort();
    }

    let _ = ctx.active.fetch_sub(1, Ordering::SeqCst);
    info!(
        %principal_id,
        %subscriber_id,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Verify the token and resolve the principal. Errors carry the close code
/// and a short reason.
async fn authenticate(
    token: Option<&str>,
    ctx: &SessionContext,
) -> Result<Principal, (u16, &'static str)> {
    let id = ctx
        .verifier
        .verify(token)
        .map_err(|e| (e.close_code(), e.reason()))?;
    match ctx.services.gateway.resolve_principal(id).await {
        Ok(principal) => Ok(principal),
        Err(e) if e.is_not_found() => {
            let err = AuthError::Invalid(format!("unknown principal {id}"));
            Err((err.close_code(), err.reason()))
        }
        Err(e) => {
            warn!(principal_id = %id, error = %e, "principal lookup failed");
            Err((close_code::ERROR, "store_unavailable"))
        }
    }
}

async fn close_with(ws: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_owned().into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Drain the outbound queue into the socket and keep the client alive.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
    pong_timeout: Duration,
    stop: CancellationToken,
    shutdown: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            () = stop.cancelled() => {
                let code = if shutdown.is_cancelled() { close_code::AWAY } else { close_code::NORMAL };
                let frame = CloseFrame { code, reason: String::new().into() };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout {
                    warn!(subscriber_id = %connection.id, "client unresponsive for {pong_timeout:?}, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    stop.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
