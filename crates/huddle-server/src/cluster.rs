//! Wires the bus and presence registry for the configured cluster mode.
//!
//! In `local` mode everything lives in this process. In `shared` mode the bus
//! and presence go through the shared store, and a maintenance loop keeps
//! this instance's lease fresh, reaps presence left behind by dead instances,
//! and trims old bus log rows.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use huddle_core::{InstanceId, RoomId, format_timestamp};
use huddle_settings::ClusterMode;
use huddle_store::{BlockingPool, BusLogRepo, SqliteGateway};
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusError, LocalBus, RelayBus};
use crate::config::ServerConfig;
use crate::metrics::PRESENCE_REAPED_ROOMS_TOTAL;
use crate::presence::{MemoryPresence, PresenceError, SharedPresence, broadcast_online_status};
use crate::services::ChatServices;

/// Errors starting the cluster wiring.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The bus relay could not read its starting cursor.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The first lease refresh failed.
    #[error(transparent)]
    Presence(#[from] PresenceError),
}

/// Running services plus the background tasks that keep them alive.
pub struct Cluster {
    /// Gateway, bus, presence for sessions.
    pub services: ChatServices,
    /// Relay and maintenance tasks; they stop when the token fires.
    pub tasks: Vec<JoinHandle<()>>,
    shared: Option<Arc<SharedPresence>>,
}

impl Cluster {
    /// Drop this instance's presence rows and tell the remaining instances.
    /// A no-op in local mode.
    pub async fn withdraw(&self) {
        let Some(presence) = &self.shared else {
            return;
        };
        match presence.withdraw().await {
            Ok(rooms) => rebroadcast(&rooms, presence.as_ref(), &self.services).await,
            Err(e) => warn!(error = %e, "presence withdraw failed"),
        }
    }
}

/// Build the services for `config.mode` and start any background tasks.
pub async fn start(
    config: &ServerConfig,
    pool: BlockingPool,
    instance: InstanceId,
    token: CancellationToken,
) -> Result<Cluster, ClusterError> {
    let gateway = Arc::new(SqliteGateway::new(pool.clone()));
    match config.mode {
        ClusterMode::Local => {
            info!(instance_id = %instance, "cluster mode: local");
            Ok(Cluster {
                services: ChatServices::new(
                    gateway,
                    Arc::new(LocalBus::new()),
                    Arc::new(MemoryPresence::new()),
                ),
                tasks: Vec::new(),
                shared: None,
            })
        }
        ClusterMode::Shared => {
            info!(instance_id = %instance, "cluster mode: shared");
            let presence = Arc::new(SharedPresence::new(pool.clone(), instance.clone()));
            let _ = presence.heartbeat().await?;
            let bus = Arc::new(RelayBus::new(pool.clone(), instance));
            let relay = bus.start(config.relay_poll(), token.clone()).await?;

            let services = ChatServices::new(gateway, bus, presence.clone());
            let maintenance = Maintenance {
                presence: Arc::clone(&presence),
                services: services.clone(),
                pool,
                lease: config.presence_lease(),
                retention: config.bus_retention(),
            };
            let every = config.instance_heartbeat();
            let maintain = tokio::spawn(async move { maintenance.run(every, token).await });

            Ok(Cluster {
                services,
                tasks: vec![relay, maintain],
                shared: Some(presence),
            })
        }
    }
}

/// Periodic upkeep for shared mode.
struct Maintenance {
    presence: Arc<SharedPresence>,
    services: ChatServices,
    pool: BlockingPool,
    lease: Duration,
    retention: Duration,
}

impl Maintenance {
    async fn run(self, every: Duration, token: CancellationToken) {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.pass().await;
        }
        debug!("cluster maintenance stopped");
    }

    /// One round: refresh the lease, reap expired instances, trim the bus log.
    async fn pass(&self) {
        match self.presence.heartbeat().await {
            Ok(restored) => rebroadcast(&restored, self.presence.as_ref(), &self.services).await,
            Err(e) => warn!(error = %e, "instance heartbeat failed"),
        }

        match self.presence.reap_stale(self.lease).await {
            Ok(rooms) => {
                counter!(PRESENCE_REAPED_ROOMS_TOTAL).increment(rooms.len() as u64);
                rebroadcast(&rooms, self.presence.as_ref(), &self.services).await;
            }
            Err(e) => warn!(error = %e, "presence reap failed"),
        }

        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let cutoff = format_timestamp(&(Utc::now() - retention));
        match self
            .pool
            .run(move |conn| BusLogRepo::trim_before(conn, &cutoff))
            .await
        {
            Ok(0) => {}
            Ok(n) => debug!(rows = n, "bus log trimmed"),
            Err(e) => warn!(error = %e, "bus log trim failed"),
        }
    }
}

/// Publish a fresh snapshot to every room in `rooms` that still has someone in it.
async fn rebroadcast(rooms: &[RoomId], presence: &SharedPresence, services: &ChatServices) {
    for room in rooms {
        broadcast_online_status(
            room,
            presence,
            services.gateway.as_ref(),
            services.bus.as_ref(),
        )
        .await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
