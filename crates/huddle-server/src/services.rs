//! Collaborators shared by every session.

use std::sync::Arc;

use huddle_store::PersistenceGateway;

use crate::bus::MembershipBus;
use crate::presence::PresenceRegistry;

/// Gateway, bus, and presence registry, as trait objects so local and
/// shared-store implementations are interchangeable.
#[derive(Clone)]
pub struct ChatServices {
    /// Principal/conversation lookup and message persistence.
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Room fan-out.
    pub bus: Arc<dyn MembershipBus>,
    /// Who is online where.
    pub presence: Arc<dyn PresenceRegistry>,
}

impl ChatServices {
    /// Bundle the three collaborators.
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        bus: Arc<dyn MembershipBus>,
        presence: Arc<dyn PresenceRegistry>,
    ) -> Self {
        Self {
            gateway,
            bus,
            presence,
        }
    }
}
