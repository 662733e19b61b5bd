//! # huddle-core
//!
//! Foundation types shared by every Huddle crate.
//!
//! - **IDs**: numeric newtypes for principals and conversations, UUID v7
//!   newtypes for subscribers and server instances, and the derived [`RoomId`]
//! - **Domain records**: [`Principal`], [`ConversationRef`], [`Message`]
//! - **Wire events**: inbound frame parsing and the three outbound event kinds
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod domain;
pub mod events;
pub mod ids;
pub mod logging;

pub use domain::{ConversationRef, Message, Principal, format_timestamp};
pub use events::{InboundEvent, InboundFrame, OutboundEvent};
pub use ids::{ConversationId, InstanceId, PrincipalId, RoomId, SubscriberId};
