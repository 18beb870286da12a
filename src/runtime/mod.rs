//! Bridge Runtime
//!
//! Generic per-device session lifecycle over a publish/subscribe bus:
//! last-will registration, discovery and availability publication, readiness
//! gating, command routing and reconnect supervision.
//!
//! # Publishing Pattern
//!
//! Session loops and device bridges never perform bus I/O directly. They
//! queue owned publish requests through the [`SessionContext`]; the session's
//! pump, which owns the [`BusClient`], performs the actual publish. This
//! keeps the client out of shared state and preserves publish order.

pub(crate) mod context;
pub(crate) mod discovery;
pub(crate) mod gate;
pub(crate) mod outbox;
pub(crate) mod session;
pub(crate) mod supervisor;
pub(crate) mod topics;
pub(crate) mod traits;

pub use context::SessionContext;
pub use discovery::Discovery;
pub use gate::ReadinessGate;
pub use outbox::{
    INBOX_DEPTH, Inbox, MAX_PAYLOAD_LEN, OUTBOX_DEPTH, Outbox, OwnedPublishRequest,
};
pub use session::BridgeSession;
pub use supervisor::ReconnectSupervisor;
pub use topics::{Topic, TopicSet};
pub use traits::{
    Availability, BusClient, BusConnector, DeviceBridge, InboundMessage, MAX_INBOUND_PAYLOAD,
    MAX_TOPIC_LEN,
};
