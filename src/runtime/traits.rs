//! Seams of the bridge runtime.
//!
//! [`BusClient`] and [`BusConnector`] abstract the publish/subscribe bus so
//! the session can run over the bundled MQTT client or a test double.
//! [`DeviceBridge`] is what a device variant implements to plug into a
//! [`BridgeSession`](super::BridgeSession).
//!
//! All traits use native `async fn` and are driven on a single executor, so
//! they carry no `Send` bounds.

use core::fmt;

use embassy_time::{Duration, Timer};
use heapless::{String, Vec};
use serde::Serialize;

use super::context::SessionContext;
use super::discovery::Discovery;
use crate::error::EncodeError;
use crate::mqtt::{QoS, Will};

/// Maximum length of any topic the runtime handles.
pub const MAX_TOPIC_LEN: usize = 128;

/// Largest inbound payload kept; longer messages are dropped by the client.
pub const MAX_INBOUND_PAYLOAD: usize = 256;

/// A message received on one of the session's subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_INBOUND_PAYLOAD>,
}

impl InboundMessage {
    /// Copies topic and payload, or returns `None` if either does not fit.
    pub fn new(topic: &str, payload: &[u8]) -> Option<Self> {
        Some(Self {
            topic: String::try_from(topic).ok()?,
            payload: Vec::from_slice(payload).ok()?,
        })
    }
}

/// Availability as published on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected publish/subscribe client.
#[allow(async_fn_in_trait)]
pub trait BusClient {
    type Error: fmt::Debug;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error>;

    /// Waits for the next inbound message.
    ///
    /// Must be cancel-safe: the session races it against outgoing publishes.
    /// May return `Ok(None)` when the client has housekeeping to write, in
    /// which case the caller should [`flush`](Self::flush) before receiving
    /// again.
    async fn receive(&mut self) -> Result<Option<InboundMessage>, Self::Error>;

    /// Writes acknowledgements and keep-alive traffic owed to the broker.
    async fn flush(&mut self) -> Result<(), Self::Error>;

    /// Flushes, then waits until every QoS 1/2 publish has been acknowledged.
    async fn drain(&mut self) -> Result<(), Self::Error> {
        self.flush().await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}

/// Opens bus connections; one per session.
#[allow(async_fn_in_trait)]
pub trait BusConnector {
    type Error: fmt::Debug;
    type Client<'c>: BusClient<Error = Self::Error>
    where
        Self: 'c;

    /// Connects with `will` registered as the last-will message.
    async fn connect(
        &mut self,
        client_id: &str,
        will: Will<'_>,
    ) -> Result<Self::Client<'_>, Self::Error>;
}

/// A device exposed on the bus.
///
/// The session owns the published state and availability and hands each hook
/// a [`SessionContext`] to read, update and publish them. Hooks take `&self`:
/// the status loop and the message router call into the bridge concurrently.
#[allow(async_fn_in_trait)]
pub trait DeviceBridge {
    /// The record published as JSON on the state topic.
    type State: Clone + PartialEq + Serialize;

    /// State at the start of every session.
    fn initial_state(&self) -> Self::State;

    /// Adds variant specific fields to the discovery document.
    fn discovery<'a>(&self, base: Discovery<'a>) -> Discovery<'a> {
        base
    }

    /// Handles a payload received on the command topic.
    async fn handle_command(
        &self,
        _ctx: &SessionContext<'_, Self::State>,
        _payload: &[u8],
    ) -> Result<(), EncodeError> {
        Ok(())
    }

    /// Runs one status cycle and returns the delay until the next one.
    ///
    /// The default reports the bridge online every status interval.
    async fn status_cycle(
        &self,
        ctx: &SessionContext<'_, Self::State>,
    ) -> Result<Duration, EncodeError> {
        ctx.publish_status(Availability::Online, false).await?;
        Ok(ctx.config().status_interval)
    }

    /// Sleeps between status cycles. Variants may cut the wait short.
    async fn wait_next_cycle(&self, interval: Duration) {
        Timer::after(interval).await;
    }
}
