//! # Bridge Session
//!
//! One bus connection for one device, from CONNECT to the final `offline`.
//!
//! While running, four futures are raced on the current executor:
//!
//! - the **pump** owns the bus client, writes queued publishes and forwards
//!   inbound messages;
//! - the **config publisher** announces state, status and discovery, sets the
//!   readiness gate and republishes discovery periodically. It is restarted
//!   whenever Home Assistant comes back online;
//! - the **status loop** runs the bridge's status cycles once the gate is set;
//! - the **router** dispatches inbound messages once the gate is set.
//!
//! The first of them to fail ends the session. Its siblings are dropped
//! before the closing `offline` publish.

use core::convert::Infallible;
use core::future::poll_fn;

use embassy_futures::select::{Either, Either4, select, select4};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::TrySendError;
use embassy_sync::signal::Signal;
use embassy_time::Timer;

use super::context::SessionContext;
use super::discovery::Discovery;
use super::gate::ReadinessGate;
use super::outbox::{Inbox, Outbox};
use super::topics::TopicSet;
use super::traits::{Availability, BusClient, BusConnector, DeviceBridge, InboundMessage};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, EncodeError};
use crate::mqtt::{QoS, Will};

/// Payload of the restart topic that triggers a discovery republish.
const RESTART_PAYLOAD: &[u8] = b"online";

type RestartSignal = Signal<NoopRawMutex, ()>;

pub struct BridgeSession<'a, B> {
    bridge: &'a B,
    config: &'a BridgeConfig<'a>,
}

impl<'a, B> BridgeSession<'a, B>
where
    B: DeviceBridge,
{
    pub fn new(bridge: &'a B, config: &'a BridgeConfig<'a>) -> Self {
        Self { bridge, config }
    }

    /// Runs the session until the connection fails.
    ///
    /// Once connected, the session always ends by publishing `offline` and
    /// disconnecting, on a best-effort basis.
    pub async fn run<C>(self, connector: &mut C) -> Result<Infallible, BridgeError<C::Error>>
    where
        C: BusConnector,
    {
        let topics = TopicSet::from_root(self.config.topic_root).ok_or(BridgeError::Topic)?;
        let will = Will {
            topic: &topics.status,
            payload: Availability::Offline.as_str().as_bytes(),
            qos: QoS::ExactlyOnce,
            retain: true,
        };

        info!("Connecting as {}", self.config.client_id);
        let mut client = connector
            .connect(self.config.client_id, will)
            .await
            .map_err(BridgeError::Bus)?;

        let result = self.serve(&mut client, &topics).await;

        if let Err(e) = &result {
            info!("Closing session: {}", e);
        }
        match client
            .publish(&topics.status, will.payload, will.qos, will.retain)
            .await
        {
            Ok(()) => {
                if let Err(e) = client.drain().await {
                    debug!("Offline publish not acknowledged: {:?}", e);
                }
            }
            Err(e) => debug!("Offline publish failed: {:?}", e),
        }
        if let Err(e) = client.disconnect().await {
            debug!("Disconnect failed: {:?}", e);
        }
        result
    }

    async fn serve<Cl>(
        &self,
        client: &mut Cl,
        topics: &TopicSet,
    ) -> Result<Infallible, BridgeError<Cl::Error>>
    where
        Cl: BusClient,
    {
        info!("Subscribing to {}", topics.command.as_str());
        client
            .subscribe(&topics.command, QoS::AtMostOnce)
            .await
            .map_err(BridgeError::Bus)?;
        client
            .subscribe(self.config.restart_topic, QoS::AtMostOnce)
            .await
            .map_err(BridgeError::Bus)?;

        let outbox = Outbox::new();
        let inbox = Inbox::new();
        let gate = ReadinessGate::new();
        let restart = RestartSignal::new();
        let ctx = SessionContext::new(self.config, topics, &outbox, self.bridge.initial_state());

        let event = select4(
            pump(client, &outbox, &inbox),
            self.config_loop(&ctx, &gate, &restart),
            self.status_loop(&ctx, &gate),
            self.router(&ctx, &gate, &restart, &inbox),
        )
        .await;
        match event {
            Either4::First(result) => result,
            Either4::Second(result) | Either4::Third(result) | Either4::Fourth(result) => {
                let Err(e) = result;
                Err(e.into())
            }
        }
    }

    /// Runs the config publisher, starting it over on every restart signal.
    async fn config_loop(
        &self,
        ctx: &SessionContext<'_, B::State>,
        gate: &ReadinessGate,
        restart: &RestartSignal,
    ) -> Result<Infallible, EncodeError> {
        loop {
            match select(restart.wait(), self.config_publisher(ctx, gate)).await {
                Either::First(()) => debug!("Restarting config publisher"),
                Either::Second(result) => return result,
            }
        }
    }

    async fn config_publisher(
        &self,
        ctx: &SessionContext<'_, B::State>,
        gate: &ReadinessGate,
    ) -> Result<Infallible, EncodeError> {
        ctx.publish_state(true).await?;
        ctx.publish_status(ctx.status(), true).await?;

        let discovery = self.bridge.discovery(Discovery::new(self.config));
        loop {
            info!("Publishing discovery to {}", ctx.topics().config.as_str());
            ctx.publish_json(&ctx.topics().config, &discovery, QoS::ExactlyOnce, true)
                .await?;
            gate.set();
            Timer::after(self.config.publish_interval).await;
        }
    }

    async fn status_loop(
        &self,
        ctx: &SessionContext<'_, B::State>,
        gate: &ReadinessGate,
    ) -> Result<Infallible, EncodeError> {
        loop {
            gate.wait().await;
            let interval = self.bridge.status_cycle(ctx).await?;
            self.bridge.wait_next_cycle(interval).await;
        }
    }

    async fn router(
        &self,
        ctx: &SessionContext<'_, B::State>,
        gate: &ReadinessGate,
        restart: &RestartSignal,
        inbox: &Inbox,
    ) -> Result<Infallible, EncodeError> {
        loop {
            gate.wait().await;
            let message = inbox.receive().await;
            debug!(
                ">>> {} {}",
                message.topic.as_str(),
                core::str::from_utf8(&message.payload).unwrap_or("<binary>")
            );

            if message.topic == self.config.restart_topic {
                if message.payload == RESTART_PAYLOAD {
                    restart_config_publisher(gate, restart).await;
                }
            } else if message.topic == ctx.topics().command {
                self.bridge.handle_command(ctx, &message.payload).await?;
            }
        }
    }
}

/// Restarts the config publisher and waits for its first discovery publish.
async fn restart_config_publisher(gate: &ReadinessGate, restart: &RestartSignal) {
    info!("Home Assistant restarted, republishing discovery");
    gate.clear();
    restart.signal(());
    gate.wait().await;
}

/// Owns the bus client: writes queued publishes in order and forwards
/// inbound messages to the router.
///
/// While the inbox is full the held message waits and only the outbox is
/// served, so a router blocked on a publish always makes progress.
async fn pump<Cl>(
    client: &mut Cl,
    outbox: &Outbox,
    inbox: &Inbox,
) -> Result<Infallible, BridgeError<Cl::Error>>
where
    Cl: BusClient,
{
    let mut held: Option<InboundMessage> = None;
    loop {
        client.flush().await.map_err(BridgeError::Bus)?;

        let request = match held.take() {
            Some(message) => {
                let ready = poll_fn(|cx| inbox.poll_ready_to_send(cx));
                match select(ready, outbox.receive()).await {
                    Either::First(()) => {
                        held = forward(inbox, message);
                        continue;
                    }
                    Either::Second(request) => {
                        held = Some(message);
                        request
                    }
                }
            }
            None => {
                let event = select(client.receive(), outbox.receive()).await;
                match event {
                    Either::First(received) => {
                        if let Some(message) = received.map_err(BridgeError::Bus)? {
                            held = forward(inbox, message);
                        }
                        continue;
                    }
                    Either::Second(request) => request,
                }
            }
        };

        trace!("Publishing {} ({} bytes)", request.topic.as_str(), request.payload.len());
        client
            .publish(&request.topic, &request.payload, request.qos, request.retain)
            .await
            .map_err(BridgeError::Bus)?;
    }
}

/// Hands `message` to the router, giving it back if the inbox is full.
fn forward(inbox: &Inbox, message: InboundMessage) -> Option<InboundMessage> {
    match inbox.try_send(message) {
        Ok(()) => None,
        Err(TrySendError::Full(message)) => Some(message),
    }
}
