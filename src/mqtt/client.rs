//! # MQTT 3.1.1 Client
//!
//! A small `no_std` client that owns one transport and two fixed buffers.
//!
//! Publishes are written immediately. Their QoS 1/2 handshakes complete in
//! the background: acknowledgements from the broker are handled by
//! [`receive`](BusClient::receive), and the packets the client owes in reply
//! (PUBACK, PUBREC, PUBREL, PUBCOMP, PINGREQ) are queued and written by
//! [`flush`](BusClient::flush). Receiving therefore never writes, which keeps
//! it cancel-safe. A receive that leaves packets owed returns `Ok(None)` so
//! the caller flushes them before waiting again.
//!
//! Inbound packets larger than `BUF_SIZE` are skipped, not fatal.

use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use heapless::{Deque, Vec};

use super::codec::{packet_len, read_variable_byte_integer};
use super::packet::{
    self, AckKind, Connect, Disconnect, EncodePacket, MqttPacket, OutgoingAck, PingReq, Publish,
    QoS, SubAck, Subscribe, Will,
};
use super::transport::MqttTransport;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::runtime::{BusClient, InboundMessage};

/// Connection options of the client.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MqttOptions {
    keep_alive: Duration,
    clean_session: bool,
    timeout: Duration,
}

impl Default for MqttOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            timeout: Duration::from_secs(10),
        }
    }
}

impl MqttOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep-alive interval announced to the broker. Zero disables pings.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    /// Bound on the CONNACK wait and on the closing [`drain`](BusClient::drain).
    /// Stalled transport writes use it as well.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A packet the client owes the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Ack(OutgoingAck),
    Ping,
}

const CONTROL_DEPTH: usize = 8;
const UNACKED_DEPTH: usize = 8;

pub struct MqttClient<T, const BUF_SIZE: usize> {
    transport: T,
    options: MqttOptions,
    tx: [u8; BUF_SIZE],
    rx: [u8; BUF_SIZE],
    rx_len: usize,
    discard: usize,
    next_packet_id: u16,
    control: Deque<Control, CONTROL_DEPTH>,
    unacked: Vec<u16, UNACKED_DEPTH>,
    last_tx: Instant,
}

impl<T, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T, options: MqttOptions) -> Self {
        Self {
            transport,
            options,
            tx: [0; BUF_SIZE],
            rx: [0; BUF_SIZE],
            rx_len: 0,
            discard: 0,
            next_packet_id: 1,
            control: Deque::new(),
            unacked: Vec::new(),
            last_tx: Instant::now(),
        }
    }

    /// Sends CONNECT and waits for the broker's CONNACK.
    pub async fn connect(
        &mut self,
        client_id: &str,
        will: Option<Will<'_>>,
    ) -> Result<(), MqttError<T::Error>> {
        let keep_alive = u16::try_from(self.options.keep_alive.as_secs()).unwrap_or(u16::MAX);
        let mut packet = Connect::new(client_id, keep_alive, self.options.clean_session);
        if let Some(will) = will {
            packet = packet.with_will(will);
        }
        let len = packet.encode(&mut self.tx)?;
        self.send(len).await?;

        let len = with_timeout(self.options.timeout, self.read_packet())
            .await
            .map_err(|_| MqttError::Timeout)??;
        let result = match packet::decode(&self.rx[..len])? {
            MqttPacket::ConnAck(ack) if ack.reason_code == 0 => Ok(()),
            MqttPacket::ConnAck(ack) => Err(MqttError::ConnectionRefused(
                ConnectReasonCode::from(ack.reason_code),
            )),
            _ => Err(MqttError::Protocol(ProtocolError::InvalidResponse)),
        };
        self.consume(len);
        if result.is_ok() {
            info!("Connected as {}", client_id);
        }
        result
    }

    /// Reads until a complete packet sits at the start of the receive buffer.
    async fn read_packet(&mut self) -> Result<usize, MqttError<T::Error>> {
        loop {
            if let Some(len) = packet_len(&self.rx[..self.rx_len])? {
                return Ok(len);
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.rx_len == BUF_SIZE {
            return Err(MqttError::BufferTooSmall);
        }
        let n = self
            .transport
            .recv(&mut self.rx[self.rx_len..])
            .await
            .map_err(MqttError::Transport)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        self.rx_len += n;
        Ok(())
    }

    /// Appends `n` freshly read bytes, dropping those owed to a skipped packet.
    fn received(&mut self, n: usize) {
        let skip = n.min(self.discard);
        self.discard -= skip;
        let start = self.rx_len;
        self.rx.copy_within(start + skip..start + n, start);
        self.rx_len += n - skip;
    }

    /// Drops the packet filling the receive buffer and the rest of it still
    /// on the wire.
    fn skip_oversized(&mut self) -> Result<(), MqttError<T::Error>> {
        let mut cursor = 1;
        let remaining = read_variable_byte_integer(&mut cursor, &self.rx[..self.rx_len])?
            .ok_or(MqttError::BufferTooSmall)?;
        let total = cursor + remaining;
        warn!("Dropping oversized packet ({} bytes)", total);
        self.discard = total - self.rx_len;
        self.rx_len = 0;
        Ok(())
    }

    fn consume(&mut self, len: usize) {
        self.rx.copy_within(len..self.rx_len, 0);
        self.rx_len -= len;
    }

    async fn send(&mut self, len: usize) -> Result<(), MqttError<T::Error>> {
        self.transport
            .send(&self.tx[..len])
            .await
            .map_err(MqttError::Transport)?;
        self.last_tx = Instant::now();
        Ok(())
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn queue(&mut self, control: Control) -> Result<(), MqttError<T::Error>> {
        if control == Control::Ping && self.control.iter().any(|c| *c == Control::Ping) {
            return Ok(());
        }
        self.control
            .push_back(control)
            .map_err(|_| MqttError::BufferTooSmall)
    }

    /// Handles the complete packet at the start of the receive buffer.
    fn handle_packet(&mut self, len: usize) -> Result<Option<InboundMessage>, MqttError<T::Error>> {
        let mut reply = None;
        let mut message = None;

        match packet::decode(&self.rx[..len])? {
            MqttPacket::Publish(publish) => {
                debug!(
                    "<<< {} ({} bytes, {:?})",
                    publish.topic,
                    publish.payload.len(),
                    publish.qos
                );
                message = InboundMessage::new(publish.topic, publish.payload);
                if message.is_none() {
                    warn!("Dropping oversized message on {}", publish.topic);
                }
                reply = match (publish.qos, publish.packet_id) {
                    (QoS::AtLeastOnce, Some(packet_id)) => Some(OutgoingAck {
                        kind: AckKind::PubAck,
                        packet_id,
                    }),
                    (QoS::ExactlyOnce, Some(packet_id)) => Some(OutgoingAck {
                        kind: AckKind::PubRec,
                        packet_id,
                    }),
                    _ => None,
                };
            }
            MqttPacket::PubAck(ack) | MqttPacket::PubComp(ack) => {
                trace!("Publish {} acknowledged", ack.packet_id);
                self.unacked.retain(|id| *id != ack.packet_id);
            }
            MqttPacket::PubRec(ack) => {
                reply = Some(OutgoingAck {
                    kind: AckKind::PubRel,
                    packet_id: ack.packet_id,
                });
            }
            MqttPacket::PubRel(ack) => {
                reply = Some(OutgoingAck {
                    kind: AckKind::PubComp,
                    packet_id: ack.packet_id,
                });
            }
            MqttPacket::SubAck(ack) => {
                if ack.reason_codes.contains(&SubAck::FAILURE) {
                    warn!("Subscription {} rejected", ack.packet_id);
                } else {
                    debug!("Subscription {} granted", ack.packet_id);
                }
            }
            MqttPacket::PingResp => trace!("PINGRESP"),
            MqttPacket::ConnAck(_) => {
                return Err(ProtocolError::InvalidResponse.into());
            }
        }

        if let Some(ack) = reply {
            self.queue(Control::Ack(ack))?;
        }
        Ok(message)
    }

    /// Writes owed packets and reads until no publish awaits its ack.
    async fn complete_handshakes(&mut self) -> Result<(), MqttError<T::Error>> {
        loop {
            self.flush().await?;
            if self.unacked.is_empty() {
                return Ok(());
            }
            match packet_len(&self.rx[..self.rx_len])? {
                Some(len) => {
                    let message = self.handle_packet(len);
                    self.consume(len);
                    if let Some(message) = message? {
                        debug!("Dropping {} while closing", message.topic.as_str());
                    }
                }
                None => self.fill().await?,
            }
        }
    }
}

impl<T, const BUF_SIZE: usize> BusClient for MqttClient<T, BUF_SIZE>
where
    T: MqttTransport,
{
    type Error = MqttError<T::Error>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        let packet_id = self.next_packet_id();
        let len = Subscribe::new(packet_id, topic, qos).encode(&mut self.tx)?;
        self.send(len).await?;
        info!("Subscribed to {}", topic);
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Error> {
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.next_packet_id());
        let packet = Publish {
            topic,
            qos,
            retain,
            payload,
            packet_id,
        };
        let len = packet.encode(&mut self.tx)?;
        self.send(len).await?;

        if let Some(id) = packet_id {
            if self.unacked.is_full() {
                let lost = self.unacked.remove(0);
                warn!("Publish {} never acknowledged", lost);
            }
            let _ = self.unacked.push(id);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<InboundMessage>, Self::Error> {
        loop {
            while let Some(len) = packet_len(&self.rx[..self.rx_len])? {
                let message = self.handle_packet(len);
                self.consume(len);
                if let Some(message) = message? {
                    return Ok(Some(message));
                }
            }
            if !self.control.is_empty() {
                return Ok(None);
            }
            if self.rx_len == BUF_SIZE {
                self.skip_oversized()?;
            }

            let keep_alive = self.options.keep_alive;
            let ping_at = self.last_tx + keep_alive;
            let ping_due = async move {
                if keep_alive.as_ticks() == 0 {
                    core::future::pending::<()>().await;
                }
                Timer::at(ping_at).await;
            };

            let event = select(self.transport.recv(&mut self.rx[self.rx_len..]), ping_due).await;
            match event {
                Either::First(Ok(0)) => return Err(ProtocolError::ConnectionClosed.into()),
                Either::First(Ok(n)) => self.received(n),
                Either::First(Err(e)) => return Err(MqttError::Transport(e)),
                Either::Second(()) => {
                    self.queue(Control::Ping)?;
                    return Ok(None);
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        while let Some(control) = self.control.front().copied() {
            let len = match control {
                Control::Ack(ack) => ack.encode(&mut self.tx)?,
                Control::Ping => PingReq.encode(&mut self.tx)?,
            };
            self.send(len).await?;
            self.control.pop_front();
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), Self::Error> {
        with_timeout(self.options.timeout, self.complete_handshakes())
            .await
            .map_err(|_| MqttError::Timeout)?
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        let len = Disconnect.encode(&mut self.tx)?;
        self.send(len).await?;
        info!("Disconnected");
        Ok(())
    }
}
