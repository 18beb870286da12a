//! # MQTT 3.1.1 Packet Structures and Serialization
//!
//! The control packets the bus client sends and understands, with the traits
//! for encoding them into and decoding them from a byte buffer.

use heapless::Vec;

use super::codec::{
    self, CONTENT_START, finish_packet, read_u16, read_utf8_string, read_variable_byte_integer,
    write_bytes, write_u16, write_utf8_string,
};
use crate::error::{CodecError, ProtocolError};

/// Protocol level of MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, CodecError> {
        match bits {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket.into()),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError>;
}

/// Control packets a client can receive from the broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(Ack),
    PubRec(Ack),
    PubRel(Ack),
    PubComp(Ack),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete packet.
pub fn decode(buf: &[u8]) -> Result<MqttPacket<'_>, CodecError> {
    let first = *buf.first().ok_or(ProtocolError::MalformedPacket)?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(Ack::decode(buf)?),
        5 => MqttPacket::PubRec(Ack::decode(buf)?),
        6 => MqttPacket::PubRel(Ack::decode(buf)?),
        7 => MqttPacket::PubComp(Ack::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => return Err(ProtocolError::InvalidPacketType(packet_type).into()),
    };
    Ok(packet)
}

/// Skips the fixed header, returning the cursor at the variable header and
/// the end of the packet.
fn open_packet(buf: &[u8]) -> Result<(usize, usize), CodecError> {
    let mut cursor = 1;
    let remaining_len =
        read_variable_byte_integer(&mut cursor, buf)?.ok_or(ProtocolError::MalformedPacket)?;
    let end = cursor + remaining_len;
    if end > buf.len() {
        return Err(ProtocolError::MalformedPacket.into());
    }
    Ok((cursor, end))
}

// --- Last will ---
/// Message the broker publishes on the client's behalf once the connection
/// drops without a DISCONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Will<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub will: Option<Will<'a>>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            will: None,
        }
    }

    pub fn with_will(mut self, will: Will<'a>) -> Self {
        self.will = Some(will);
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = CONTENT_START;
        write_utf8_string(&mut cursor, buf, "MQTT")?;
        write_bytes(&mut cursor, buf, &[PROTOCOL_LEVEL])?;

        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        write_bytes(&mut cursor, buf, &[flags])?;
        write_u16(&mut cursor, buf, self.keep_alive)?;

        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(will) = &self.will {
            write_utf8_string(&mut cursor, buf, will.topic)?;
            codec::write_binary(&mut cursor, buf, will.payload)?;
        }
        finish_packet(buf, 0x10, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (cursor, end) = open_packet(buf)?;
        if end - cursor != 2 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        Ok(Self {
            session_present: (buf[cursor] & 0x01) != 0,
            reason_code: buf[cursor + 1],
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let flags = buf[0] & 0x0F;
        let qos = QoS::from_bits((flags >> 1) & 0x03)?;
        let retain = flags & 0x01 != 0;

        let (mut cursor, end) = open_packet(buf)?;
        let packet = &buf[..end];
        let topic = read_utf8_string(&mut cursor, packet)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, packet)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain,
            payload: &packet[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = CONTENT_START;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
            write_u16(&mut cursor, buf, id)?;
        }
        write_bytes(&mut cursor, buf, self.payload)?;

        let mut header = 0x30 | ((self.qos as u8) << 1);
        if self.retain {
            header |= 0x01;
        }
        finish_packet(buf, header, cursor)
    }
}

// --- PUBACK / PUBREC / PUBREL / PUBCOMP ---
/// Kind of a two byte acknowledgement in the publish handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckKind {
    PubAck,
    PubRec,
    PubRel,
    PubComp,
}

impl AckKind {
    fn header(self) -> u8 {
        match self {
            Self::PubAck => 0x40,
            Self::PubRec => 0x50,
            // PUBREL carries the reserved flag bits 0b0010.
            Self::PubRel => 0x62,
            Self::PubComp => 0x70,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ack {
    pub packet_id: u16,
}

impl DecodePacket<'_> for Ack {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (mut cursor, end) = open_packet(buf)?;
        if end - cursor != 2 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        Ok(Ack {
            packet_id: read_u16(&mut cursor, buf)?,
        })
    }
}

/// An acknowledgement the client owes the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutgoingAck {
    pub kind: AckKind,
    pub packet_id: u16,
}

impl EncodePacket for OutgoingAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let out = buf.get_mut(..4).ok_or(CodecError::BufferTooSmall)?;
        out[0] = self.kind.header();
        out[1] = 0x02;
        out[2..4].copy_from_slice(&self.packet_id.to_be_bytes());
        Ok(4)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), 8>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = CONTENT_START;
        write_u16(&mut cursor, buf, self.packet_id)?;
        for (topic, qos) in &self.topics {
            write_utf8_string(&mut cursor, buf, topic)?;
            write_bytes(&mut cursor, buf, &[*qos as u8])?;
        }
        // SUBSCRIBE carries the reserved flag bits 0b0010.
        finish_packet(buf, 0x82, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<u8, 8>,
}

impl SubAck {
    /// Return code of a rejected subscription.
    pub const FAILURE: u8 = 0x80;
}

impl DecodePacket<'_> for SubAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let (mut cursor, end) = open_packet(buf)?;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;

        let mut reason_codes = Vec::new();
        for code in &buf[cursor..end] {
            reason_codes
                .push(*code)
                .map_err(|_| ProtocolError::PayloadTooLarge)?;
        }
        Ok(SubAck {
            packet_id,
            reason_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        buf.get_mut(..2)
            .ok_or(CodecError::BufferTooSmall)?
            .copy_from_slice(&[0xC0, 0x00]);
        Ok(2)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        buf.get_mut(..2)
            .ok_or(CodecError::BufferTooSmall)?
            .copy_from_slice(&[0xE0, 0x00]);
        Ok(2)
    }
}
