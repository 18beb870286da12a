//! # Error Types
//!
//! Errors are layered the same way the bridge is: frame decoding failures
//! stay inside the serial engine, command failures surface to whoever awaits
//! the command, and bus failures end the session and trigger a reconnect.

use core::fmt;

use crate::protocol::frame::response_name;

/// A malformed or unrecognized serial frame.
///
/// Only ever produced while scanning the receive buffer; the engine skips the
/// candidate and keeps looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The candidate is not exactly one frame long.
    Incomplete,
    /// Wrong start-of-frame marker.
    StartMarker,
    /// Wrong end-of-frame marker.
    EndMarker,
    /// The OR checksum does not match.
    Checksum,
    /// A response was expected but the command type is not a response type.
    UnknownType(u8),
    /// An acknowledge frame carried a response code outside the known set.
    UnknownResponse(u16),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => f.write_str("incomplete frame"),
            Self::StartMarker => f.write_str("wrong SOF field"),
            Self::EndMarker => f.write_str("wrong EOF field"),
            Self::Checksum => f.write_str("checksum failure"),
            Self::UnknownType(t) => write!(f, "unknown response type {:02x}", t),
            Self::UnknownResponse(code) => write!(f, "unknown ACK/NAK response {:04x}", code),
        }
    }
}

/// The failure result of a single device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// The device answered with a negative acknowledge carrying this code.
    Nak(u16),
    /// The device answered with a frame type that does not answer a command.
    UnexpectedResponse(u8),
    /// The device did not answer before the command deadline.
    Timeout,
    /// The command queue has no room for another command.
    QueueFull,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nak(code) => match response_name(*code) {
                Some(name) => f.write_str(name),
                None => write!(f, "NAK {:04x}", code),
            },
            Self::UnexpectedResponse(t) => write!(f, "unexpected response type {:02x}", t),
            Self::Timeout => f.write_str("command timed out"),
            Self::QueueFull => f.write_str("command queue full"),
        }
    }
}

/// Failure of the byte stream underneath the serial engine.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError<E> {
    /// The stream reported an I/O error.
    Io(E),
    /// The stream reached its end.
    Closed,
}

impl<E: fmt::Debug> fmt::Display for LinkError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "serial I/O error: {:?}", e),
            Self::Closed => f.write_str("serial stream closed"),
        }
    }
}

/// A session-level failure. Ends the current bridge session.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeError<E> {
    /// The bus client failed; the connection is considered lost.
    Bus(E),
    /// The topic root is too long to build the device topics.
    Topic,
    /// A payload did not fit its publish buffer.
    Encode,
}

impl<E: fmt::Debug> fmt::Display for BridgeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {:?}", e),
            Self::Topic => f.write_str("topic root too long"),
            Self::Encode => f.write_str("payload exceeds publish buffer"),
        }
    }
}

impl<E> From<EncodeError> for BridgeError<E> {
    fn from(_: EncodeError) -> Self {
        BridgeError::Encode
    }
}

/// A topic or payload did not fit its fixed-capacity buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncodeError;

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("payload exceeds publish buffer")
    }
}

/// The error enum of the MQTT bus client.
///
/// Generic over the transport error type `T`, so errors from the underlying
/// network transport (TCP, UART) are carried untouched.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error, i.e. a violation of the MQTT specification.
    Protocol(ProtocolError),
    /// The connection was refused by the broker.
    ConnectionRefused(ConnectReasonCode),
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// The broker did not answer in time, or a write stalled.
    Timeout,
}

impl<T: fmt::Debug> fmt::Display for MqttError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport error: {:?}", e),
            Self::Protocol(e) => write!(f, "protocol error: {:?}", e),
            Self::ConnectionRefused(code) => write!(f, "connection refused: {:?}", code),
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::Timeout => f.write_str("timed out"),
        }
    }
}

impl<T> From<ProtocolError> for MqttError<T> {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

impl<T> From<CodecError> for MqttError<T> {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::BufferTooSmall => MqttError::BufferTooSmall,
            CodecError::Protocol(p) => MqttError::Protocol(p),
        }
    }
}

/// Errors produced while encoding or decoding MQTT packets. Transport
/// independent, converted into [`MqttError`] at the client boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    BufferTooSmall,
    Protocol(ProtocolError),
}

impl From<ProtocolError> for CodecError {
    fn from(err: ProtocolError) -> Self {
        CodecError::Protocol(err)
    }
}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    Success,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The broker sent an unexpected packet during a handshake.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// A string or payload exceeds what the protocol can carry.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
}
