//! # Serial Frame Codec
//!
//! Every message exchanged with the projector is a fixed 8-byte frame:
//!
//! ```text
//! +------+------+------+------+------+------+-------+------+
//! | SOF  | ITEM | ITEM | TYPE | DATA | DATA | CHECK | EOF  |
//! +------+------+------+------+------+------+-------+------+
//!   0xA9   hi     lo            hi     lo     OR      0x9A
//! ```
//!
//! The checksum is the bitwise OR of bytes 1 to 5. The codec is stateless;
//! buffering and resynchronization live in [`super::engine`].

use core::fmt;

use crate::error::FrameError;

/// Size of every frame on the wire.
pub const FRAME_SIZE: usize = 8;

/// Frame start marker.
pub const SOF: u8 = 0xA9;

/// Frame end marker.
pub const EOF: u8 = 0x9A;

/// Request and response types carried in byte 3.
pub mod command {
    /// Set request.
    pub const SET_RQ: u8 = 0x00;
    /// Get request.
    pub const GET_RQ: u8 = 0x01;
    /// Get response, data field carries the value.
    pub const GET_RS: u8 = 0x02;
    /// Acknowledge response, item field carries the response code.
    pub const ACK_RS: u8 = 0x03;
}

/// Response codes carried in the item field of an `ACK_RS` frame.
pub mod response {
    pub const ACK_OK: u16 = 0x0000;
    pub const NAK_UNKNOWN_COMMAND: u16 = 0x0101;
    pub const NAK_SIZE_ERROR: u16 = 0x0104;
    pub const NAK_SELECT_ERROR: u16 = 0x0105;
    pub const NAK_RANGE_OVER: u16 = 0x0106;
    pub const NAK_NOT_APPLICABLE: u16 = 0x010A;
    pub const NAK_CHECKSUM: u16 = 0xF010;
    pub const NAK_FRAMING_ERROR: u16 = 0xF020;
    pub const NAK_PARITY_ERROR: u16 = 0xF030;
    pub const NAK_OVERRUN: u16 = 0xF040;
    pub const NAK_OTHER_ERROR: u16 = 0xF050;
}

/// Returns the display name of a response code, `None` when unknown.
pub fn response_name(code: u16) -> Option<&'static str> {
    use response::*;
    let name = match code {
        ACK_OK => "OK",
        NAK_UNKNOWN_COMMAND => "Unknown command",
        NAK_SIZE_ERROR => "Frame size error",
        NAK_SELECT_ERROR => "Select error",
        NAK_RANGE_OVER => "Range over error",
        NAK_NOT_APPLICABLE => "Not applicable command",
        NAK_CHECKSUM => "Checksum error",
        NAK_FRAMING_ERROR => "Framing error",
        NAK_PARITY_ERROR => "Parity error",
        NAK_OVERRUN => "Overrun error",
        NAK_OTHER_ERROR => "Other error",
        _ => return None,
    };
    Some(name)
}

/// Returns the display name of a command type, `None` when unknown.
pub fn command_name(cmd: u8) -> Option<&'static str> {
    match cmd {
        command::SET_RQ => Some("SET.rq"),
        command::GET_RQ => Some("GET.rq"),
        command::GET_RS => Some("GET.rs"),
        command::ACK_RS => Some("ACK.rs"),
        _ => None,
    }
}

/// A decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub item: u16,
    pub command: u8,
    pub data: u16,
}

impl Frame {
    pub const fn new(item: u16, command: u8, data: u16) -> Self {
        Self {
            item,
            command,
            data,
        }
    }

    /// Encodes this frame into its wire representation.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        encode(self.item, self.command, self.data)
    }

    /// `true` for an acknowledge carrying anything but `ACK_OK`.
    pub fn is_nak(&self) -> bool {
        self.command == command::ACK_RS && self.item != response::ACK_OK
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc | b)
}

/// Encodes a frame. Never fails; fields are packed big-endian.
pub fn encode(item: u16, cmd: u8, data: u16) -> [u8; FRAME_SIZE] {
    let mut buf = [0u8; FRAME_SIZE];
    buf[0] = SOF;
    buf[1..3].copy_from_slice(&item.to_be_bytes());
    buf[3] = cmd;
    buf[4..6].copy_from_slice(&data.to_be_bytes());
    buf[6] = checksum(&buf[1..6]);
    buf[7] = EOF;
    buf
}

/// Decodes a frame.
///
/// With `expect_response` set, only `GET_RS` frames and `ACK_RS` frames with a
/// known response code are accepted.
pub fn decode(buf: &[u8], expect_response: bool) -> Result<Frame, FrameError> {
    if buf.len() != FRAME_SIZE {
        return Err(FrameError::Incomplete);
    }
    if buf[0] != SOF {
        return Err(FrameError::StartMarker);
    }
    if buf[7] != EOF {
        return Err(FrameError::EndMarker);
    }
    if buf[6] != checksum(&buf[1..6]) {
        return Err(FrameError::Checksum);
    }

    let frame = Frame {
        item: u16::from_be_bytes([buf[1], buf[2]]),
        command: buf[3],
        data: u16::from_be_bytes([buf[4], buf[5]]),
    };

    if expect_response {
        match frame.command {
            command::GET_RS => {}
            command::ACK_RS if response_name(frame.item).is_none() => {
                return Err(FrameError::UnknownResponse(frame.item));
            }
            command::ACK_RS => {}
            other => return Err(FrameError::UnknownType(other)),
        }
    }

    Ok(frame)
}

/// Human-readable rendering of a frame for logs, e.g. `GET.rq 0102 "Status Power"`.
///
/// Item names come from the caller-supplied lookup so the codec stays device
/// agnostic.
pub struct FrameText<'a> {
    pub frame: &'a Frame,
    pub item_name: fn(u16) -> Option<&'static str>,
}

impl fmt::Display for FrameText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Frame {
            item,
            command: cmd,
            data,
        } = *self.frame;
        let item_name = (self.item_name)(item).unwrap_or("???");
        write!(f, "{}", command_name(cmd).unwrap_or("???"))?;
        match cmd {
            command::GET_RQ => write!(f, " {:04x} \"{}\"", item, item_name),
            command::SET_RQ | command::GET_RS => {
                write!(f, " {:04x} \"{}\" = {:04x}", item, item_name, data)
            }
            command::ACK_RS => write!(f, " {}", response_name(item).unwrap_or("???")),
            _ => Ok(()),
        }
    }
}
