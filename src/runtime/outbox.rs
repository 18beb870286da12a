//! Channels between the session loops and the bus pump.
//!
//! The loops never touch the bus client. They queue owned publish requests in
//! the outbox; the pump, which owns the client, writes them in order and
//! forwards inbound messages through the inbox.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};

use super::traits::{InboundMessage, MAX_TOPIC_LEN};
use crate::error::EncodeError;
use crate::mqtt::QoS;

/// Largest outbound payload, sized for the discovery document.
pub const MAX_PAYLOAD_LEN: usize = 768;

pub const OUTBOX_DEPTH: usize = 4;
pub const INBOX_DEPTH: usize = 4;

/// A publish request with inline storage for topic and payload.
#[derive(Debug, Clone)]
pub struct OwnedPublishRequest {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
    pub qos: QoS,
    pub retain: bool,
}

impl OwnedPublishRequest {
    pub fn new(topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<Self, EncodeError> {
        Ok(Self {
            topic: String::try_from(topic).map_err(|_| EncodeError)?,
            payload: Vec::from_slice(payload).map_err(|_| EncodeError)?,
            qos,
            retain,
        })
    }

    /// Serializes `value` as JSON straight into the request's payload.
    pub fn json<V: serde::Serialize>(
        topic: &str,
        value: &V,
        qos: QoS,
        retain: bool,
    ) -> Result<Self, EncodeError> {
        let mut request = Self::new(topic, &[], qos, retain)?;
        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let len = serde_json_core::to_slice(value, &mut buf).map_err(|_| EncodeError)?;
        request.payload = Vec::from_slice(&buf[..len]).map_err(|_| EncodeError)?;
        Ok(request)
    }
}

pub type Outbox = Channel<NoopRawMutex, OwnedPublishRequest, OUTBOX_DEPTH>;
pub type Inbox = Channel<NoopRawMutex, InboundMessage, INBOX_DEPTH>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Sample<'a> {
        state: &'a str,
        lamp_timer: u16,
    }

    #[test]
    fn test_json_request() {
        let sample = Sample {
            state: "ON",
            lamp_timer: 100,
        };
        let request =
            OwnedPublishRequest::json("p/state", &sample, QoS::AtMostOnce, true).unwrap();
        assert_eq!(request.topic.as_str(), "p/state");
        assert_eq!(
            request.payload.as_slice(),
            br#"{"state":"ON","lamp_timer":100}"#
        );
        assert!(request.retain);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = [b'x'; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            OwnedPublishRequest::new("t", &payload, QoS::AtMostOnce, false).unwrap_err(),
            EncodeError
        );
    }
}
