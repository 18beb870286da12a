//! Home Assistant MQTT discovery document.

use serde::Serialize;

use crate::config::{BridgeConfig, DeviceInfo};

/// Discovery document published retained on `<root>/config`.
///
/// Topics are given relative to `~`, which Home Assistant expands to the
/// topic root. The base fields come from the [`BridgeConfig`]; device
/// variants fill in the optional ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Discovery<'a> {
    #[serde(rename = "~")]
    pub base_topic: &'a str,
    pub name: &'a str,
    pub device: DeviceInfo<'a>,
    pub unique_id: &'a str,
    pub command_topic: &'a str,
    pub availability_topic: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attributes_topic: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<&'a str>,
}

impl<'a> Discovery<'a> {
    pub const COMMAND_TOPIC: &'static str = "~/set";
    pub const AVAILABILITY_TOPIC: &'static str = "~/status";
    pub const STATE_TOPIC: &'static str = "~/state";

    pub fn new(config: &BridgeConfig<'a>) -> Self {
        Self {
            base_topic: config.topic_root,
            name: config.name,
            device: config.device,
            unique_id: config.unique_id,
            command_topic: Self::COMMAND_TOPIC,
            availability_topic: Self::AVAILABILITY_TOPIC,
            state_topic: None,
            json_attributes_topic: None,
            value_template: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_document() {
        let config = BridgeConfig::new("hatt/lamp", "lamp").with_name("Lamp");
        let mut buf = [0u8; 256];
        let n = serde_json_core::to_slice(&Discovery::new(&config), &mut buf).unwrap();
        assert_eq!(
            core::str::from_utf8(&buf[..n]).unwrap(),
            concat!(
                r#"{"~":"hatt/lamp","name":"Lamp","device":{"identifiers":[]},"#,
                r#""unique_id":"lamp","command_topic":"~/set","availability_topic":"~/status"}"#
            )
        );
    }
}
