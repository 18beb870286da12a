//! Bridge configuration.
//!
//! Built in code with [`BridgeConfig::new`] and the `with_*` setters; reading
//! it from a file or the command line is left to the application.

use embassy_time::Duration;
use serde::Serialize;

/// Topic Home Assistant announces its own availability on.
pub const DEFAULT_RESTART_TOPIC: &str = "homeassistant/status";

/// Device registry entry shown in the discovery document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceInfo<'a> {
    pub identifiers: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<&'a str>,
}

/// Per-device bridge settings. Immutable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig<'a> {
    /// Root of the device topics: `<root>/config`, `<root>/set`, ...
    pub topic_root: &'a str,
    pub client_id: &'a str,
    /// Entity name shown by Home Assistant.
    pub name: &'a str,
    pub unique_id: &'a str,
    pub device: DeviceInfo<'a>,
    /// Delay between discovery republishes.
    pub publish_interval: Duration,
    /// Delay between status cycles.
    pub status_interval: Duration,
    /// Delay before reconnecting after a lost session.
    pub reconnect_interval: Duration,
    /// Topic whose `online` payload triggers a discovery republish.
    pub restart_topic: &'a str,
}

impl<'a> BridgeConfig<'a> {
    /// Configuration with the default intervals. Name and unique id default
    /// to the client id.
    pub fn new(topic_root: &'a str, client_id: &'a str) -> Self {
        Self {
            topic_root,
            client_id,
            name: client_id,
            unique_id: client_id,
            device: DeviceInfo::default(),
            publish_interval: Duration::from_secs(60),
            status_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(3),
            restart_topic: DEFAULT_RESTART_TOPIC,
        }
    }

    pub fn with_name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn with_unique_id(mut self, unique_id: &'a str) -> Self {
        self.unique_id = unique_id;
        self
    }

    pub fn with_device(mut self, device: DeviceInfo<'a>) -> Self {
        self.device = device;
        self
    }

    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_restart_topic(mut self, topic: &'a str) -> Self {
        self.restart_topic = topic;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::new("hatt/projector", "projector");
        assert_eq!(config.name, "projector");
        assert_eq!(config.unique_id, "projector");
        assert_eq!(config.publish_interval, Duration::from_secs(60));
        assert_eq!(config.status_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_interval, Duration::from_secs(3));
        assert_eq!(config.restart_topic, "homeassistant/status");
    }

    #[test]
    fn test_device_info_json_skips_missing_fields() {
        let device = DeviceInfo {
            identifiers: &["hw50"],
            manufacturer: Some("Sony"),
            ..DeviceInfo::default()
        };
        let mut buf = [0u8; 96];
        let n = serde_json_core::to_slice(&device, &mut buf).unwrap();
        assert_eq!(
            &buf[..n],
            br#"{"identifiers":["hw50"],"manufacturer":"Sony"}"#
        );
    }
}
