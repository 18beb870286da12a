//! # Home Assistant Bridges for Embedded Devices
//!
//! `myrtio-hatt` exposes devices to Home Assistant over MQTT. It is `no_std`,
//! allocation free, and built on the [Embassy](https://embassy.dev/) async
//! ecosystem.
//!
//! ## Core Features
//!
//! - **Bridge runtime:** last-will registration, discovery and availability
//!   publication, readiness gating, command routing and reconnect
//!   supervision, generic over a [`DeviceBridge`](runtime::DeviceBridge).
//! - **Serial command engine:** fixed 8-byte frames with checksum, stream
//!   resynchronization, one command in flight at a time, per-command
//!   completion and reply timeouts.
//! - **Sony VPL-HW50 projector:** typed driver, a switch bridge with power,
//!   error and lamp timer attributes, and an emulator for running without
//!   hardware.
//! - **MQTT 3.1.1 client:** QoS 0/1/2 publishing, subscriptions and
//!   keep-alive over any [`MqttTransport`](mqtt::MqttTransport), with an
//!   `embassy-net` TCP connector.
//!
//! ## Usage
//!
//! The serial link and the bridge run side by side on one executor:
//!
//! ```ignore
//! use embassy_futures::join::join;
//! use myrtio_hatt::projector::{PROFILE, Projector, ProjectorBridge};
//! use myrtio_hatt::{BridgeConfig, MqttOptions, ReconnectSupervisor, SerialLink, TcpConnector};
//!
//! let link = SerialLink::<8>::new(PROFILE);
//! let bridge = ProjectorBridge::new(Projector::new(&link));
//! let config = BridgeConfig::new("hatt/hw50", "hw50").with_name("Projector");
//! let mut connector = TcpConnector::<1024>::new(
//!     stack,
//!     broker,
//!     &mut rx_buffer,
//!     &mut tx_buffer,
//!     MqttOptions::new(),
//! );
//!
//! join(
//!     link.run(&mut uart),
//!     ReconnectSupervisor::new(&bridge, &config).run(&mut connector),
//! )
//! .await;
//! ```
//!
//! ## Topics
//!
//! Every device lives under a topic root:
//!
//! | Topic | Direction | Content |
//! |---|---|---|
//! | `<root>/config` | out, retained | discovery document |
//! | `<root>/status` | out, retained | `online` / `offline`, also the last will |
//! | `<root>/state` | out, retained | device state as JSON |
//! | `<root>/set` | in | commands |
//!
//! An `online` message on the Home Assistant status topic makes the bridge
//! announce itself again.

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod config;
pub mod error;
pub mod mqtt;
pub mod projector;
pub mod protocol;
pub mod runtime;

pub use config::{BridgeConfig, DeviceInfo};
pub use error::{BridgeError, CommandError, FrameError, LinkError, MqttError};
pub use mqtt::{MqttClient, MqttOptions, QoS, TcpConnector, TcpTransport};
pub use protocol::{Reply, SerialLink};
pub use runtime::{BridgeSession, DeviceBridge, ReconnectSupervisor};
