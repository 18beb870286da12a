//! MQTT 3.1.1 bus client.
//!
//! Implements [`BusClient`](crate::runtime::BusClient) over any
//! [`MqttTransport`], and [`BusConnector`](crate::runtime::BusConnector) over
//! an `embassy-net` TCP socket.

pub mod client;
pub mod codec;
pub mod packet;
pub mod transport;

pub use client::{MqttClient, MqttOptions};
pub use packet::{QoS, Will};
pub use transport::{MqttTransport, TcpConnector, TcpTransport, TcpTransportError};
