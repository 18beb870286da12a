//! # MQTT Transport Abstraction
//!
//! The `MqttTransport` trait abstracts the byte channel beneath the client
//! (TCP, UART, ...). `TcpTransport` and `TcpConnector` provide the
//! `embassy-net` implementation.

use core::fmt;

use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Write;

use super::client::{MqttClient, MqttOptions};
use super::packet::Will;
use crate::error::MqttError;
use crate::runtime::BusConnector;

/// A trait representing a transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: fmt::Debug;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read, `0` once the peer has closed the
    /// channel. Must be cancel-safe.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Failure of the TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TcpTransportError {
    /// The socket could not connect to the broker.
    Connect(ConnectError),
    /// Reading or writing the socket failed.
    Tcp(TcpError),
    /// A write did not complete within the transport timeout.
    WriteTimeout,
}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` over a connected socket. Writes that stall
    /// longer than `timeout` fail.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TcpError> {
        self.socket.write_all(buf).await?;
        self.socket.flush().await
    }
}

impl MqttTransport for TcpTransport<'_> {
    type Error = TcpTransportError;

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX ({} bytes)", buf.len());
        let timeout = self.timeout;
        let write_fut = self.write_all(buf);
        let timer = Timer::after(timeout);

        match futures::future::select(core::pin::pin!(write_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((result, _)) => result.map_err(TcpTransportError::Tcp),
            futures::future::Either::Right(((), _)) => {
                warn!("TCP write timeout");
                Err(TcpTransportError::WriteTimeout)
            }
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self
            .socket
            .read(buf)
            .await
            .map_err(TcpTransportError::Tcp)?;
        trace!("TCP RX ({} bytes)", n);
        Ok(n)
    }
}

/// Opens one TCP connection to the broker per session, reusing the socket
/// buffers it was given.
pub struct TcpConnector<'a, const BUF_SIZE: usize = 1024> {
    stack: Stack<'a>,
    remote: IpEndpoint,
    rx_buffer: &'a mut [u8],
    tx_buffer: &'a mut [u8],
    options: MqttOptions,
}

impl<'a, const BUF_SIZE: usize> TcpConnector<'a, BUF_SIZE> {
    pub fn new(
        stack: Stack<'a>,
        remote: IpEndpoint,
        rx_buffer: &'a mut [u8],
        tx_buffer: &'a mut [u8],
        options: MqttOptions,
    ) -> Self {
        Self {
            stack,
            remote,
            rx_buffer,
            tx_buffer,
            options,
        }
    }
}

impl<'a, const BUF_SIZE: usize> BusConnector for TcpConnector<'a, BUF_SIZE> {
    type Error = MqttError<TcpTransportError>;
    type Client<'c>
        = MqttClient<TcpTransport<'c>, BUF_SIZE>
    where
        Self: 'c;

    async fn connect(
        &mut self,
        client_id: &str,
        will: Will<'_>,
    ) -> Result<Self::Client<'_>, Self::Error> {
        let mut socket = TcpSocket::new(self.stack, &mut *self.rx_buffer, &mut *self.tx_buffer);
        debug!("Connecting to {}", self.remote);
        socket
            .connect(self.remote)
            .await
            .map_err(|e| MqttError::Transport(TcpTransportError::Connect(e)))?;

        let transport = TcpTransport::new(socket, self.options.timeout());
        let mut client = MqttClient::new(transport, self.options);
        client.connect(client_id, Some(will)).await?;
        Ok(client)
    }
}
