use core::convert::Infallible;

use embassy_time::Timer;

use super::session::BridgeSession;
use super::traits::{BusConnector, DeviceBridge};
use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Runs bridge sessions back to back, waiting the reconnect interval after
/// every lost connection.
pub struct ReconnectSupervisor<'a, B> {
    bridge: &'a B,
    config: &'a BridgeConfig<'a>,
}

impl<'a, B> ReconnectSupervisor<'a, B>
where
    B: DeviceBridge,
{
    pub fn new(bridge: &'a B, config: &'a BridgeConfig<'a>) -> Self {
        Self { bridge, config }
    }

    /// Retries forever. Only returns for a configuration that can never
    /// connect, i.e. a topic root too long for the topic buffers.
    pub async fn run<C>(&self, connector: &mut C) -> Result<Infallible, BridgeError<C::Error>>
    where
        C: BusConnector,
    {
        let mut reconnect = false;
        loop {
            if reconnect {
                Timer::after(self.config.reconnect_interval).await;
            }

            let Err(err) = BridgeSession::new(self.bridge, self.config)
                .run(connector)
                .await;
            if let BridgeError::Topic = err {
                error!("Topic root {} is too long", self.config.topic_root);
                return Err(err);
            }
            warn!(
                "Error \"{}\". Reconnecting in {} seconds.",
                err,
                self.config.reconnect_interval.as_secs()
            );
            reconnect = true;
        }
    }
}
