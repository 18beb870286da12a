//! # Projector Bridge
//!
//! Exposes the projector as a Home Assistant switch with JSON attributes.
//!
//! Every status cycle queries the power state. While the projector is
//! warming up or cooling down it is polled every second and the full query
//! (error flags, lamp timer) is skipped. A command that fails marks the
//! bridge offline for that cycle; the state is republished whenever it
//! changed.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer, with_timeout};
use serde::Serialize;

use super::codes::{ErrorReport, PowerStatus};
use super::driver::Projector;
use crate::error::{CommandError, EncodeError};
use crate::runtime::{Availability, DeviceBridge, Discovery, SessionContext};

/// Poll interval while the power state is changing.
pub const TRANSITION_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between a power command and the next status cycle.
pub const COMMAND_SETTLE: Duration = Duration::from_secs(1);

const VALUE_TEMPLATE: &str = "{{ value_json.state }}";

/// Switch position as shown by Home Assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Switch {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

/// Published on the state topic; also serves as the JSON attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProjectorState {
    pub power_state: PowerStatus,
    pub status: ErrorReport,
    pub state: Switch,
    pub lamp_timer: u16,
}

impl Default for ProjectorState {
    fn default() -> Self {
        Self {
            power_state: PowerStatus::Unknown,
            status: ErrorReport::Unknown,
            state: Switch::Off,
            lamp_timer: 0,
        }
    }
}

pub struct ProjectorBridge<'a, const DEPTH: usize = 8> {
    projector: Projector<'a, DEPTH>,
    wake: Signal<NoopRawMutex, ()>,
}

impl<'a, const DEPTH: usize> ProjectorBridge<'a, DEPTH> {
    pub fn new(projector: Projector<'a, DEPTH>) -> Self {
        Self {
            projector,
            wake: Signal::new(),
        }
    }

    /// Queries the projector and returns the delay until the next cycle.
    /// The session state is only touched once every query succeeded.
    async fn poll(&self, ctx: &SessionContext<'_, ProjectorState>) -> Result<Duration, CommandError> {
        let power = self.projector.status_power().await?;
        let full = if power.is_transitional() {
            debug!("Power {}, polling again shortly", power);
            None
        } else {
            let flags = self.projector.status_error().await?;
            let lamp_timer = self.projector.lamp_timer().await?;
            Some((flags, lamp_timer))
        };

        ctx.update_state(|state| {
            state.power_state = power;
            if power.is_off() {
                state.state = Switch::Off;
            } else if power.is_on() {
                state.state = Switch::On;
            }
            if let Some((flags, lamp_timer)) = full {
                state.status = ErrorReport::Flags(flags);
                state.lamp_timer = lamp_timer;
            }
        });

        Ok(match full {
            Some(_) => ctx.config().status_interval,
            None => TRANSITION_INTERVAL,
        })
    }
}

impl<const DEPTH: usize> DeviceBridge for ProjectorBridge<'_, DEPTH> {
    type State = ProjectorState;

    fn initial_state(&self) -> ProjectorState {
        ProjectorState::default()
    }

    fn discovery<'a>(&self, base: Discovery<'a>) -> Discovery<'a> {
        Discovery {
            state_topic: Some(Discovery::STATE_TOPIC),
            json_attributes_topic: Some(Discovery::STATE_TOPIC),
            value_template: Some(VALUE_TEMPLATE),
            ..base
        }
    }

    async fn handle_command(
        &self,
        ctx: &SessionContext<'_, ProjectorState>,
        payload: &[u8],
    ) -> Result<(), EncodeError> {
        let target = match payload {
            b"ON" => Switch::On,
            b"OFF" => Switch::Off,
            _ => {
                debug!("Ignoring command payload {}", crate::fmt::Dump(payload));
                return Ok(());
            }
        };
        let flipped = ctx.update_state(|state| {
            let flipped = state.state != target;
            state.state = target;
            flipped
        });
        if !flipped {
            return Ok(());
        }

        info!("Switching projector {:?}", target);
        let sent = match target {
            Switch::On => self.projector.power_on().await,
            Switch::Off => self.projector.power_off().await,
        };
        if let Err(e) = sent {
            warn!("Power command failed: {}", e);
        }

        Timer::after(COMMAND_SETTLE).await;
        self.wake.signal(());
        Ok(())
    }

    async fn status_cycle(
        &self,
        ctx: &SessionContext<'_, ProjectorState>,
    ) -> Result<Duration, EncodeError> {
        let interval = match self.poll(ctx).await {
            Ok(interval) => {
                ctx.publish_status(Availability::Online, false).await?;
                interval
            }
            Err(e) => {
                warn!("Projector query failed: {}", e);
                ctx.publish_status(Availability::Offline, false).await?;
                ctx.config().status_interval
            }
        };
        ctx.publish_state(false).await?;
        Ok(interval)
    }

    async fn wait_next_cycle(&self, interval: Duration) {
        if with_timeout(interval, self.wake.wait()).await.is_ok() {
            debug!("Status cycle woken early");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    #[test]
    fn test_state_json() {
        let state = ProjectorState::default();
        let mut buf = [0u8; 128];
        let n = serde_json_core::to_slice(&state, &mut buf).unwrap();
        assert_eq!(
            core::str::from_utf8(&buf[..n]).unwrap(),
            r#"{"power_state":"Unknown","status":"Unknown","state":"OFF","lamp_timer":0}"#
        );
    }

    #[test]
    fn test_discovery_document() {
        let config = BridgeConfig::new("hatt/hw50", "hw50").with_name("Projector");
        let link = crate::protocol::SerialLink::<4>::new(crate::projector::PROFILE);
        let bridge = ProjectorBridge::new(Projector::new(&link));
        let discovery = bridge.discovery(Discovery::new(&config));

        let mut buf = [0u8; 512];
        let n = serde_json_core::to_slice(&discovery, &mut buf).unwrap();
        assert_eq!(
            core::str::from_utf8(&buf[..n]).unwrap(),
            concat!(
                r#"{"~":"hatt/hw50","name":"Projector","device":{"identifiers":[]},"#,
                r#""unique_id":"hw50","command_topic":"~/set","availability_topic":"~/status","#,
                r#""state_topic":"~/state","json_attributes_topic":"~/state","#,
                r#""value_template":"{{ value_json.state }}"}"#
            )
        );
    }
}
