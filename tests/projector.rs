mod common;

use core::cell::Cell;
use core::convert::Infallible;
use core::future::pending;

use common::{Bus, MockConnector, ms, wait_until};
use embassy_futures::join::join;
use embassy_futures::select::{Either, Either3, select, select3};
use embassy_time::{Instant, Timer};
use embedded_io_async::{ErrorType, Read, Write};
use futures::executor::block_on;
use myrtio_hatt::projector::codes::item;
use myrtio_hatt::projector::{Emulator, PROFILE, PowerStatus, Projector, ProjectorBridge};
use myrtio_hatt::protocol::frame::response;
use myrtio_hatt::{BridgeConfig, BridgeSession, CommandError, SerialLink};

/// Runs `scenario` against a link served by `stream`.
fn drive<S, F>(link: &SerialLink<8>, stream: &mut S, scenario: F)
where
    S: Read + Write,
    S::Error: core::fmt::Debug,
    F: core::future::Future<Output = ()>,
{
    block_on(async {
        match select(link.run(stream), scenario).await {
            Either::First(Err(e)) => panic!("link stopped: {:?}", e),
            Either::Second(()) => {}
        }
    });
}

/// A port with nothing attached: swallows writes, never answers.
struct Unplugged;

impl ErrorType for Unplugged {
    type Error = Infallible;
}

impl Read for Unplugged {
    async fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Infallible> {
        pending().await
    }
}

impl Write for Unplugged {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

/// Emulated projector behind a cable that can be pulled. Unplugged, the
/// requests never reach the projector.
struct Cable<'a> {
    emulator: Emulator,
    plugged: &'a Cell<bool>,
}

impl ErrorType for Cable<'_> {
    type Error = Infallible;
}

impl Read for Cable<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        self.emulator.read(buf).await
    }
}

impl Write for Cable<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        if self.plugged.get() {
            self.emulator.write(buf).await
        } else {
            Ok(buf.len())
        }
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

#[test]
fn driver_queries_emulated_projector() {
    let link = SerialLink::<8>::new(PROFILE);
    let projector = Projector::new(&link);
    let mut emulator = Emulator::with_timing(ms(2), ms(100));

    drive(&link, &mut emulator, async {
        assert_eq!(projector.status_power().await, Ok(PowerStatus::Standby));
        assert!(projector.status_error().await.unwrap().is_ok());
        assert!(!projector.status_error2().await.unwrap().highland());
        assert_eq!(projector.lamp_timer().await, Ok(100));
        assert_eq!(
            projector.get(item::CALIB_PRESET).await,
            Err(CommandError::Nak(response::NAK_UNKNOWN_COMMAND))
        );
    });
}

#[test]
fn power_commands_walk_through_transitions() {
    let link = SerialLink::<8>::new(PROFILE);
    let projector = Projector::new(&link);
    let mut emulator = Emulator::with_timing(ms(2), ms(100));

    drive(&link, &mut emulator, async {
        projector.power_on().await.unwrap();
        assert_eq!(projector.status_power().await, Ok(PowerStatus::StartupLamp));
        Timer::after(ms(150)).await;
        assert_eq!(projector.status_power().await, Ok(PowerStatus::PowerOn));

        projector.power_off().await.unwrap();
        assert_eq!(projector.status_power().await, Ok(PowerStatus::Cooling1));
        Timer::after(ms(120)).await;
        assert_eq!(projector.status_power().await, Ok(PowerStatus::Cooling2));
        Timer::after(ms(100)).await;
        assert_eq!(projector.status_power().await, Ok(PowerStatus::Standby));
    });
}

#[test]
fn concurrent_commands_complete_in_order() {
    let link = SerialLink::<8>::new(PROFILE);
    let projector = Projector::new(&link);
    let mut emulator = Emulator::with_timing(ms(2), ms(100));

    drive(&link, &mut emulator, async {
        let (power, lamp) = join(projector.status_power(), projector.lamp_timer()).await;
        assert_eq!(power, Ok(PowerStatus::Standby));
        assert_eq!(lamp, Ok(100));
    });
}

#[test]
fn unanswered_command_times_out_and_link_recovers() {
    let link = SerialLink::<8>::with_timeout(PROFILE, ms(50));
    let projector = Projector::new(&link);

    drive(&link, &mut Unplugged, async {
        let start = Instant::now();
        assert_eq!(projector.status_power().await, Err(CommandError::Timeout));
        assert!(Instant::now() - start >= ms(50));
        assert_eq!(projector.lamp_timer().await, Err(CommandError::Timeout));
        assert_eq!(projector.power_on().await, Ok(()));
    });
}

#[test]
fn bridge_polls_and_switches_projector() {
    let bus = Bus::default();
    let mut connector = MockConnector { bus: &bus };
    let link = SerialLink::<8>::new(PROFILE);
    let bridge = ProjectorBridge::new(Projector::new(&link));
    let config = BridgeConfig::new("hatt/hw50", "hw50").with_status_interval(ms(200));
    let mut emulator = Emulator::with_timing(ms(2), ms(1500));

    let standby = r#"{"power_state":"Standby","status":"No Error","state":"OFF","lamp_timer":100}"#;
    let on = r#"{"power_state":"Power On","status":"No Error","state":"ON","lamp_timer":100}"#;

    block_on(async {
        let script = async {
            wait_until(ms(2000), || bus.publishes_to("hatt/hw50/state").len() == 2).await;
            assert_eq!(bus.publishes_to("hatt/hw50/status"), ["offline", "online"]);
            assert_eq!(bus.publishes_to("hatt/hw50/state")[1], standby);

            bus.inject("hatt/hw50/set", b"ON");
            wait_until(ms(8000), || {
                bus.publishes_to("hatt/hw50/state").last().map(String::as_str) == Some(on)
            })
            .await;
        };
        let session = BridgeSession::new(&bridge, &config).run(&mut connector);
        match select3(link.run(&mut emulator), session, script).await {
            Either3::First(Err(e)) => panic!("link stopped: {:?}", e),
            Either3::Second(result) => panic!("session ended: {:?}", result.err()),
            Either3::Third(()) => {}
        }
    });

    let states = bus.publishes_to("hatt/hw50/state");
    assert!(states.iter().any(|s| s.contains(r#""power_state":"Startup Lamp""#)));
    assert_eq!(bus.publishes_to("hatt/hw50/status"), ["offline", "online"]);
}

#[test]
fn bridge_stays_offline_without_projector() {
    let bus = Bus::default();
    let mut connector = MockConnector { bus: &bus };
    let link = SerialLink::<8>::with_timeout(PROFILE, ms(20));
    let bridge = ProjectorBridge::new(Projector::new(&link));
    let config = BridgeConfig::new("hatt/hw50", "hw50").with_status_interval(ms(50));

    block_on(async {
        let script = async {
            wait_until(ms(1000), || bus.publishes_to("hatt/hw50/config").len() == 1).await;
            Timer::after(ms(300)).await;
        };
        let session = BridgeSession::new(&bridge, &config).run(&mut connector);
        match select3(link.run(&mut Unplugged), session, script).await {
            Either3::First(Err(e)) => panic!("link stopped: {:?}", e),
            Either3::Second(result) => panic!("session ended: {:?}", result.err()),
            Either3::Third(()) => {}
        }
    });

    assert_eq!(bus.publishes_to("hatt/hw50/status"), ["offline"]);
    assert_eq!(bus.publishes_to("hatt/hw50/state").len(), 1);
}

#[test]
fn bridge_recovers_when_projector_returns() {
    let bus = Bus::default();
    let mut connector = MockConnector { bus: &bus };
    let link = SerialLink::<8>::with_timeout(PROFILE, ms(20));
    let bridge = ProjectorBridge::new(Projector::new(&link));
    let config = BridgeConfig::new("hatt/hw50", "hw50").with_status_interval(ms(50));
    let plugged = Cell::new(true);
    let mut cable = Cable {
        emulator: Emulator::with_timing(ms(2), ms(100)),
        plugged: &plugged,
    };

    let standby = r#"{"power_state":"Standby","status":"No Error","state":"OFF","lamp_timer":100}"#;

    block_on(async {
        let script = async {
            wait_until(ms(2000), || {
                bus.publishes_to("hatt/hw50/state").last().map(String::as_str) == Some(standby)
            })
            .await;
            assert_eq!(bus.publishes_to("hatt/hw50/status"), ["offline", "online"]);
            let states = bus.publishes_to("hatt/hw50/state");

            plugged.set(false);
            wait_until(ms(1000), || bus.publishes_to("hatt/hw50/status").len() == 3).await;
            Timer::after(ms(200)).await;
            assert_eq!(bus.publishes_to("hatt/hw50/status"), ["offline", "online", "offline"]);
            assert_eq!(bus.publishes_to("hatt/hw50/state"), states);

            plugged.set(true);
            wait_until(ms(1000), || bus.publishes_to("hatt/hw50/status").len() == 4).await;
            Timer::after(ms(100)).await;
            assert_eq!(bus.publishes_to("hatt/hw50/state"), states);
        };
        let session = BridgeSession::new(&bridge, &config).run(&mut connector);
        match select3(link.run(&mut cable), session, script).await {
            Either3::First(Err(e)) => panic!("link stopped: {:?}", e),
            Either3::Second(result) => panic!("session ended: {:?}", result.err()),
            Either3::Third(()) => {}
        }
    });

    assert_eq!(
        bus.publishes_to("hatt/hw50/status"),
        ["offline", "online", "offline", "online"]
    );
}
