//! Sony VPL-HW50 projector over its RS-232 control port.
//!
//! The port runs at 38400 baud, 8 data bits, even parity, one stop bit.
//! Configure the UART accordingly and pass it to
//! [`SerialLink::run`](crate::protocol::SerialLink::run) with [`PROFILE`].

pub mod bridge;
pub mod codes;
pub mod driver;
pub mod emulator;

pub use bridge::{ProjectorBridge, ProjectorState, Switch};
pub use codes::{ErrorFlags, ErrorReport, PROFILE, PowerStatus, Warnings};
pub use driver::Projector;
pub use emulator::Emulator;

/// Baud rate of the control port.
pub const BAUD_RATE: u32 = 38_400;
