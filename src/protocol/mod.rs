//! Binary serial transport: frame codec, command engine and the async link
//! that drives both over an `embedded-io-async` byte stream.

pub mod engine;
pub mod frame;
pub mod link;

pub use engine::{DEFAULT_TIMEOUT, Engine, Outcome, Profile, Reply, Ticket};
pub use frame::{FRAME_SIZE, Frame, FrameText};
pub use link::SerialLink;
