//! # Projector Emulator
//!
//! An in-memory byte stream that behaves like the projector's serial port.
//! Hand it to [`SerialLink::run`](crate::protocol::SerialLink::run) in place
//! of a UART to exercise the bridge without hardware.
//!
//! Status queries are answered after a short delay. Power commands start a
//! timed transition: on goes through "Startup Lamp" for one phase, off goes
//! through "Cooling1" and "Cooling2" for one phase each. Any other item is
//! answered with an "Unknown command" NAK.

use core::convert::Infallible;

use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{ErrorType, Read, Write};
use heapless::{Deque, Vec};

use super::codes::{PowerStatus, item};
use crate::fmt::Dump;
use crate::protocol::frame::{self, FRAME_SIZE, SOF, command, response};

/// Delay before a reply shows up on the read side.
pub const REPLY_DELAY: Duration = Duration::from_millis(100);

/// Length of each step of a power transition.
pub const PHASE: Duration = Duration::from_secs(5);

const REPLY_QUEUE: usize = 8;
const RX_CAPACITY: usize = 64;
const LAMP_HOURS: u16 = 100;

#[derive(Clone, Copy)]
enum Transition {
    Idle,
    PoweringOn(Instant),
    PoweringOff(Instant),
}

pub struct Emulator {
    transition: Transition,
    reply_delay: Duration,
    phase: Duration,
    rx: Vec<u8, RX_CAPACITY>,
    replies: Deque<(Instant, [u8; FRAME_SIZE]), REPLY_QUEUE>,
    partial: Vec<u8, FRAME_SIZE>,
}

impl Default for Emulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Emulator {
    /// Starts in standby.
    pub fn new() -> Self {
        Self::with_timing(REPLY_DELAY, PHASE)
    }

    pub fn with_timing(reply_delay: Duration, phase: Duration) -> Self {
        Self {
            transition: Transition::Idle,
            reply_delay,
            phase,
            rx: Vec::new(),
            replies: Deque::new(),
            partial: Vec::new(),
        }
    }

    /// Power state at `now`.
    pub fn power_at(&self, now: Instant) -> PowerStatus {
        match self.transition {
            Transition::Idle => PowerStatus::Standby,
            Transition::PoweringOn(since) => {
                if now < since + self.phase {
                    PowerStatus::StartupLamp
                } else {
                    PowerStatus::PowerOn
                }
            }
            Transition::PoweringOff(since) => {
                if now < since + self.phase {
                    PowerStatus::Cooling1
                } else if now < since + self.phase * 2 {
                    PowerStatus::Cooling2
                } else {
                    PowerStatus::Standby
                }
            }
        }
    }

    pub fn power(&self) -> PowerStatus {
        self.power_at(Instant::now())
    }

    /// Consumes complete frames from the receive buffer.
    fn process(&mut self) {
        loop {
            let Some(start) = self.rx.iter().position(|&b| b == SOF) else {
                self.rx.clear();
                return;
            };
            if start > 0 {
                trace!("HW50 junk {}", Dump(&self.rx[..start]));
                drain_front(&mut self.rx, start);
            }
            if self.rx.len() < FRAME_SIZE {
                return;
            }
            match frame::decode(&self.rx[..FRAME_SIZE], false) {
                Ok(request) => {
                    drain_front(&mut self.rx, FRAME_SIZE);
                    self.handle(request.item);
                }
                Err(e) => {
                    debug!("HW50 bad frame: {}", e);
                    drain_front(&mut self.rx, 1);
                }
            }
        }
    }

    fn handle(&mut self, requested: u16) {
        let now = Instant::now();
        match requested {
            item::STATUS_POWER => {
                let code = self.power_at(now).code().unwrap_or_default();
                self.reply(requested, command::GET_RS, code);
            }
            item::STATUS_ERROR | item::STATUS_ERROR2 => {
                self.reply(requested, command::GET_RS, 0);
            }
            item::LAMP_TIMER => self.reply(requested, command::GET_RS, LAMP_HOURS),
            item::IR_POWER_ON => self.transition = Transition::PoweringOn(now),
            item::IR_POWER_OFF => self.transition = Transition::PoweringOff(now),
            _ => self.reply(response::NAK_UNKNOWN_COMMAND, command::ACK_RS, 0),
        }
    }

    fn reply(&mut self, item: u16, cmd: u8, data: u16) {
        let bytes = frame::encode(item, cmd, data);
        if self
            .replies
            .push_back((Instant::now() + self.reply_delay, bytes))
            .is_err()
        {
            warn!("HW50 reply queue full, dropping reply");
        }
    }
}

fn drain_front<const N: usize>(buf: &mut Vec<u8, N>, count: usize) {
    let remaining = buf.len() - count;
    buf.copy_within(count.., 0);
    buf.truncate(remaining);
}

impl ErrorType for Emulator {
    type Error = Infallible;
}

impl Read for Emulator {
    /// Waits for the next reply. Cancel-safe: nothing is consumed before the
    /// reply is due.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        if self.partial.is_empty() {
            let due = match self.replies.front() {
                Some((due, _)) => *due,
                None => core::future::pending().await,
            };
            Timer::at(due).await;
            if let Some((_, bytes)) = self.replies.pop_front() {
                trace!("HW50 RX:  {}", Dump(&bytes));
                self.partial.extend_from_slice(&bytes).ok();
            }
        }

        let n = buf.len().min(self.partial.len());
        buf[..n].copy_from_slice(&self.partial[..n]);
        drain_front(&mut self.partial, n);
        Ok(n)
    }
}

impl Write for Emulator {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
        trace!("HW50 TX:  {}", Dump(buf));
        for &byte in buf {
            if self.rx.push(byte).is_err() {
                self.rx.clear();
            }
            self.process();
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn exchange(emulator: &mut Emulator, request: [u8; FRAME_SIZE]) -> frame::Frame {
        block_on(async {
            emulator.write_all(&request).await.unwrap();
            let mut buf = [0u8; FRAME_SIZE];
            emulator.read_exact(&mut buf).await.unwrap();
            frame::decode(&buf, true).unwrap()
        })
    }

    fn fast() -> Emulator {
        Emulator::with_timing(Duration::from_millis(1), Duration::from_millis(50))
    }

    #[test]
    fn test_answers_status_queries() {
        let mut emulator = fast();
        let power = exchange(&mut emulator, frame::encode(item::STATUS_POWER, command::GET_RQ, 0));
        assert_eq!(power, frame::Frame::new(item::STATUS_POWER, command::GET_RS, 0));

        let lamp = exchange(&mut emulator, frame::encode(item::LAMP_TIMER, command::GET_RQ, 0));
        assert_eq!(lamp.data, LAMP_HOURS);
    }

    #[test]
    fn test_unknown_item_is_nak() {
        let mut emulator = fast();
        let reply = exchange(&mut emulator, frame::encode(item::CALIB_PRESET, command::GET_RQ, 0));
        assert!(reply.is_nak());
        assert_eq!(reply.item, response::NAK_UNKNOWN_COMMAND);
    }

    #[test]
    fn test_skips_junk_and_split_writes() {
        let mut emulator = fast();
        let request = frame::encode(item::STATUS_ERROR, command::GET_RQ, 0);
        block_on(async {
            emulator.write_all(&[0x00, 0x13]).await.unwrap();
            emulator.write_all(&request[..3]).await.unwrap();
            emulator.write_all(&request[3..]).await.unwrap();
        });
        assert_eq!(emulator.replies.len(), 1);
        assert!(emulator.rx.is_empty());
    }

    #[test]
    fn test_power_transitions() {
        let mut emulator = Emulator::new();
        assert_eq!(emulator.power(), PowerStatus::Standby);

        emulator.handle(item::IR_POWER_ON);
        let after = Instant::now();
        assert!(emulator.replies.is_empty());
        assert_eq!(emulator.power_at(after), PowerStatus::StartupLamp);
        assert_eq!(emulator.power_at(after + PHASE), PowerStatus::PowerOn);

        emulator.handle(item::IR_POWER_OFF);
        let after = Instant::now();
        assert_eq!(emulator.power_at(after), PowerStatus::Cooling1);
        assert_eq!(emulator.power_at(after + PHASE), PowerStatus::Cooling2);
        assert_eq!(emulator.power_at(after + PHASE * 2), PowerStatus::Standby);
    }

    #[test]
    fn test_short_reads_keep_remainder() {
        let mut emulator = fast();
        let bytes = block_on(async {
            let request = frame::encode(item::STATUS_POWER, command::GET_RQ, 0);
            emulator.write_all(&request).await.unwrap();
            let mut head = [0u8; 3];
            let mut tail = [0u8; 5];
            assert_eq!(emulator.read(&mut head).await.unwrap(), 3);
            assert_eq!(emulator.read(&mut tail).await.unwrap(), 5);
            let mut bytes = [0u8; FRAME_SIZE];
            bytes[..3].copy_from_slice(&head);
            bytes[3..].copy_from_slice(&tail);
            bytes
        });
        assert_eq!(bytes, frame::encode(item::STATUS_POWER, command::GET_RS, 0));
    }
}
