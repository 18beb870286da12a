//! # Command Engine
//!
//! The I/O-free core of the serial transport. It owns the receive buffer and
//! the command queue and decides what goes on the wire and when a command is
//! resolved; [`super::link::SerialLink`] feeds it bytes and clock readings.
//!
//! Invariants:
//! - at most one command is in flight (sent, awaiting a reply or deadline);
//! - commands are transmitted in submission order;
//! - fire-class commands resolve as soon as they are handed out for
//!   transmission and never occupy the in-flight slot;
//! - every ticket is resolved at most once.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use super::frame::{self, EOF, FRAME_SIZE, Frame, FrameText, SOF, command, response};
use crate::error::CommandError;
use crate::fmt::Dump;

/// Reply deadline applied to every command that expects an answer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3500);

/// Capacity of the receive buffer in bytes.
pub const RX_CAPACITY: usize = 64;

/// Device-specific knowledge the engine needs.
#[derive(Clone, Copy)]
pub struct Profile {
    /// Items whose commands produce no reply from the device.
    pub fire_class: fn(u16) -> bool,
    /// Item names used in diagnostics.
    pub item_name: fn(u16) -> Option<&'static str>,
}

/// Identifies a submitted command until its outcome is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket(u32);

/// Successful completion of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// Fire-class command, handed to the wire without awaiting an answer.
    Sent,
    /// The data field of the device's response.
    Data(u16),
}

impl Reply {
    pub fn data(self) -> Option<u16> {
        match self {
            Reply::Data(data) => Some(data),
            Reply::Sent => None,
        }
    }
}

pub type Outcome = Result<Reply, CommandError>;

struct Queued {
    ticket: Ticket,
    frame: Frame,
}

struct InFlight {
    /// `None` once the submitter abandoned the command.
    ticket: Option<Ticket>,
    frame: Frame,
    deadline: Instant,
}

/// Receive buffer, command queue and in-flight slot of one serial device.
///
/// `DEPTH` bounds the number of live tickets (queued, in flight, or resolved
/// but not yet collected).
pub struct Engine<const DEPTH: usize> {
    profile: Profile,
    timeout: Duration,
    rx: Vec<u8, RX_CAPACITY>,
    queue: Vec<Queued, DEPTH>,
    in_flight: Option<InFlight>,
    outcomes: Vec<(Ticket, Outcome), DEPTH>,
    live: usize,
    next_ticket: u32,
}

impl<const DEPTH: usize> Engine<DEPTH> {
    pub fn new(profile: Profile, timeout: Duration) -> Self {
        Self {
            profile,
            timeout,
            rx: Vec::new(),
            queue: Vec::new(),
            in_flight: None,
            outcomes: Vec::new(),
            live: 0,
            next_ticket: 0,
        }
    }

    /// Enqueues a command.
    pub fn submit(&mut self, frame: Frame) -> Result<Ticket, CommandError> {
        if self.live >= DEPTH {
            return Err(CommandError::QueueFull);
        }
        let ticket = Ticket(self.next_ticket);
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.queue
            .push(Queued { ticket, frame })
            .map_err(|_| CommandError::QueueFull)?;
        self.live += 1;
        Ok(ticket)
    }

    /// Advances the queue by one transmission.
    ///
    /// Returns the next frame to write, or `None` while a command is in
    /// flight or the queue is empty. Call repeatedly until `None`: fire-class
    /// commands resolve here and leave the slot free for the next one.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<[u8; FRAME_SIZE]> {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return None;
        }
        let Queued { ticket, frame } = self.queue.remove(0);
        debug!("     <<<  {}", FrameText {
            frame: &frame,
            item_name: self.profile.item_name,
        });

        if (self.profile.fire_class)(frame.item) {
            self.resolve(Some(ticket), Ok(Reply::Sent));
        } else {
            self.in_flight = Some(InFlight {
                ticket: Some(ticket),
                frame,
                deadline: now + self.timeout,
            });
        }
        Some(frame.encode())
    }

    /// Deadline of the in-flight command, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.in_flight.as_ref().map(|f| f.deadline)
    }

    /// Fails the in-flight command if its deadline has passed.
    pub fn on_deadline(&mut self, now: Instant) {
        let expired = matches!(&self.in_flight, Some(f) if f.deadline <= now);
        if !expired {
            return;
        }
        if let Some(expired) = self.in_flight.take() {
            warn!("Command {} timed out", FrameText {
                frame: &expired.frame,
                item_name: self.profile.item_name,
            });
            self.resolve(expired.ticket, Err(CommandError::Timeout));
        }
    }

    /// Appends received bytes and extracts every complete valid frame.
    pub fn on_bytes_received(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            if self.rx.is_full() {
                // Everything but the last partial frame has already been
                // scanned with a complete window.
                let excess = self.rx.len() - (FRAME_SIZE - 1);
                debug!("Receive buffer full, dropping {}", Dump(&self.rx[..excess]));
                self.consume(excess);
            }
            let room = RX_CAPACITY - self.rx.len();
            let (head, tail) = bytes.split_at(room.min(bytes.len()));
            let _ = self.rx.extend_from_slice(head);
            bytes = tail;
            self.extract_frames();
        }
    }

    /// Takes the outcome of a resolved command, releasing its ticket.
    pub fn take_outcome(&mut self, ticket: Ticket) -> Option<Outcome> {
        let pos = self.outcomes.iter().position(|(t, _)| *t == ticket)?;
        let (_, outcome) = self.outcomes.swap_remove(pos);
        self.live -= 1;
        Some(outcome)
    }

    /// Gives up on a command whose submitter is gone.
    ///
    /// A queued command is dropped; an in-flight command keeps the slot until
    /// its reply or deadline so the stream stays aligned, but the result is
    /// discarded.
    pub fn abandon(&mut self, ticket: Ticket) {
        if let Some(pos) = self.queue.iter().position(|q| q.ticket == ticket) {
            let _ = self.queue.remove(pos);
            self.live -= 1;
        } else if let Some(pos) = self.outcomes.iter().position(|(t, _)| *t == ticket) {
            let _ = self.outcomes.swap_remove(pos);
            self.live -= 1;
        } else if let Some(flight) = self.in_flight.as_mut()
            && flight.ticket == Some(ticket)
        {
            flight.ticket = None;
            self.live -= 1;
        }
    }

    /// Bytes retained since the last extracted frame.
    pub fn buffered(&self) -> &[u8] {
        &self.rx
    }

    /// Number of commands waiting behind the in-flight slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    fn extract_frames(&mut self) {
        while let Some((start, frame)) = self.find_frame() {
            let end = start + FRAME_SIZE;
            if start > 0 || self.rx.len() > end {
                debug!(
                    "Discarded junk in data, '{}' before, '{}' after",
                    Dump(&self.rx[..start]),
                    Dump(&self.rx[end..])
                );
            }
            self.consume(end);
            self.on_frame(frame);
        }
    }

    fn find_frame(&self) -> Option<(usize, Frame)> {
        let buf = &self.rx[..];
        if buf.len() < FRAME_SIZE {
            return None;
        }
        for start in 0..=buf.len() - FRAME_SIZE {
            let candidate = &buf[start..start + FRAME_SIZE];
            if candidate[0] != SOF || candidate[FRAME_SIZE - 1] != EOF {
                continue;
            }
            match frame::decode(candidate, true) {
                Ok(frame) => {
                    debug!("     >>>  {} - {}", Dump(candidate), FrameText {
                        frame: &frame,
                        item_name: self.profile.item_name,
                    });
                    return Some((start, frame));
                }
                Err(e) => debug!("Decode failure at {}: {}", start, e),
            }
        }
        None
    }

    fn on_frame(&mut self, frame: Frame) {
        let Some(flight) = self.in_flight.take() else {
            debug!("-IGNORED- {}", FrameText {
                frame: &frame,
                item_name: self.profile.item_name,
            });
            return;
        };
        let outcome = if frame.command == command::ACK_RS && frame.item != response::ACK_OK {
            Err(CommandError::Nak(frame.item))
        } else if frame::command_name(frame.command).is_none() {
            Err(CommandError::UnexpectedResponse(frame.command))
        } else {
            Ok(Reply::Data(frame.data))
        };
        self.resolve(flight.ticket, outcome);
    }

    fn resolve(&mut self, ticket: Option<Ticket>, outcome: Outcome) {
        if let Some(ticket) = ticket {
            // Bounded by `live`, so there is always room.
            let _ = self.outcomes.push((ticket, outcome));
        }
    }

    fn consume(&mut self, n: usize) {
        let len = self.rx.len();
        self.rx.copy_within(n..len, 0);
        self.rx.truncate(len - n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode;

    const POWER: u16 = 0x0102;
    const ERROR: u16 = 0x0101;
    const IR_ON: u16 = 0x172E;

    fn profile() -> Profile {
        Profile {
            fire_class: |item| item & 0xFF00 == 0x1700,
            item_name: |_| None,
        }
    }

    fn engine() -> Engine<4> {
        Engine::new(profile(), DEFAULT_TIMEOUT)
    }

    fn t(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_single_in_flight() {
        let mut engine = engine();
        let first = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        let second = engine.submit(Frame::new(ERROR, command::GET_RQ, 0)).unwrap();

        assert_eq!(
            engine.poll_transmit(t(0)),
            Some(encode(POWER, command::GET_RQ, 0))
        );
        assert_eq!(engine.poll_transmit(t(0)), None);
        assert_eq!(engine.queued(), 1);

        engine.on_bytes_received(&encode(POWER, command::GET_RS, 3));
        assert_eq!(engine.take_outcome(first), Some(Ok(Reply::Data(3))));
        assert_eq!(engine.take_outcome(second), None);

        assert_eq!(
            engine.poll_transmit(t(10)),
            Some(encode(ERROR, command::GET_RQ, 0))
        );
        engine.on_bytes_received(&encode(ERROR, command::GET_RS, 0));
        assert_eq!(engine.take_outcome(second), Some(Ok(Reply::Data(0))));
    }

    #[test]
    fn test_fire_class_resolves_on_transmit() {
        let mut engine = engine();
        let fire = engine.submit(Frame::new(IR_ON, command::SET_RQ, 0)).unwrap();
        let query = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();

        assert!(engine.poll_transmit(t(0)).is_some());
        assert_eq!(engine.take_outcome(fire), Some(Ok(Reply::Sent)));
        assert!(!engine.is_in_flight());

        assert_eq!(
            engine.poll_transmit(t(0)),
            Some(encode(POWER, command::GET_RQ, 0))
        );
        assert!(engine.is_in_flight());
        assert_eq!(engine.take_outcome(query), None);
    }

    #[test]
    fn test_timeout_advances_queue() {
        let mut engine = engine();
        let first = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        let second = engine.submit(Frame::new(ERROR, command::GET_RQ, 0)).unwrap();

        assert!(engine.poll_transmit(t(100)).is_some());
        assert_eq!(engine.deadline(), Some(t(3600)));

        engine.on_deadline(t(3599));
        assert_eq!(engine.take_outcome(first), None);

        engine.on_deadline(t(3600));
        assert_eq!(engine.take_outcome(first), Some(Err(CommandError::Timeout)));
        assert_eq!(
            engine.poll_transmit(t(3600)),
            Some(encode(ERROR, command::GET_RQ, 0))
        );
        assert_eq!(engine.take_outcome(second), None);
    }

    #[test]
    fn test_resync_over_junk() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        let mut bytes = std::vec![0x00, 0xA9, 0x13, 0x9A, 0x55];
        bytes.extend_from_slice(&encode(POWER, command::GET_RS, 8));
        bytes.extend_from_slice(&[0xA9, 0x01, 0x77]);
        engine.on_bytes_received(&bytes);

        assert_eq!(engine.take_outcome(ticket), Some(Ok(Reply::Data(8))));
        assert_eq!(engine.buffered(), &[0xA9, 0x01, 0x77]);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        let reply = encode(POWER, command::GET_RS, 3);
        engine.on_bytes_received(&reply[..3]);
        assert_eq!(engine.take_outcome(ticket), None);
        engine.on_bytes_received(&reply[3..]);
        assert_eq!(engine.take_outcome(ticket), Some(Ok(Reply::Data(3))));
        assert!(engine.buffered().is_empty());
    }

    #[test]
    fn test_marker_lookalike_with_bad_checksum_is_skipped() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        let mut bogus = encode(POWER, command::GET_RS, 3);
        bogus[6] = 0x00;
        let mut bytes = std::vec::Vec::from(bogus);
        bytes.extend_from_slice(&encode(POWER, command::GET_RS, 4));
        engine.on_bytes_received(&bytes);

        assert_eq!(engine.take_outcome(ticket), Some(Ok(Reply::Data(4))));
    }

    #[test]
    fn test_nak_fails_command() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(0x0999, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        engine.on_bytes_received(&encode(response::NAK_UNKNOWN_COMMAND, command::ACK_RS, 0));
        assert_eq!(
            engine.take_outcome(ticket),
            Some(Err(CommandError::Nak(response::NAK_UNKNOWN_COMMAND)))
        );
    }

    #[test]
    fn test_ack_ok_resolves_with_data() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(0x0002, command::SET_RQ, 1)).unwrap();
        engine.poll_transmit(t(0));

        engine.on_bytes_received(&encode(response::ACK_OK, command::ACK_RS, 0));
        assert_eq!(engine.take_outcome(ticket), Some(Ok(Reply::Data(0))));
    }

    #[test]
    fn test_unsolicited_frame_is_ignored() {
        let mut engine = engine();
        engine.on_bytes_received(&encode(POWER, command::GET_RS, 3));
        assert!(engine.buffered().is_empty());

        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));
        assert_eq!(engine.take_outcome(ticket), None);
        assert!(engine.is_in_flight());
    }

    #[test]
    fn test_queue_full() {
        let mut engine = engine();
        for _ in 0..4 {
            engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        }
        assert_eq!(
            engine.submit(Frame::new(POWER, command::GET_RQ, 0)),
            Err(CommandError::QueueFull)
        );
    }

    #[test]
    fn test_abandon_queued_and_in_flight() {
        let mut engine = engine();
        let first = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        let second = engine.submit(Frame::new(ERROR, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        engine.abandon(second);
        assert_eq!(engine.queued(), 0);

        engine.abandon(first);
        assert!(engine.is_in_flight());

        // The late reply still frees the slot but nobody collects it.
        engine.on_bytes_received(&encode(POWER, command::GET_RS, 3));
        assert!(!engine.is_in_flight());
        assert_eq!(engine.take_outcome(first), None);

        for _ in 0..4 {
            engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        }
    }

    #[test]
    fn test_abandon_uncollected_outcome_frees_slot() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));
        engine.on_bytes_received(&encode(POWER, command::GET_RS, 3));

        engine.abandon(ticket);
        assert_eq!(engine.take_outcome(ticket), None);
        for _ in 0..4 {
            engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        }
    }

    #[test]
    fn test_noise_does_not_overflow_buffer() {
        let mut engine = engine();
        let ticket = engine.submit(Frame::new(POWER, command::GET_RQ, 0)).unwrap();
        engine.poll_transmit(t(0));

        let noise = [0x5Au8; 200];
        engine.on_bytes_received(&noise);
        assert!(engine.buffered().len() <= RX_CAPACITY);

        engine.on_bytes_received(&encode(POWER, command::GET_RS, 1));
        assert_eq!(engine.take_outcome(ticket), Some(Ok(Reply::Data(1))));
    }
}
