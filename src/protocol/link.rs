//! # Serial Link
//!
//! Async front end of the [`Engine`]. A `SerialLink` is shared by reference
//! between the task that pumps the byte stream ([`SerialLink::run`]) and any
//! number of callers issuing commands ([`SerialLink::send`]). Everything runs
//! on one executor; the engine sits in a `NoopRawMutex` cell that is never
//! held across an await.

use core::cell::RefCell;
use core::convert::Infallible;
use core::future::poll_fn;
use core::task::Poll;

use embassy_futures::select::{Either3, select3};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time::{Duration, Instant, Timer};
use embedded_io_async::{Read, Write};

use super::engine::{DEFAULT_TIMEOUT, Engine, Profile, Reply, Ticket};
use super::frame::Frame;
use crate::error::{CommandError, LinkError};

/// Maximum number of bytes pulled from the stream per read.
const READ_CHUNK: usize = 32;

struct LinkState<const DEPTH: usize> {
    engine: Engine<DEPTH>,
    waiters: MultiWakerRegistration<DEPTH>,
}

/// Shared handle to one serial device.
///
/// `DEPTH` is the number of commands that may be outstanding at once.
pub struct SerialLink<const DEPTH: usize = 8> {
    state: Mutex<NoopRawMutex, RefCell<LinkState<DEPTH>>>,
    kick: Signal<NoopRawMutex, ()>,
}

impl<const DEPTH: usize> SerialLink<DEPTH> {
    /// Creates a link with the default 3.5 s reply deadline.
    pub fn new(profile: Profile) -> Self {
        Self::with_timeout(profile, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(profile: Profile, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(RefCell::new(LinkState {
                engine: Engine::new(profile, timeout),
                waiters: MultiWakerRegistration::new(),
            })),
            kick: Signal::new(),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LinkState<DEPTH>) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Queues a command and waits for its completion.
    ///
    /// Fire-class commands complete once written; everything else completes
    /// with the device's reply, a NAK, or a timeout. Dropping the returned
    /// future abandons the command.
    pub async fn send(&self, item: u16, cmd: u8, data: u16) -> Result<Reply, CommandError> {
        let ticket = self.with_state(|s| s.engine.submit(Frame::new(item, cmd, data)))?;
        self.kick.signal(());

        let pending = Pending {
            link: self,
            ticket,
            done: false,
        };
        pending.wait().await
    }

    /// Drives the byte stream: writes queued commands, feeds received bytes
    /// into the engine and fires reply deadlines.
    ///
    /// Only returns on a stream failure. The stream's `read` must be
    /// cancel-safe; it is raced against new commands and deadlines.
    pub async fn run<S>(&self, stream: &mut S) -> Result<Infallible, LinkError<S::Error>>
    where
        S: Read + Write,
    {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            while let Some(bytes) = self.with_state(|s| s.engine.poll_transmit(Instant::now())) {
                stream.write_all(&bytes).await.map_err(LinkError::Io)?;
                stream.flush().await.map_err(LinkError::Io)?;
                self.wake_waiters();
            }

            let deadline = self.with_state(|s| s.engine.deadline());
            let expiry = async move {
                match deadline {
                    Some(at) => Timer::at(at).await,
                    None => core::future::pending::<()>().await,
                }
            };

            let event = select3(stream.read(&mut buf), self.kick.wait(), expiry).await;
            match event {
                Either3::First(Ok(0)) => return Err(LinkError::Closed),
                Either3::First(Ok(n)) => {
                    self.with_state(|s| s.engine.on_bytes_received(&buf[..n]));
                }
                Either3::First(Err(e)) => return Err(LinkError::Io(e)),
                Either3::Second(()) => {}
                Either3::Third(()) => {
                    self.with_state(|s| s.engine.on_deadline(Instant::now()));
                }
            }
            self.wake_waiters();
        }
    }

    fn wake_waiters(&self) {
        self.with_state(|s| s.waiters.wake());
    }
}

/// Completion handle of one submitted command.
struct Pending<'a, const DEPTH: usize> {
    link: &'a SerialLink<DEPTH>,
    ticket: Ticket,
    done: bool,
}

impl<const DEPTH: usize> Pending<'_, DEPTH> {
    async fn wait(mut self) -> Result<Reply, CommandError> {
        let outcome = poll_fn(|cx| {
            self.link.with_state(|s| match s.engine.take_outcome(self.ticket) {
                Some(outcome) => Poll::Ready(outcome),
                None => {
                    s.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await;
        self.done = true;
        outcome
    }
}

impl<const DEPTH: usize> Drop for Pending<'_, DEPTH> {
    fn drop(&mut self) {
        if !self.done {
            let ticket = self.ticket;
            self.link.with_state(|s| s.engine.abandon(ticket));
        }
    }
}
