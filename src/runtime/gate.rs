use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Waiters tracked at once: the status loop, the router and one spare.
const MAX_WAITERS: usize = 4;

struct GateState {
    set: bool,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

/// Level-triggered latch that is set once the discovery document is out.
///
/// [`wait`](Self::wait) resolves immediately while the gate is set, so late
/// waiters never miss it.
pub struct ReadinessGate {
    state: Mutex<NoopRawMutex, RefCell<GateState>>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                set: false,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    pub fn set(&self) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            state.set = true;
            state.waiters.wake();
        });
    }

    pub fn clear(&self) {
        self.state.lock(|cell| cell.borrow_mut().set = false);
    }

    pub fn is_set(&self) -> bool {
        self.state.lock(|cell| cell.borrow().set)
    }

    pub async fn wait(&self) {
        poll_fn(|cx| {
            self.state.lock(|cell| {
                let mut state = cell.borrow_mut();
                if state.set {
                    Poll::Ready(())
                } else {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::join::join;
    use embassy_futures::select::{Either, select};
    use futures::executor::block_on;

    #[test]
    fn test_wait_resolves_while_set() {
        let gate = ReadinessGate::new();
        gate.set();
        block_on(gate.wait());
        block_on(gate.wait());
        assert!(gate.is_set());
    }

    #[test]
    fn test_clear_blocks_waiters_again() {
        let gate = ReadinessGate::new();
        gate.set();
        gate.clear();
        let outcome = block_on(select(gate.wait(), async {}));
        assert!(matches!(outcome, Either::Second(())));
    }

    #[test]
    fn test_set_releases_every_waiter() {
        let gate = ReadinessGate::new();
        block_on(async {
            let waiters = join(gate.wait(), gate.wait());
            let setter = async {
                embassy_futures::yield_now().await;
                gate.set();
            };
            join(waiters, setter).await;
        });
        assert!(gate.is_set());
    }
}
