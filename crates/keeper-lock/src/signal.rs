//! Re-armable wait signal
//!
//! A `WaitSignal` is fired by the watch dispatcher whenever the lock node is
//! removed. Waiters hold a `SignalWaiter`, re-arm it before every create
//! attempt and then wait. Fires are counted by generation, so a release that
//! lands between the re-arm and the wait is observed instead of lost.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SignalState {
    generation: u64,
    closed: bool,
}

/// Outcome of waiting on a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The signal fired since the waiter was last armed
    Fired,
    /// No further fires will arrive
    Closed,
}

#[derive(Debug)]
pub struct WaitSignal {
    state: watch::Sender<SignalState>,
}

impl WaitSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SignalState::default());
        Self { state }
    }

    /// Wake every waiter.
    pub fn fire(&self) {
        self.state.send_modify(|s| s.generation += 1);
    }

    /// Wake every waiter for the last time.
    pub fn close(&self) {
        self.state.send_modify(|s| s.closed = true);
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    pub fn waiter(&self) -> SignalWaiter {
        SignalWaiter {
            rx: self.state.subscribe(),
        }
    }
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// One waiter's view of a `WaitSignal`.
#[derive(Debug)]
pub struct SignalWaiter {
    rx: watch::Receiver<SignalState>,
}

impl SignalWaiter {
    /// Treat every fire so far as consumed.
    pub fn arm(&mut self) {
        self.rx.borrow_and_update();
    }

    /// Wait for a fire after the last `arm`. Returns at once if one already
    /// happened.
    pub async fn wait(&mut self) -> Wake {
        if self.rx.borrow().closed {
            return Wake::Closed;
        }
        match self.rx.changed().await {
            Ok(()) => {
                if self.rx.borrow_and_update().closed {
                    Wake::Closed
                } else {
                    Wake::Fired
                }
            }
            Err(_) => Wake::Closed,
        }
    }
}
