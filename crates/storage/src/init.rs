//! One-shot initialization gate.
//!
//! An engine moves `Uninitialized → Initializing → Ready` exactly once. The
//! first caller of [`InitGate::initialize`] claims the `Initializing` state
//! and publishes the value; every later caller waits out the short
//! `Initializing` window and then returns without effect. Readers see the
//! value only after it is fully published.

use std::sync::{
    OnceLock,
    atomic::{AtomicU8, Ordering},
};

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

/// Observable state of an [`InitGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    /// `initialize` has not been called.
    Uninitialized,
    /// A caller is publishing the value.
    Initializing,
    /// The value is available.
    Ready,
}

/// Tri-state gate holding a value published once.
#[derive(Debug)]
pub struct InitGate<T> {
    state: AtomicU8,
    value: OnceLock<T>,
}

impl<T> Default for InitGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InitGate<T> {
    /// Creates a gate in the `Uninitialized` state.
    #[must_use]
    pub const fn new() -> Self {
        Self { state: AtomicU8::new(UNINITIALIZED), value: OnceLock::new() }
    }

    /// Publishes `value` if nobody has yet. Returns `true` for the caller that
    /// won the transition.
    ///
    /// Losers return only once the winner's value is visible, so `get`
    /// succeeds on every thread after `initialize` returns.
    pub fn initialize(&self, value: T) -> bool {
        if self
            .state
            .compare_exchange(UNINITIALIZED, INITIALIZING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.wait_ready();
            return false;
        }

        // Only the winner of the exchange reaches this point, so `set` succeeds.
        let _ = self.value.set(value);
        self.state.store(READY, Ordering::Release);
        true
    }

    /// Returns the published value, or `None` until the gate is `Ready`.
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY { self.value.get() } else { None }
    }

    /// Spins while another caller is publishing, then returns the value.
    ///
    /// Returns `None` immediately if nobody has started initializing.
    pub fn wait_ready(&self) -> Option<&T> {
        // Initializing always ends in Ready; the winner holds no lock.
        while self.state.load(Ordering::Acquire) == INITIALIZING {
            std::hint::spin_loop();
        }
        self.get()
    }

    /// Returns the current state.
    pub fn state(&self) -> InitState {
        match self.state.load(Ordering::Acquire) {
            UNINITIALIZED => InitState::Uninitialized,
            INITIALIZING => InitState::Initializing,
            _ => InitState::Ready,
        }
    }
}
