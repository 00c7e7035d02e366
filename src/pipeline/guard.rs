//! In-flight request guard.
//!
//! One request at a time. Each accepted request gets a ticket stamped with
//! a generation number; only the ticket matching the current generation
//! may publish its result or clear the processing state. A ticket from an
//! abandoned request can therefore never overwrite a fresher result.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

#[derive(Debug)]
struct GuardState<T> {
    generation: u64,
    in_flight: Option<u64>,
    latest: Option<T>,
}

#[derive(Debug)]
pub struct RequestGuard<T> {
    state: Arc<Mutex<GuardState<T>>>,
}

impl<T> Default for RequestGuard<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestGuard<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GuardState {
                generation: 0,
                in_flight: None,
                latest: None,
            })),
        }
    }

    /// Start a request. `None` while another one is still in flight.
    pub fn begin(&self) -> Option<RequestTicket<T>> {
        let mut state = lock(&self.state);
        if state.in_flight.is_some() {
            return None;
        }
        state.generation += 1;
        state.in_flight = Some(state.generation);
        debug!(generation = state.generation, "Request started");

        Some(RequestTicket {
            generation: state.generation,
            state: Arc::clone(&self.state),
            settled: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Abandon whatever is in flight. Its ticket becomes stale.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.in_flight = None;
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }
}

impl<T: Clone> RequestGuard<T> {
    /// Most recent result published by a current ticket.
    pub fn latest(&self) -> Option<T> {
        lock(&self.state).latest.clone()
    }
}

/// Proof that a request was accepted by a [`RequestGuard`].
///
/// Dropping an unfinished ticket clears the processing state (if still
/// current) without publishing anything.
#[derive(Debug)]
pub struct RequestTicket<T> {
    generation: u64,
    state: Arc<Mutex<GuardState<T>>>,
    settled: bool,
}

impl<T> RequestTicket<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self) -> bool {
        lock(&self.state).in_flight == Some(self.generation)
    }

    /// Publish `value` and clear the processing state.
    ///
    /// Returns `false` (and discards `value`) if the ticket is stale.
    pub fn finish(mut self, value: T) -> bool {
        self.settled = true;
        let mut state = lock(&self.state);
        if state.in_flight != Some(self.generation) {
            debug!(
                generation = self.generation,
                current = state.generation,
                "Discarding stale result"
            );
            return false;
        }
        state.in_flight = None;
        state.latest = Some(value);
        true
    }
}

impl<T> Drop for RequestTicket<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = lock(&self.state);
        if state.in_flight == Some(self.generation) {
            state.in_flight = None;
        }
    }
}

/// The guarded data stays consistent across a panic, so a poisoned lock
/// is recovered rather than propagated.
fn lock<T>(state: &Mutex<GuardState<T>>) -> MutexGuard<'_, GuardState<T>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
