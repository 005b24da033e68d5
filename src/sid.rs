//! Stream-identifier allocation and exactly-once release.
//!
//! Every in-flight request on a connection is tagged with a 16-bit stream
//! id. The manager serialises allocation internally; the handler keeps its
//! id inside a [`SidHolder`] guard so the release happens exactly once on
//! any terminal path, including early drops.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, Weak},
};

use log::warn;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct SidState {
    next: u16,
    in_flight: HashSet<u16>,
}

/// Per-connection stream-id allocator.
#[derive(Debug, Default)]
pub struct SidManager {
    state: Mutex<SidState>,
}

impl SidManager {
    /// Create a fresh manager.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Allocate an unused stream id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Uninitialized`] when every id is in flight.
    pub fn allocate(&self) -> Result<u16> {
        let mut state = self.lock();
        if state.in_flight.len() == usize::from(u16::MAX) + 1 {
            return Err(Error::Uninitialized("stream id space exhausted"));
        }
        loop {
            let candidate = state.next;
            state.next = state.next.wrapping_add(1);
            if state.in_flight.insert(candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Release a previously allocated stream id.
    ///
    /// Releasing an id that is not in flight is a bookkeeping bug and is
    /// logged rather than propagated.
    pub fn release(&self, sid: u16) {
        if !self.lock().in_flight.remove(&sid) {
            warn!("released stream id that was not in flight: sid={sid}");
        }
    }

    /// Number of ids currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize { self.lock().in_flight.len() }

    fn lock(&self) -> std::sync::MutexGuard<'_, SidState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Guard tying an allocated stream id to its manager.
///
/// The id is released when [`release`](Self::release) is called or when the
/// guard drops, whichever happens first; double release cannot occur.
#[derive(Debug)]
pub struct SidHolder {
    manager: Weak<SidManager>,
    sid: u16,
    released: bool,
}

impl SidHolder {
    /// Adopt an allocated id.
    #[must_use]
    pub fn new(manager: &Arc<SidManager>, sid: u16) -> Self {
        Self {
            manager: Arc::downgrade(manager),
            sid,
            released: false,
        }
    }

    /// The held stream id.
    #[must_use]
    pub const fn sid(&self) -> u16 { self.sid }

    /// Release the id back to the manager.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(manager) = self.manager.upgrade() {
            manager.release(self.sid);
        }
    }
}

impl Drop for SidHolder {
    fn drop(&mut self) { self.release(); }
}
