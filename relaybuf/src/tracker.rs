//! Per-message retry bookkeeping
//!
//! A [`Tracker`] is created the first time a message enters the producer while
//! retry tracking is enabled. The message only carries a [`TrackingId`]; the
//! tracker itself lives in the [`TrackerTable`] and is shared through an `Arc`
//! between the caller blocked in `sync_produce` and the delivery callback.
//!
//! The completion slot is a single-slot channel re-created for every send
//! attempt. At most one waiter may hold its receiver at a time, so a tracked
//! message must never be synchronously produced from two threads at once.

use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::BrokerError;
use crate::message::{Message, TrackingId};

/// Which path owns resending a tracked message after a delivery failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    /// The blocked `sync_produce` loop resends it
    Sync,
    /// The delivery callback re-enqueues it into the retry queue
    Async,
}

/// Result of one delivery attempt, as seen by a synchronous waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Delivered,
    Retry,
    Dropped(BrokerError),
}

#[derive(Debug)]
struct TrackerState {
    sender: SenderKind,
    remaining_retries: usize,
    completion: Option<Sender<Outcome>>,
}

#[derive(Debug)]
pub(crate) struct Tracker {
    id: TrackingId,
    state: Mutex<TrackerState>,
}

impl Tracker {
    fn new(id: TrackingId, sender: SenderKind, remaining_retries: usize) -> Self {
        Self {
            id,
            state: Mutex::new(TrackerState {
                sender,
                remaining_retries,
                completion: None,
            }),
        }
    }

    pub fn id(&self) -> TrackingId {
        self.id
    }

    /// Hand resend responsibility to another path
    pub fn set_sender(&self, sender: SenderKind) {
        self.state.lock().sender = sender;
    }

    pub fn remaining_retries(&self) -> usize {
        self.state.lock().remaining_retries
    }

    /// Spend one retry from the budget.
    ///
    /// Returns the sender kind that owns the resend, or `None` once the budget
    /// is exhausted.
    pub fn claim_retry(&self) -> Option<SenderKind> {
        let mut state = self.state.lock();
        if state.remaining_retries == 0 {
            return None;
        }
        state.remaining_retries -= 1;
        Some(state.sender)
    }

    /// Install a fresh completion slot for the next attempt
    pub fn arm(&self) -> Receiver<Outcome> {
        let (tx, rx) = channel::bounded(1);
        self.state.lock().completion = Some(tx);
        rx
    }

    /// Resolve the armed slot, if any. Unarmed trackers ignore the outcome.
    pub fn complete(&self, outcome: Outcome) {
        let completion = self.state.lock().completion.take();
        if let Some(tx) = completion {
            // The waiter may have given up; nothing to do then.
            let _ = tx.try_send(outcome);
        }
    }
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(0);

/// Side table from tracking id to tracker.
///
/// Every table issues ids under its own scope, so an id minted by another
/// producer never resolves here.
#[derive(Debug)]
pub(crate) struct TrackerTable {
    scope: u64,
    next_id: AtomicU64,
    trackers: DashMap<TrackingId, Arc<Tracker>>,
}

impl Default for TrackerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerTable {
    pub fn new() -> Self {
        Self {
            scope: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
            next_id: AtomicU64::new(0),
            trackers: DashMap::new(),
        }
    }

    /// Return the message's tracker, creating one if it has none yet.
    ///
    /// An existing tracker is never replaced; `sender` and `max_retries` only
    /// apply to newly created trackers. A stale or foreign id is overwritten.
    pub fn attach(
        &self,
        message: &mut Message,
        sender: SenderKind,
        max_retries: usize,
    ) -> Arc<Tracker> {
        if let Some(tracker) = self.get(message) {
            return tracker;
        }

        let id = TrackingId::new(self.scope, self.next_id.fetch_add(1, Ordering::Relaxed));
        message.set_tracking_id(id);
        let tracker = Arc::new(Tracker::new(id, sender, max_retries));
        self.trackers.insert(id, Arc::clone(&tracker));
        tracker
    }

    pub fn get(&self, message: &Message) -> Option<Arc<Tracker>> {
        let id = message.tracking_id().filter(|id| id.scope() == self.scope)?;
        self.trackers.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Forget the tracker of a message that reached a terminal outcome
    pub fn release(&self, message: &Message) {
        if let Some(id) = message.tracking_id().filter(|id| id.scope() == self.scope) {
            self.trackers.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }
}
