//! Thread-safe submission into a running event loop.
//!
//! The loop's collections are owned by the loop thread alone. Other threads
//! submit work through this handle: each call enqueues a [`Submission`] on
//! an internally synchronized channel and wakes a blocked I/O wait, and the
//! loop drains the channel at the top of its next iteration.

use crate::reactor::core::{CallbackId, EventLoop};
use crate::reactor::poller::Waker;
use crate::reactor::time::TimeEventId;

use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub(crate) enum Submission {
    AddCallback(CallbackId, Box<dyn FnOnce(&mut EventLoop) + Send>),
    RemoveCallback(CallbackId),
    AddTimeEvent(TimeEventId, Instant, Box<dyn FnOnce(&mut EventLoop) + Send>),
    RemoveTimeEvent(TimeEventId),
    Stop,
}

/// Clonable, `Send` handle to an [`EventLoop`].
///
/// Ids are minted from the same counter the loop itself uses, so work
/// submitted from any thread can later be removed from any thread.
///
/// # Example
/// ```ignore
/// let handle = event_loop.handle();
/// std::thread::spawn(move || {
///     handle.add_callback(|event_loop| event_loop.stop());
/// });
/// event_loop.start();
/// ```
#[derive(Clone)]
pub struct EventLoopHandle {
    transmitter: Sender<Submission>,
    waker: Waker,
    next_id: Arc<AtomicU64>,
}

impl EventLoopHandle {
    pub(crate) fn new(
        transmitter: Sender<Submission>,
        waker: Waker,
        next_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            transmitter,
            waker,
            next_id,
        }
    }

    /// Schedules a callback for the loop's next iteration.
    pub fn add_callback(
        &self,
        callback: impl FnOnce(&mut EventLoop) + Send + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.mint_id());
        self.submit(Submission::AddCallback(id, Box::new(callback)));

        id
    }

    /// Removes a pending callback before it runs. Unknown ids are ignored.
    pub fn remove_callback(&self, id: CallbackId) {
        self.submit(Submission::RemoveCallback(id));
    }

    /// Schedules a callback to run once the deadline has passed.
    pub fn add_time_event(
        &self,
        deadline: Instant,
        callback: impl FnOnce(&mut EventLoop) + Send + 'static,
    ) -> TimeEventId {
        let id = TimeEventId(self.mint_id());
        self.submit(Submission::AddTimeEvent(id, deadline, Box::new(callback)));

        id
    }

    /// Removes a pending time event before it fires. Unknown ids are
    /// ignored.
    pub fn remove_time_event(&self, id: TimeEventId) {
        self.submit(Submission::RemoveTimeEvent(id));
    }

    /// Stops the loop after its current iteration completes.
    pub fn stop(&self) {
        self.submit(Submission::Stop);
    }

    fn submit(&self, submission: Submission) {
        // A send fails only when the loop and its channel are gone, in which
        // case there is nothing left to notify.
        let _ = self.transmitter.send(submission);
        self.waker.wake();
    }

    fn mint_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
