//! The event loop: a forever loop that handles deferred callbacks, time
//! events, and socket I/O events in that order, once per iteration.
//!
//! A loop is an explicitly constructed, long-lived instance passed by
//! reference to everything that needs it. Exactly one thread runs
//! [`EventLoop::start`]; that thread alone touches the registry, the caches,
//! and the handler fields of any connection. Other threads reach the loop
//! through [`EventLoopHandle`](crate::reactor::handle::EventLoopHandle),
//! which wakes a blocked I/O wait on every submission.

use crate::net::accept::AcceptManager;
use crate::net::connection::Connection;
use crate::reactor::handle::{EventLoopHandle, Submission};
use crate::reactor::poller::{Poller, Ready};
use crate::reactor::time::{TimeEventId, TimeEventQueue};

use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A deferred zero-argument unit of work. Two callbacks are distinct even if
/// behaviorally identical; each registration gets its own id.
pub type Callback = Box<dyn FnOnce(&mut EventLoop)>;

/// Identity of a pending callback, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub(crate) u64);

/// What a registered file descriptor dispatches to.
pub(crate) enum Entry {
    Listener(AcceptManager),
    Client(Connection),
}

pub struct EventLoop {
    pub(crate) poller: Poller,
    pub(crate) registry: HashMap<RawFd, Entry>,
    pub(crate) max_cache_bytes: usize,
    callbacks: BTreeMap<CallbackId, Callback>,
    time_events: TimeEventQueue,
    submissions: Receiver<Submission>,
    submitter: Sender<Submission>,
    next_id: Arc<AtomicU64>,
    poll_timeout: Duration,
    running: bool,
    stop_requested: bool,
}

impl EventLoop {
    /// Default upper bound for one I/O wait when nothing is pending.
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(3000);

    /// Creates a loop with default configuration. Use
    /// [`EventLoopBuilder`](crate::builder::EventLoopBuilder) to customize.
    pub fn new() -> Result<Self, crate::error::Error> {
        crate::builder::EventLoopBuilder::new().build()
    }

    pub(crate) fn with_config(
        poll_timeout: Duration,
        max_cache_bytes: usize,
    ) -> Result<Self, crate::error::Error> {
        let poller = Poller::new()?;
        let (submitter, submissions) = crossbeam_channel::unbounded();

        Ok(Self {
            poller,
            registry: HashMap::new(),
            max_cache_bytes,
            callbacks: BTreeMap::new(),
            time_events: TimeEventQueue::new(),
            submissions,
            submitter,
            next_id: Arc::new(AtomicU64::new(1)),
            poll_timeout,
            running: false,
            stop_requested: false,
        })
    }

    /// Returns a thread-safe handle for submitting work from other threads.
    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle::new(
            self.submitter.clone(),
            self.poller.waker(),
            self.next_id.clone(),
        )
    }

    /// Runs the loop until [`Self::stop`] is called.
    ///
    /// A stop issued while the loop was not running cancels this call: it
    /// clears the pending stop and returns without running an iteration.
    pub fn start(&mut self) {
        if self.stop_requested {
            self.stop_requested = false;
            return;
        }

        self.running = true;
        loop {
            let mut timeout = self.poll_timeout;

            self.drain_submissions();
            timeout = self.run_pending_callbacks(timeout);
            timeout = self.run_due_time_events(timeout);

            if !self.running {
                break;
            }

            self.poll_io(timeout);
        }

        // Reset the stop flag so another start/stop pair can be issued.
        self.stop_requested = false;
    }

    /// Stops the loop after the current iteration completes. If the loop is
    /// not running, the next call to [`Self::start`] returns immediately.
    pub fn stop(&mut self) {
        self.running = false;
        self.stop_requested = true;
        self.poller.wake();
    }

    /// Schedules a callback to run on the next loop iteration.
    pub fn add_callback(&mut self, callback: impl FnOnce(&mut EventLoop) + 'static) -> CallbackId {
        let id = CallbackId(self.mint_id());
        self.callbacks.insert(id, Box::new(callback));
        // New work must be observed promptly even if the loop thread is
        // about to block.
        self.poller.wake();

        id
    }

    /// Removes a pending callback before it runs. Unknown ids are ignored.
    pub fn remove_callback(&mut self, id: CallbackId) {
        self.callbacks.remove(&id);
    }

    /// Schedules a callback to run once the deadline has passed.
    pub fn add_time_event(
        &mut self,
        deadline: Instant,
        callback: impl FnOnce(&mut EventLoop) + 'static,
    ) -> TimeEventId {
        let id = TimeEventId(self.mint_id());
        self.time_events.push(id, deadline, Box::new(callback));

        id
    }

    /// Removes a pending time event before it fires. Unknown ids are
    /// ignored.
    pub fn remove_time_event(&mut self, id: TimeEventId) {
        self.time_events.cancel(id);
    }

    /// File descriptors of all currently registered client connections.
    pub fn client_file_descriptors(&self) -> Vec<RawFd> {
        self.registry
            .iter()
            .filter_map(|(file_descriptor, entry)| match entry {
                Entry::Client(_) => Some(*file_descriptor),
                Entry::Listener(_) => None,
            })
            .collect()
    }

    /// Runs `f` with mutable access to both the loop and one registered
    /// connection.
    ///
    /// The connection is detached from the registry for the duration of the
    /// call and reattached afterwards unless it was closed. Returns `None`
    /// if the descriptor does not name a live client connection.
    pub fn with_connection<R>(
        &mut self,
        file_descriptor: RawFd,
        f: impl FnOnce(&mut EventLoop, &mut Connection) -> R,
    ) -> Option<R> {
        let mut connection = match self.registry.remove(&file_descriptor) {
            Some(Entry::Client(connection)) => connection,
            Some(entry) => {
                self.registry.insert(file_descriptor, entry);
                return None;
            }
            None => return None,
        };

        let result = f(self, &mut connection);

        if !connection.is_closed() {
            self.registry
                .insert(file_descriptor, Entry::Client(connection));
        }

        Some(result)
    }

    /// Tears down one registered client connection.
    pub fn close_connection(&mut self, file_descriptor: RawFd) {
        self.with_connection(file_descriptor, |event_loop, connection| {
            connection.close(event_loop);
        });
    }

    /// Moves cross-thread submissions into the loop-local collections.
    fn drain_submissions(&mut self) {
        while let Ok(submission) = self.submissions.try_recv() {
            match submission {
                Submission::AddCallback(id, callback) => {
                    let callback: Callback = callback;
                    self.callbacks.insert(id, callback);
                }
                Submission::RemoveCallback(id) => {
                    self.callbacks.remove(&id);
                }
                Submission::AddTimeEvent(id, deadline, callback) => {
                    let callback: Callback = callback;
                    self.time_events.push(id, deadline, callback);
                }
                Submission::RemoveTimeEvent(id) => {
                    self.time_events.cancel(id);
                }
                Submission::Stop => {
                    self.running = false;
                    self.stop_requested = true;
                }
            }
        }
    }

    /// Runs the callbacks pending at the start of this iteration.
    ///
    /// The id set is snapshotted first: a callback registered while this
    /// phase runs executes on the next iteration, so continuously arriving
    /// callbacks cannot starve I/O. Each callback is removed from the live
    /// set before it runs, which makes re-adding itself safe.
    fn run_pending_callbacks(&mut self, timeout: Duration) -> Duration {
        let snapshot: Vec<CallbackId> = self.callbacks.keys().copied().collect();
        for id in snapshot {
            if let Some(callback) = self.callbacks.remove(&id) {
                callback(self);
            }
        }

        // If anything new arrived, do not wait in the next poll before
        // running it.
        if self.callbacks.is_empty() {
            timeout
        } else {
            Duration::ZERO
        }
    }

    /// Fires every time event due at or before now, then clamps the poll
    /// timeout to the earliest remaining deadline.
    fn run_due_time_events(&mut self, timeout: Duration) -> Duration {
        let now = Instant::now();
        while let Some(callback) = self.time_events.pop_due(now) {
            callback(self);
        }

        match self.time_events.next_deadline() {
            Some(deadline) => timeout.min(deadline.saturating_duration_since(now)),
            None => timeout,
        }
    }

    /// Waits for readiness for up to `timeout` and dispatches whatever the
    /// multiplexer reports. A wait failure is logged and the loop moves on
    /// to its next iteration; it is never fatal.
    fn poll_io(&mut self, timeout: Duration) {
        let ready_set = match self.poller.wait(timeout) {
            Ok(ready_set) => ready_set,
            Err(error) => {
                warn!(
                    "multiplexer failed to wait, timeout = {:?}: {}",
                    timeout, error
                );
                return;
            }
        };

        for ready in ready_set {
            if ready.file_descriptor == self.poller.wake_file_descriptor() {
                self.poller.drain_wake();
                continue;
            }

            self.dispatch_ready(ready);
        }
    }

    /// Routes one readiness notification to its registry entry.
    ///
    /// The entry is detached while it runs so the handlers it fires can
    /// freely borrow the loop; a connection that closed itself is simply not
    /// reattached.
    fn dispatch_ready(&mut self, ready: Ready) {
        let entry = match self.registry.remove(&ready.file_descriptor) {
            Some(entry) => entry,
            // Closed earlier in this batch; stale notification.
            None => return,
        };

        match entry {
            Entry::Listener(mut accept_manager) => {
                accept_manager.on_acceptable(self);
                self.registry
                    .insert(ready.file_descriptor, Entry::Listener(accept_manager));
            }
            Entry::Client(mut connection) => {
                if ready.readable {
                    connection.on_readable(self);
                }

                if !connection.is_closed() && ready.writable {
                    connection.on_writable(self);
                }

                if !connection.is_closed() {
                    self.registry
                        .insert(ready.file_descriptor, Entry::Client(connection));
                }
            }
        }
    }

    fn mint_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
