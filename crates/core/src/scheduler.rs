//! Single-threaded event scheduler (§4.1).
//!
//! Grounded on `original_source/BasicUsageEnvironment/BasicTaskScheduler.cpp`'s
//! `SingleStep`: compute a bounded wait from the delay queue and the
//! caller's `maxDelayTime`, block in one readiness wait, then first fire
//! due delayed tasks and then invoke handlers for descriptors that are
//! both reported-readable and still registered.
//!
//! The original keys descriptor→handler bindings with a raw `fd_set` and
//! a linked `HandlerSet`; here the same one-handler-per-descriptor
//! invariant is kept but readiness is multiplexed with [`mio`] instead
//! of calling `select()`/`epoll()` directly (see `DESIGN.md`).
//! Registration is by raw file descriptor via [`mio::unix::SourceFd`]
//! so the scheduler never takes ownership of the caller's socket,
//! matching the original's borrowed-fd model.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// A guard ceiling on any single wait, mirroring the original's comment
/// that very large `tv_sec` values cause `select()` to fail on some
/// platforms (§4.1).
const MAX_SINGLE_WAIT: Duration = Duration::from_secs(1_000_000);

/// Reason code passed to a socket-readiness handler. Only one reason
/// exists today; kept as an enum (rather than a bare call) so a future
/// "write-ready" or "exception" handler slot doesn't need a new method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadReason {
    SocketReadable,
}

type ReadHandler = Box<dyn FnMut(ReadReason)>;
type DelayTask = Box<dyn FnOnce()>;

/// Opaque cancellation handle for a delayed task (§3 "delay queue").
///
/// Comparison is by an internal sequence number a task can never collide
/// with after being handed out, so cancelling a token whose task has
/// already fired is simply a failed lookup, not a dangling reference
/// (§4.1, §5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayToken(u64);

struct DelayEntry {
    fire_at: Instant,
    token: DelayToken,
    task: DelayTask,
}

/// Time-ordered list of pending delayed tasks (§3 "delay queue").
///
/// Kept as a `Vec` sorted ascending by `fire_at` rather than a binary
/// heap: insertion is O(N), which is fine since the number of
/// concurrently pending alarms is always small in practice.
#[derive(Default)]
pub struct DelayQueue {
    next_token: u64,
    entries: Vec<DelayEntry>,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, delay: Duration, task: DelayTask) -> DelayToken {
        let token = DelayToken(self.next_token);
        self.next_token += 1;
        let fire_at = Instant::now() + delay;

        let pos = self
            .entries
            .iter()
            .position(|e| e.fire_at > fire_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            DelayEntry {
                fire_at,
                token,
                task,
            },
        );
        token
    }

    /// Remove a pending task. Returns `true` if it was still pending.
    /// A token whose task has already fired (and so is no longer in the
    /// list) simply isn't found — no panic, no effect (§5 "Cancellation").
    pub fn cancel(&mut self, token: DelayToken) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.token == token) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Time remaining until the earliest pending alarm, or `None` if the
    /// queue is empty.
    pub fn time_to_next_alarm(&self) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .first()
            .map(|e| e.fire_at.saturating_duration_since(now))
    }

    /// Run every task whose deadline has elapsed, in firing order. A task
    /// that inserts a new zero-delay task during this call will *not*
    /// also run in the same pass — it observes the queue state at the
    /// moment of insertion and participates in the next `single_step`.
    pub fn fire_due(&mut self) {
        let now = Instant::now();
        loop {
            let due = matches!(self.entries.first(), Some(e) if e.fire_at <= now);
            if !due {
                break;
            }
            let entry = self.entries.remove(0);
            (entry.task)();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The event scheduler (§4.1).
///
/// Owns the readiness multiplexer and the delay queue. Does not own an
/// `Environment` back-reference — callers thread the `Environment`
/// through explicitly (§9 "Global mutables" / "Cyclic ownership").
pub struct Scheduler {
    poll: Poll,
    events: Events,
    handlers: HashMap<RawFd, ReadHandler>,
    delay_queue: DelayQueue,
}

impl Scheduler {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(128),
            handlers: HashMap::new(),
            delay_queue: DelayQueue::new(),
        })
    }

    /// Register a handler to run once per readiness notification on `fd`.
    /// At most one handler may be installed per descriptor at a time
    /// (§3 invariant) — a second call on the same `fd` replaces the first
    /// after deregistering it, rather than stacking handlers.
    pub fn turn_on_read<F>(&mut self, fd: RawFd, handler: F) -> io::Result<()>
    where
        F: FnMut(ReadReason) + 'static,
    {
        if self.handlers.contains_key(&fd) {
            self.turn_off_read(fd)?;
        }
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), Interest::READABLE)?;
        self.handlers.insert(fd, Box::new(handler));
        Ok(())
    }

    pub fn turn_off_read(&mut self, fd: RawFd) -> io::Result<()> {
        if self.handlers.remove(&fd).is_some() {
            self.poll.registry().deregister(&mut SourceFd(&fd))?;
        }
        Ok(())
    }

    pub fn schedule_delayed<F>(&mut self, delay: Duration, task: F) -> DelayToken
    where
        F: FnOnce() + 'static,
    {
        self.delay_queue.insert(delay, Box::new(task))
    }

    pub fn unschedule(&mut self, token: DelayToken) -> bool {
        self.delay_queue.cancel(token)
    }

    /// Run exactly one readiness wait, bounded by both the delay queue's
    /// next alarm and `max_delay`. Fires due delay tasks first, then
    /// invokes handlers for descriptors reported readable that are
    /// *still* registered afterward — a delay task may have called
    /// `turn_off_read` on a descriptor that was also reported readable in
    /// this same wait (§4.1 step ordering).
    pub fn single_step(&mut self, max_delay: Duration) -> io::Result<()> {
        let mut wait = self
            .delay_queue
            .time_to_next_alarm()
            .map(|d| d.min(MAX_SINGLE_WAIT))
            .unwrap_or(MAX_SINGLE_WAIT);
        if max_delay < wait {
            wait = max_delay;
        }

        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                // EINTR: benign, retry on the next step (§7 "Transient I/O").
            }
            Err(e) => return Err(e),
        }

        self.delay_queue.fire_due();

        let ready_fds: Vec<RawFd> = self
            .events
            .iter()
            .map(|ev| ev.token().0 as RawFd)
            .collect();
        for fd in ready_fds {
            if let Some(handler) = self.handlers.get_mut(&fd) {
                handler(ReadReason::SocketReadable);
            }
        }
        Ok(())
    }

    /// Run `single_step` in a loop until `should_stop` returns `true`.
    /// §5 notes that a signal handler may only set a flag for the loop to
    /// consume, never free mediums directly — `should_stop` is exactly
    /// that flag, checked once per iteration.
    pub fn run_until(&mut self, mut should_stop: impl FnMut() -> bool) -> io::Result<()> {
        while !should_stop() {
            self.single_step(MAX_SINGLE_WAIT)?;
        }
        Ok(())
    }

    pub fn pending_delay_count(&self) -> usize {
        !self.delay_queue.is_empty() as usize
    }
}
