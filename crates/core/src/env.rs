//! The per-process execution context (§4.2).
//!
//! The original `UsageEnvironment` bundles a task scheduler, a mutable
//! "last error" string, and (through a chain of subclasses) process-wide
//! globals for the preferred outgoing/incoming network interface. Here
//! those globals become fields on [`Environment`] instead — a caller
//! that genuinely needs two environments (e.g. to bind sends and
//! receives to different NICs in a test) can construct two without them
//! fighting over the same process-wide variable (§11 supplemented feature).
//!
//! The scheduler is shared via `Rc<RefCell<Scheduler>>` rather than owned
//! outright: pipeline objects (RTP sinks/sources) need a handle to
//! self-schedule their own continuations (§4.4, §4.1), and a plain owned
//! field can't be handed out to more than one owner at a time.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::LastError;
use crate::medium::Registry;
use crate::scheduler::Scheduler;

/// A flag a non-scheduler thread (a signal handler's dedicated thread, a
/// CLI's stdin-watcher thread) can set to ask the event loop to stop,
/// without touching any medium directly (§5 "Shared resources": a signal
/// may only set a flag consumed by the loop). `Arc<parking_lot::Mutex<_>>`
/// rather than an `AtomicBool` because the original's signal-to-loop
/// handoff is a single word under a lock, not a hot path worth the extra
/// ordering reasoning an atomic would need here.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<Mutex<bool>>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        *self.0.lock() = true;
    }

    pub fn is_requested(&self) -> bool {
        *self.0.lock()
    }
}

/// Bundles the scheduler, medium registry, and diagnostic state that
/// every pipeline object and the RTSP client are built against.
pub struct Environment {
    pub scheduler: Rc<RefCell<Scheduler>>,
    pub registry: Registry,
    pub last_error: LastError,
    /// Preferred local address for sends (multicast/unicast origin).
    /// `None` lets the OS pick, matching the original's default of
    /// `INADDR_ANY` (§11).
    pub sending_interface: Option<Ipv4Addr>,
    /// Preferred local address for receives/joins.
    pub receiving_interface: Option<Ipv4Addr>,
    /// Cross-thread shutdown request, consumed by the loop that owns
    /// this environment (§5 "Shared resources").
    pub shutdown: ShutdownFlag,
}

impl Environment {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            scheduler: Rc::new(RefCell::new(Scheduler::new()?)),
            registry: Registry::new(),
            last_error: LastError::default(),
            sending_interface: None,
            receiving_interface: None,
            shutdown: ShutdownFlag::new(),
        })
    }

    pub fn with_interfaces(
        sending: Option<Ipv4Addr>,
        receiving: Option<Ipv4Addr>,
    ) -> std::io::Result<Self> {
        let mut env = Self::new()?;
        env.sending_interface = sending;
        env.receiving_interface = receiving;
        Ok(env)
    }

    /// Record a failure for human-readable reporting and log it at
    /// `warn` level. Does not replace the typed error a caller already
    /// has in hand — this is purely for diagnostics.
    pub fn note_failure(&mut self, prefix: &str, arg: &str, suffix: &str) {
        self.last_error.set(prefix, arg, suffix);
        tracing::warn!(%prefix, %arg, %suffix, "operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_interfaces_are_unset() {
        let env = Environment::new().unwrap();
        assert_eq!(env.sending_interface, None);
        assert_eq!(env.receiving_interface, None);
    }

    #[test]
    fn with_interfaces_sets_both_independently() {
        let send = Ipv4Addr::new(10, 0, 0, 1);
        let env = Environment::with_interfaces(Some(send), None).unwrap();
        assert_eq!(env.sending_interface, Some(send));
        assert_eq!(env.receiving_interface, None);
    }

    #[test]
    fn note_failure_updates_last_error() {
        let mut env = Environment::new().unwrap();
        env.note_failure("failed to bind ", "239.1.1.1:5004", ": address in use");
        assert_eq!(
            env.last_error.to_string(),
            "failed to bind 239.1.1.1:5004: address in use"
        );
    }

    #[test]
    fn shutdown_flag_is_visible_across_clones() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!flag.is_requested());
        other.request();
        assert!(flag.is_requested());
    }

    #[test]
    fn shutdown_flag_set_from_another_thread_is_observed_here() {
        let flag = ShutdownFlag::new();
        let worker = flag.clone();
        std::thread::spawn(move || worker.request()).join().unwrap();
        assert!(flag.is_requested());
    }
}
