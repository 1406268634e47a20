//! Task handles for asynchronous device work.

use core::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// A fault raised while a kernel was executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    kernel: &'static str,
    message: String,
}

impl DeviceFault {
    /// Create a fault attributed to `kernel`.
    pub fn new(kernel: &'static str, message: impl Into<String>) -> Self {
        Self {
            kernel,
            message: message.into(),
        }
    }

    /// Name of the kernel that faulted.
    pub fn kernel(&self) -> &'static str {
        self.kernel
    }

    /// Fault description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel `{}` faulted: {}", self.kernel, self.message)
    }
}

impl std::error::Error for DeviceFault {}

/// Observable state of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStatus {
    /// Submitted, not finished yet.
    Pending,
    /// Finished successfully.
    Complete,
    /// Finished with a fault.
    Faulted(DeviceFault),
}

#[derive(Debug)]
struct EventInner {
    label: &'static str,
    state: Mutex<EventStatus>,
    ready: Condvar,
}

/// Handle to a scheduled unit of device work.
///
/// Cloning is cheap; all clones observe the same completion. Later
/// submissions may list an event as a prerequisite instead of blocking on it.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub(crate) fn pending(label: &'static str) -> Self {
        Self {
            inner: Arc::new(EventInner {
                label,
                state: Mutex::new(EventStatus::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// An event that is already satisfied.
    pub fn complete() -> Self {
        let event = Self::pending("complete");
        event.finish(Ok(()));
        event
    }

    /// Name of the task this event tracks.
    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    fn lock(&self) -> MutexGuard<'_, EventStatus> {
        // The state is a plain enum; a panicking holder cannot leave it torn.
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current status without blocking.
    pub fn status(&self) -> EventStatus {
        self.lock().clone()
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        !matches!(*self.lock(), EventStatus::Pending)
    }

    /// Block until the task finishes and return its outcome.
    pub fn wait(&self) -> Result<(), DeviceFault> {
        let mut state = self.lock();
        while matches!(*state, EventStatus::Pending) {
            state = self
                .inner
                .ready
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        match &*state {
            EventStatus::Faulted(fault) => Err(fault.clone()),
            _ => Ok(()),
        }
    }

    /// Wait for every event, returning the first fault in list order.
    pub fn wait_all(events: &[Event]) -> Result<(), DeviceFault> {
        let mut first = None;
        for event in events {
            if let Err(fault) = event.wait() {
                first.get_or_insert(fault);
            }
        }
        match first {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    pub(crate) fn finish(&self, outcome: Result<(), DeviceFault>) {
        let mut state = self.lock();
        if !matches!(*state, EventStatus::Pending) {
            return;
        }
        *state = match outcome {
            Ok(()) => EventStatus::Complete,
            Err(fault) => EventStatus::Faulted(fault),
        };
        self.inner.ready.notify_all();
    }
}

/// The pair of task handles returned by every operation.
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    /// Housekeeping task holding the involved buffers until `compute`
    /// finishes. Resource reclamation waits on this one; it never faults.
    pub keep_alive: Event,
    /// The kernel itself. Faults surface here.
    pub compute: Event,
}

impl KernelLaunch {
    /// A launch that issued no device work.
    pub fn noop() -> Self {
        Self {
            keep_alive: Event::complete(),
            compute: Event::complete(),
        }
    }

    /// Wait for both tasks; reports the compute outcome.
    pub fn wait(&self) -> Result<(), DeviceFault> {
        let outcome = self.compute.wait();
        // keep_alive never faults
        let _ = self.keep_alive.wait();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_complete_event_is_ready() {
        let event = Event::complete();
        assert!(event.is_complete());
        assert_eq!(event.status(), EventStatus::Complete);
        assert!(event.wait().is_ok());
    }

    #[test]
    fn test_wait_blocks_until_finished() {
        let event = Event::pending("test");
        let signal = event.clone();
        let handle = thread::spawn(move || {
            signal.finish(Err(DeviceFault::new("test", "boom")));
        });
        let err = event.wait().unwrap_err();
        handle.join().unwrap();
        assert_eq!(err.kernel(), "test");
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn test_finish_is_idempotent() {
        let event = Event::pending("test");
        event.finish(Ok(()));
        event.finish(Err(DeviceFault::new("test", "late")));
        assert_eq!(event.status(), EventStatus::Complete);
    }

    #[test]
    fn test_wait_all_reports_first_fault() {
        let a = Event::pending("a");
        let b = Event::pending("b");
        a.finish(Err(DeviceFault::new("a", "first")));
        b.finish(Err(DeviceFault::new("b", "second")));
        let err = Event::wait_all(&[Event::complete(), a, b]).unwrap_err();
        assert_eq!(err.kernel(), "a");
    }

    #[test]
    fn test_noop_launch() {
        let launch = KernelLaunch::noop();
        assert!(launch.wait().is_ok());
        assert!(launch.keep_alive.is_complete());
    }
}
