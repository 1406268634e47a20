//! Host-side execution runtime.
//!
//! A [`Context`] stands for one accelerator and its memory; a [`Queue`]
//! executes kernels for it. Submission never blocks: it hands the kernel to
//! the queue's worker thread and returns a [`KernelLaunch`] whose events
//! later submissions can depend on.
//!
//! Kernels run in submission order. Before running, a kernel waits for its
//! prerequisite events (possibly from other queues) and then locks its
//! buffers in ascending buffer-id order. Inside a kernel, compute groups run
//! on the rayon pool when the `parallel` feature is enabled.

mod buffer;
mod event;

pub use buffer::{DeviceBuffer, Storage};
pub use event::{DeviceFault, Event, EventStatus, KernelLaunch};

pub(crate) use buffer::{Bindings, KernelArg};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{trace, warn};

use crate::config::DeviceLimits;
use crate::error::{Error, Result};

/// Process-unique id of a [`Context`].
pub type ContextId = u64;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// An execution context: one accelerator and the memory it can address.
///
/// Buffers allocated in one context cannot be used by queues of another.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    name: Arc<str>,
    limits: DeviceLimits,
}

impl Context {
    /// Create a context with default limits.
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            limits: DeviceLimits::default(),
        }
    }

    /// Set device limits.
    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Context id.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Human readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device limits.
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new("host")
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// In-order execution queue bound to a [`Context`].
///
/// Dropping the queue waits for everything already submitted.
#[derive(Debug)]
pub struct Queue {
    context: Context,
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Queue {
    /// Start a queue on `context`.
    pub fn new(context: &Context) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("lloyd-queue-{}", context.id()))
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .map_err(|e| Error::Other(format!("failed to start queue worker: {e}")))?;
        Ok(Self {
            context: context.clone(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// The context this queue executes in.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Device limits of the context.
    pub fn limits(&self) -> &DeviceLimits {
        self.context.limits()
    }

    /// Whether `buffer` lives in this queue's context.
    pub fn is_compatible(&self, buffer: &DeviceBuffer) -> bool {
        buffer.context_id() == self.context.id()
    }

    /// An event that completes once everything submitted so far has run.
    pub fn barrier(&self) -> Event {
        let event = Event::pending("barrier");
        let done = event.clone();
        if !self.enqueue(Box::new(move || done.finish(Ok(())))) {
            event.finish(Err(worker_gone("barrier")));
        }
        event
    }

    fn enqueue(&self, job: Job) -> bool {
        match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Queue `body` behind `depends`, binding `args` while it runs.
    ///
    /// `body` sees the arguments in the order given. A second housekeeping
    /// task keeps the argument buffers alive until the kernel has finished.
    pub(crate) fn submit<F>(
        &self,
        kernel: &'static str,
        args: Vec<KernelArg>,
        depends: &[Event],
        body: F,
    ) -> KernelLaunch
    where
        F: for<'a> FnOnce(Bindings<'a>) -> std::result::Result<(), DeviceFault> + Send + 'static,
    {
        let compute = Event::pending(kernel);
        let held: Vec<DeviceBuffer> = args.iter().map(|arg| arg.buffer.clone()).collect();
        let prerequisites = depends.to_vec();

        let done = compute.clone();
        let accepted = self.enqueue(Box::new(move || {
            let outcome = await_prerequisites(kernel, &prerequisites)
                .and_then(|()| run_kernel(kernel, &args, body));
            match &outcome {
                Ok(()) => trace!("{kernel} complete"),
                Err(fault) => warn!("{fault}"),
            }
            done.finish(outcome);
        }));
        if !accepted {
            compute.finish(Err(worker_gone(kernel)));
        }

        let keep_alive = Event::pending("keep_args_alive");
        let released = keep_alive.clone();
        let watched = compute.clone();
        let accepted = self.enqueue(Box::new(move || {
            let _ = watched.wait();
            drop(held);
            released.finish(Ok(()));
        }));
        if !accepted {
            keep_alive.finish(Ok(()));
        }

        KernelLaunch {
            keep_alive,
            compute,
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_gone(kernel: &'static str) -> DeviceFault {
    DeviceFault::new(kernel, "queue worker is no longer running")
}

fn await_prerequisites(
    kernel: &'static str,
    prerequisites: &[Event],
) -> std::result::Result<(), DeviceFault> {
    for event in prerequisites {
        if let Err(fault) = event.wait() {
            warn!("{kernel} skipped: prerequisite {} faulted", event.label());
            return Err(DeviceFault::new(
                kernel,
                format!("prerequisite `{}` faulted: {}", fault.kernel(), fault.message()),
            ));
        }
    }
    Ok(())
}

fn run_kernel<F>(
    kernel: &'static str,
    args: &[KernelArg],
    body: F,
) -> std::result::Result<(), DeviceFault>
where
    F: for<'a> FnOnce(Bindings<'a>) -> std::result::Result<(), DeviceFault>,
{
    let bindings = Bindings::lock(kernel, args)?;
    match panic::catch_unwind(AssertUnwindSafe(move || body(bindings))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "kernel panicked".to_string());
            Err(DeviceFault::new(kernel, message))
        }
    }
}
