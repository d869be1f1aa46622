//! Serialized access to the ptrace requests of a tracee.
//!
//! The kernel only accepts ptrace requests for a tracee from the thread that attached
//! to it. Every request is therefore expressed as a job and dispatched to the one
//! context allowed to issue it, via a [`Gate`].

use std::thread;

use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{debug, trace};

use crate::arm::user_regs;
use crate::error::Result;

pub use nix::sys::signal::Signal;
pub use nix::sys::wait::{WaitPidFlag, WaitStatus};
pub use nix::unistd::Pid;

/// Raw tracing primitives for stopped tracee threads.
///
/// Implementations must only be used from the context holding the ptrace attachment,
/// which a [`Gate`] guarantees.
pub trait Ptrace {
    /// Fetch the general-purpose registers of `tid`.
    fn registers(&mut self, tid: Pid) -> Result<user_regs>;

    fn set_registers(&mut self, tid: Pid, regs: &user_regs) -> Result<()>;

    /// Fetch the raw floating-point register block of `tid`.
    ///
    /// The returned length is the length reported by the kernel, and is the length that
    /// must be written back.
    fn fp_registers(&mut self, tid: Pid) -> Result<Vec<u8>>;

    fn set_fp_registers(&mut self, tid: Pid, data: &[u8]) -> Result<()>;

    /// Fill `data` from tracee memory at `addr`. Short reads are errors.
    fn read_memory(&mut self, tid: Pid, addr: u64, data: &mut [u8]) -> Result<()>;

    /// Write all of `data` to tracee memory at `addr`. Short writes are errors.
    fn write_memory(&mut self, tid: Pid, addr: u64, data: &[u8]) -> Result<()>;

    /// Resume `tid`, delivering `signal` if any.
    fn cont(&mut self, tid: Pid, signal: Option<Signal>) -> Result<()>;

    /// Block until `tid` changes state. The thread the status belongs to is
    /// [`WaitStatus::pid()`].
    fn wait(&mut self, tid: Pid, flags: WaitPidFlag) -> Result<WaitStatus>;
}

/// Runs units of ptrace work on the tracing context.
pub trait Gate {
    type Ptrace: Ptrace;

    /// Run `f` with exclusive access to the tracing primitives, blocking until it is done.
    fn exec<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self::Ptrace) -> Result<T> + Send + 'static,
        T: Send + 'static;
}

type Job<P> = Box<dyn FnOnce(&mut P) + Send>;

/// A dedicated OS thread owning a [`Ptrace`] implementation.
///
/// Handles are cheap to clone. The thread exits once every handle has been dropped.
pub struct PtraceThread<P> {
    jobs: Sender<Job<P>>,
}

impl<P> Clone for PtraceThread<P> {
    fn clone(&self) -> Self {
        Self { jobs: self.jobs.clone() }
    }
}

impl<P: Ptrace + Send + 'static> PtraceThread<P> {
    /// Start the tracing context, moving `ptrace` onto it.
    pub fn spawn(mut ptrace: P) -> Result<Self> {
        let (jobs, queue) = unbounded::<Job<P>>();

        thread::Builder::new()
            .name("ptrace".into())
            .spawn(move || {
                debug!("ptrace thread started");

                for job in queue {
                    job(&mut ptrace);
                }

                debug!("ptrace thread exiting");
            })?;

        Ok(Self { jobs })
    }
}

impl<P: Ptrace + 'static> Gate for PtraceThread<P> {
    type Ptrace = P;

    fn exec<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut P) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, result) = bounded(1);

        let job: Job<P> = Box::new(move |ptrace| {
            // The caller is blocked on `result` until it receives this, or the worker died.
            let _ = reply.send(f(ptrace));
        });

        trace!("dispatching ptrace job");

        if self.jobs.send(job).is_err() {
            internal_error!("ptrace thread is gone");
        }

        match result.recv() {
            Ok(result) => result,
            Err(_) => internal_error!("ptrace job was dropped without a result"),
        }
    }
}
