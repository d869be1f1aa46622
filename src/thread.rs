use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::arch::Arch;
use crate::gate::{Gate, Pid, WaitPidFlag};

/// The process a traced thread belongs to.
pub trait Process: Send + Sync {
    /// Thread group id.
    fn pid(&self) -> Pid;

    /// Called once the process has been observed to exit.
    fn post_exit(&self);
}

/// Minimal [`Process`] that only records whether it has exited.
#[derive(Debug)]
pub struct TracedProcess {
    pid: Pid,
    exited: AtomicBool,
}

impl TracedProcess {
    pub fn new(pid: Pid) -> Self {
        let exited = AtomicBool::new(false);

        Self { pid, exited }
    }

    pub fn exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

impl Process for TracedProcess {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn post_exit(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

const DEFAULT_WAIT_FLAGS: WaitPidFlag = WaitPidFlag::__WALL;

/// A traced thread, reachable only through its tracing [`Gate`].
///
/// Owns no tracee state itself: it names the thread for every request it dispatches.
pub struct Thread<G> {
    gate: G,
    tid: Pid,
    process: Arc<dyn Process>,

    /// Target description used when planting breakpoints.
    arch: Arch,

    /// Flags for waiting on the thread mid-step.
    wait_flags: WaitPidFlag,
}

impl<G: Gate> Thread<G> {
    pub fn new(gate: G, tid: Pid, process: Arc<dyn Process>) -> Self {
        let arch = Arch::default();
        let wait_flags = DEFAULT_WAIT_FLAGS;

        Self { gate, tid, process, arch, wait_flags }
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }

    /// Thread group id of the owning process.
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    pub fn gate(&self) -> &G {
        &self.gate
    }

    pub fn process(&self) -> &Arc<dyn Process> {
        &self.process
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn set_arch(&mut self, arch: Arch) {
        self.arch = arch;
    }

    pub fn wait_flags(&self) -> WaitPidFlag {
        self.wait_flags
    }

    /// Set the `waitpid(2)` flags used while waiting for a step to finish.
    pub fn set_wait_flags(&mut self, flags: WaitPidFlag) {
        self.wait_flags = flags;
    }
}
