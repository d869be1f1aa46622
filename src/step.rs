//! Single-stepping by planting breakpoints at every candidate next PC.
//!
//! 32-bit ARM kernels provide no `PTRACE_SINGLESTEP`. A step is emulated by writing the
//! breakpoint instruction over each address the current instruction could transfer to,
//! continuing the thread, waiting for it to trap, and putting the original bytes back.

use std::mem;

use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::gate::{Gate, Pid, Ptrace, Signal, WaitStatus};
use crate::thread::Thread;

/// How an emulated single step ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The thread trapped. It is stopped at one of the candidate next PCs.
    Trapped,

    /// The whole process exited. `status` is the exit code, or `-1` if it was killed
    /// by a signal.
    ProcessExited { pid: Pid, status: i32 },

    /// The thread stopped for a signal other than `SIGTRAP` before reaching a candidate.
    /// It is left in that signal-delivery-stop, and the signal has not been delivered.
    Interrupted { signal: Signal },
}

/// Original bytes of each address a breakpoint was written to, in plant order.
type Planted = Vec<(u64, Vec<u8>)>;

/// Write `breakpoint` at each of `addrs`, saving what it overwrites into `planted`.
///
/// Stops at the first failure. Every address written so far is recorded in `planted`
/// whether or not this returns an error.
fn plant<P: Ptrace>(ptrace: &mut P, tid: Pid, addrs: &[u64], breakpoint: &[u8], planted: &mut Planted) -> Result<()> {
    for &addr in addrs {
        // A second plant at the same address would save our own breakpoint as the original.
        if planted.iter().any(|(a, _)| *a == addr) {
            continue;
        }

        let mut original = vec![0; breakpoint.len()];
        ptrace.read_memory(tid, addr, &mut original)?;
        ptrace.write_memory(tid, addr, breakpoint)?;

        trace!(addr, ?original, "planted breakpoint");

        planted.push((addr, original));
    }

    Ok(())
}

/// Put back every original in `planted`, most recent plant first.
///
/// Every address is attempted. Returns the first failure.
fn unplant<P: Ptrace>(ptrace: &mut P, tid: Pid, planted: &Planted) -> Result<()> {
    let mut result = Ok(());

    for (addr, original) in planted.iter().rev() {
        if let Err(err) = ptrace.write_memory(tid, *addr, original) {
            debug!(addr, %err, "could not remove breakpoint");

            if result.is_ok() {
                result = Err(err);
            }
        }
    }

    result
}

/// Breakpoints planted by one step. Removes them when dropped, if not removed already.
struct PlantGuard<'a, G: Gate> {
    gate: &'a G,
    tid: Pid,
    planted: Planted,
}

impl<'a, G: Gate> PlantGuard<'a, G> {
    fn new(gate: &'a G, tid: Pid) -> Self {
        Self { gate, tid, planted: vec![] }
    }

    /// Remove the breakpoints now, reporting failure.
    fn remove(mut self) -> Result<()> {
        self.remove_planted()
    }

    fn remove_planted(&mut self) -> Result<()> {
        let planted = mem::take(&mut self.planted);

        if planted.is_empty() {
            return Ok(());
        }

        debug!(tid = self.tid.as_raw(), count = planted.len(), "removing step breakpoints");

        let tid = self.tid;
        self.gate.exec(move |ptrace| unplant(ptrace, tid, &planted))
    }
}

impl<G: Gate> Drop for PlantGuard<'_, G> {
    fn drop(&mut self) {
        if let Err(err) = self.remove_planted() {
            warn!(tid = self.tid.as_raw(), %err, "could not remove step breakpoints");
        }
    }
}

impl<G: Gate> Thread<G> {
    /// Execute exactly one instruction of the stopped thread.
    ///
    /// Memory is restored to its pre-step contents at every planted address on every
    /// return path. A failure to restore is returned as the error of an otherwise
    /// successful step. When the step already failed, or the process exited, that result
    /// is returned instead and the restore failure is logged.
    pub fn single_step(&self) -> Result<StepOutcome> {
        let tid = self.tid();

        let regs = self.registers()?;
        let next_pcs = self.next_pcs(&regs)?;

        debug!(tid = tid.as_raw(), pc = regs.pc(), ?next_pcs, "stepping");

        let breakpoint = self.arch().breakpoint_instruction();
        let mut guard = PlantGuard::new(self.gate(), tid);

        // Plant and resume in one job, so the thread cannot run with only some breakpoints.
        let (planted, resumed) = self.gate().exec(move |ptrace| {
            let mut planted = vec![];

            let resumed = plant(ptrace, tid, &next_pcs, breakpoint, &mut planted)
                .and_then(|_| ptrace.cont(tid, None));

            Ok((planted, resumed))
        })?;

        guard.planted = planted;

        let outcome = resumed.and_then(|_| self.wait_for_step());
        let removed = guard.remove();

        match (outcome, removed) {
            (Ok(outcome @ StepOutcome::ProcessExited { .. }), Err(err)) => {
                warn!(tid = tid.as_raw(), ?outcome, %err, "could not remove step breakpoints");
                Ok(outcome)
            },
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Err(cleanup)) => {
                warn!(tid = tid.as_raw(), %err, %cleanup, "could not remove step breakpoints after failed step");
                Err(err)
            },
            (outcome, Ok(())) => outcome,
        }
    }

    /// Wait until the stepped thread traps, or its process exits.
    fn wait_for_step(&self) -> Result<StepOutcome> {
        let tid = self.tid();
        let pid = self.pid();
        let flags = self.wait_flags();

        loop {
            let status = self.gate().exec(move |ptrace| ptrace.wait(tid, flags))?;

            match status {
                WaitStatus::Exited(wpid, code) if wpid == pid => {
                    info!(pid = pid.as_raw(), code, "process exited mid-step");
                    self.process().post_exit();

                    return Ok(StepOutcome::ProcessExited { pid, status: code });
                },
                WaitStatus::Signaled(wpid, signal, _) if wpid == pid => {
                    info!(pid = pid.as_raw(), ?signal, "process killed mid-step");
                    self.process().post_exit();

                    return Ok(StepOutcome::ProcessExited { pid, status: -1 });
                },
                WaitStatus::Exited(wpid, code) if wpid == tid => {
                    return Err(Error::ThreadExited { tid, status: code });
                },
                WaitStatus::Signaled(wpid, _, _) if wpid == tid => {
                    return Err(Error::ThreadExited { tid, status: -1 });
                },
                WaitStatus::Stopped(wpid, Signal::SIGTRAP) |
                WaitStatus::PtraceEvent(wpid, _, _) |
                WaitStatus::PtraceSyscall(wpid) if wpid == tid => {
                    trace!(tid = tid.as_raw(), ?status, "step trapped");

                    return Ok(StepOutcome::Trapped);
                },
                WaitStatus::Stopped(wpid, signal) if wpid == tid => {
                    debug!(tid = tid.as_raw(), ?signal, "step interrupted by signal");

                    return Ok(StepOutcome::Interrupted { signal });
                },
                status => {
                    debug!(tid = tid.as_raw(), ?status, "ignoring wait status mid-step");
                },
            }
        }
    }
}
