//! The `ptrace(2)` backed implementation of [`Ptrace`].

use std::fs;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use nix::{
    errno::Errno,
    sys::{ptrace, wait},
};
use tracing::{debug, info};

use crate::arm::{self, user_regs};
use crate::error::{Error, RegisterKind, Result};
use crate::gate::{Pid, Ptrace, Signal, WaitPidFlag, WaitStatus};

/// Issues ptrace requests directly. Must live on the thread that attached to its tracees,
/// usually inside a [`PtraceThread`](crate::PtraceThread).
#[derive(Debug, Default)]
pub struct Native {
    _private: (),
}

impl Native {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `cmd` for tracing.
    ///
    /// The command will be configured to request `PTRACE_TRACEME` after `fork()` and
    /// pre-`exec()`, so the child is seen stopped with a `SIGTRAP` once the exec completes.
    pub fn spawn(&mut self, mut cmd: Command) -> Result<Child> {
        // On fork, request `PTRACE_TRACEME`.
        unsafe {
            cmd.pre_exec(|| ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32)))
        };

        let child = cmd.spawn()?;
        info!(pid = child.id(), "spawned tracee");

        Ok(child)
    }

    /// Attach to a running tracee. This will deliver a `SIGSTOP`.
    pub fn attach(&mut self, pid: Pid) -> Result<()> {
        ptrace::attach(pid).map_err(|source| Error::Attach { pid, source })?;
        info!(pid = pid.as_raw(), "attached to tracee");

        Ok(())
    }

    fn get_regset(&self, tid: Pid, regset: libc::c_int, data: *mut libc::c_void, len: usize) -> nix::Result<usize> {
        let mut iov = libc::iovec {
            iov_base: data,
            iov_len: len,
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                tid.as_raw(),
                regset as usize as *mut libc::c_void,
                &mut iov as *mut _ as *mut libc::c_void,
            )
        };

        Errno::result(res)?;

        // The kernel shrinks `iov_len` to the size of the regset it filled.
        Ok(iov.iov_len)
    }

    fn set_regset(&self, tid: Pid, regset: libc::c_int, data: *const libc::c_void, len: usize) -> nix::Result<()> {
        let mut iov = libc::iovec {
            iov_base: data as *mut libc::c_void,
            iov_len: len,
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                tid.as_raw(),
                regset as usize as *mut libc::c_void,
                &mut iov as *mut _ as *mut libc::c_void,
            )
        };

        Errno::result(res)?;

        Ok(())
    }
}

fn proc_mem_path(tid: Pid) -> String {
    format!("/proc/{}/mem", tid.as_raw())
}

impl Ptrace for Native {
    fn registers(&mut self, tid: Pid) -> Result<user_regs> {
        let mut regs = user_regs::default();

        self.get_regset(
            tid,
            arm::NT_PRSTATUS,
            &mut regs as *mut _ as *mut libc::c_void,
            std::mem::size_of::<user_regs>(),
        )
        .map_err(|source| Error::RegisterRead { tid, kind: RegisterKind::General, source })?;

        Ok(regs)
    }

    fn set_registers(&mut self, tid: Pid, regs: &user_regs) -> Result<()> {
        self.set_regset(
            tid,
            arm::NT_PRSTATUS,
            regs as *const _ as *const libc::c_void,
            std::mem::size_of::<user_regs>(),
        )
        .map_err(|source| Error::RegisterWrite { tid, kind: RegisterKind::General, source })
    }

    fn fp_registers(&mut self, tid: Pid) -> Result<Vec<u8>> {
        let mut data = vec![0u8; arm::ARM_VFPREGS_SIZE];

        let len = self.get_regset(
            tid,
            arm::NT_ARM_VFP,
            data.as_mut_ptr() as *mut libc::c_void,
            data.len(),
        )
        .map_err(|source| Error::RegisterRead { tid, kind: RegisterKind::FloatingPoint, source })?;

        data.truncate(len);

        Ok(data)
    }

    fn set_fp_registers(&mut self, tid: Pid, data: &[u8]) -> Result<()> {
        self.set_regset(
            tid,
            arm::NT_ARM_VFP,
            data.as_ptr() as *const libc::c_void,
            data.len(),
        )
        .map_err(|source| Error::RegisterWrite { tid, kind: RegisterKind::FloatingPoint, source })
    }

    fn read_memory(&mut self, tid: Pid, addr: u64, data: &mut [u8]) -> Result<()> {
        fs::File::open(proc_mem_path(tid))
            .and_then(|mem| mem.read_exact_at(data, addr))
            .map_err(|source| Error::MemoryRead { tid, addr, source })
    }

    fn write_memory(&mut self, tid: Pid, addr: u64, data: &[u8]) -> Result<()> {
        // A single positional write to `/proc/<tid>/mem` is one `access_process_vm()` call,
        // which copies a word-sized, aligned buffer within one page in full or not at all.
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(proc_mem_path(tid))
            .and_then(|mem| mem.write_all_at(data, addr))
            .map_err(|source| Error::MemoryWrite { tid, addr, source })
    }

    fn cont(&mut self, tid: Pid, signal: Option<Signal>) -> Result<()> {
        debug!(tid = tid.as_raw(), ?signal, "continuing thread");

        ptrace::cont(tid, signal).map_err(|source| Error::Restart { tid, source })
    }

    fn wait(&mut self, tid: Pid, flags: WaitPidFlag) -> Result<WaitStatus> {
        wait::waitpid(tid, Some(flags)).map_err(|source| Error::Wait { tid, source })
    }
}
