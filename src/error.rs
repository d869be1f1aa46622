use std::fmt;
use std::io;

use nix::errno::Errno;

use crate::decode::DecodeError;
use crate::gate::Pid;


pub type Result<T> = std::result::Result<T, Error>;

/// Register set addressed by a failed register transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterKind {
    General,
    FloatingPoint,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::General => write!(f, "general-purpose"),
            RegisterKind::FloatingPoint => write!(f, "floating point"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not get {kind} registers of thread {tid}: {source}")]
    RegisterRead {
        tid: Pid,
        kind: RegisterKind,
        source: Errno,
    },

    #[error("could not set {kind} registers of thread {tid}: {source}")]
    RegisterWrite {
        tid: Pid,
        kind: RegisterKind,
        source: Errno,
    },

    #[error("could not read memory of thread {tid} at {addr:#x}: {source}")]
    MemoryRead {
        tid: Pid,
        addr: u64,
        source: io::Error,
    },

    #[error("could not write memory of thread {tid} at {addr:#x}: {source}")]
    MemoryWrite {
        tid: Pid,
        addr: u64,
        source: io::Error,
    },

    #[error("could not decode instruction at {addr:#x}: {source}")]
    Decode {
        addr: u64,
        source: DecodeError,
    },

    #[error("could not resume thread {tid}: {source}")]
    Restart { tid: Pid, source: Errno },

    #[error("could not wait on thread {tid}: {source}")]
    Wait { tid: Pid, source: Errno },

    #[error("thread {tid} exited mid-step with status {status}")]
    ThreadExited { tid: Pid, status: i32 },

    #[error("could not attach to tracee {pid}: {source}")]
    Attach { pid: Pid, source: Errno },

    #[error("input/output error: {0}")]
    IO(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if the failure is explained by the tracee no longer existing.
    ///
    /// Ptrace requests against a dead (or not-stopped) tracee fail with `ESRCH`, and
    /// `/proc/<tid>/mem` I/O fails with `ESRCH` or `EIO` once the address space is gone.
    pub fn tracee_died(&self) -> bool {
        match self {
            Error::RegisterRead { source, .. } |
            Error::RegisterWrite { source, .. } |
            Error::Restart { source, .. } |
            Error::Wait { source, .. } =>
                *source == Errno::ESRCH,
            Error::MemoryRead { source, .. } |
            Error::MemoryWrite { source, .. } =>
                matches!(source.raw_os_error(), Some(libc::ESRCH) | Some(libc::EIO)),
            Error::ThreadExited { .. } =>
                true,
            _ =>
                false,
        }
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}
