//! Software single-stepping of 32-bit ARM threads traced with `ptrace(2)`.
//!
//! The kernel offers no single-step request on this architecture. A [`Thread`] emulates
//! one by decoding the current instruction, planting breakpoints at every address it
//! could execute next, continuing, and restoring memory once the thread traps.

#[macro_use]
pub mod error;

pub mod arch;
pub mod arm;
pub mod decode;
pub mod gate;
#[cfg(target_os = "linux")]
pub mod native;
pub mod regs;
mod resolve;
pub mod step;
pub mod thread;

pub use arch::Arch;
pub use error::{Error, RegisterKind, Result};
pub use gate::{Gate, Pid, Ptrace, PtraceThread, Signal, WaitPidFlag, WaitStatus};
#[cfg(target_os = "linux")]
pub use native::Native;
pub use regs::{Register, Registers};
pub use step::StepOutcome;
pub use thread::{Process, Thread, TracedProcess};
