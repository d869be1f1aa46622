#![cfg(all(target_os = "linux", target_arch = "arm"))]

use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use armstep::{
    Gate, Native, Pid, Ptrace, PtraceThread, Signal, StepOutcome, Thread, TracedProcess,
    WaitPidFlag, WaitStatus,
};
use ntest::timeout;
use pretty_assertions::assert_eq;

#[test]
#[timeout(10000)]
fn test_native_single_step() -> Result<()> {
    let gate = PtraceThread::spawn(Native::new())?;

    let mut child = gate.exec(|native| native.spawn(Command::new("true")))?;
    let pid = Pid::from_raw(child.id() as i32);

    let status = gate.exec(move |native| native.wait(pid, WaitPidFlag::__WALL))?;
    assert_eq!(status, WaitStatus::Stopped(pid, Signal::SIGTRAP));

    let process = Arc::new(TracedProcess::new(pid));
    let thread = Thread::new(gate.clone(), pid, process);

    for _ in 0..64 {
        let before = thread.registers()?;

        // Only A32 code is decoded.
        if before.is_thumb() {
            break;
        }

        let next_pcs = thread.next_pcs(&before)?;
        let pc = u64::from(before.pc());

        let code = gate.exec(move |native| {
            let mut code = vec![0; 4];
            native.read_memory(pid, pc, &mut code)?;
            Ok(code)
        })?;

        match thread.single_step()? {
            StepOutcome::Trapped => {},
            outcome => panic!("unexpected outcome {:?}", outcome),
        }

        let after = thread.registers()?;
        assert!(next_pcs.contains(&u64::from(after.pc())), "{:#x} not in {:x?}", after.pc(), next_pcs);

        // The stepped instruction is unchanged.
        let again = gate.exec(move |native| {
            let mut code = vec![0; 4];
            native.read_memory(pid, pc, &mut code)?;
            Ok(code)
        })?;
        assert_eq!(code, again);
    }

    child.kill()?;

    Ok(())
}
