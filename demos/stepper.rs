use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use armstep::{
    Gate, Native, Pid, Ptrace, PtraceThread, Signal, StepOutcome, Thread, TracedProcess,
    WaitPidFlag, WaitStatus,
};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct Opt {
    #[structopt(short, long)]
    quiet: bool,

    /// Stop stepping after this many instructions.
    #[structopt(short = "n", long)]
    max_steps: Option<u64>,

    #[structopt(min_values = 1)]
    argv: Vec<String>,
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut cmd = Command::new(&opt.argv[0]);

    if let Some(args) = opt.argv.get(1..) {
        cmd.args(args);
    }

    let gate = PtraceThread::spawn(Native::new())?;

    // Spawn from the ptrace thread, so it becomes the tracer.
    let mut child = gate.exec(move |native| native.spawn(cmd))?;
    let pid = Pid::from_raw(child.id() as i32);

    // Tracee stops with `SIGTRAP` once the exec completes.
    match gate.exec(move |native| native.wait(pid, WaitPidFlag::__WALL))? {
        WaitStatus::Stopped(_, Signal::SIGTRAP) => {},
        status => anyhow::bail!("unexpected initial stop: {:?}", status),
    }

    let process = Arc::new(TracedProcess::new(pid));
    let thread = Thread::new(gate, pid, process);

    let mut steps = 0u64;

    loop {
        if opt.max_steps.map_or(false, |max| steps >= max) {
            child.kill()?;
            break;
        }

        let regs = thread.registers()?;

        if !opt.quiet {
            println!("{:>8x}", regs.pc());
        }

        match thread.single_step()? {
            StepOutcome::Trapped => {},
            StepOutcome::ProcessExited { pid, status } => {
                println!("pid = {}, exited with status {}", pid, status);
                break;
            },
            StepOutcome::Interrupted { signal } => {
                // Not delivered: the next step resumes without it.
                println!("pid = {}, interrupted by {:?}", pid, signal);
            },
        }

        steps += 1;
    }

    println!("steps = {}", steps);

    Ok(())
}
