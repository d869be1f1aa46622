#![allow(unused)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use armstep::arm::user_regs;
use armstep::decode::Reg;
use armstep::{
    Error, Pid, Ptrace, PtraceThread, RegisterKind, Result, Signal, Thread, TracedProcess,
    WaitPidFlag, WaitStatus,
};
use nix::errno::Errno;

macro_rules! assert_matches {
    ($expr: expr, $pat: pat) => {{
        let value = &$expr;
        assert!(matches!(value, $pat), "expected `{:?}` to match `{}`", value, stringify!($pat));
    }};
}

/// Thread group id of the fake process. Its leader has the same id.
pub const PID: i32 = 4000;

/// Ptrace requests seen by a [`FakeTracee`], in order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    Registers(Pid),
    SetRegisters(Pid),
    FpRegisters(Pid),
    SetFpRegisters(Pid, usize),
    Read(u64, usize),
    Write(u64, Vec<u8>),
    Cont(Pid),
    Wait(Pid),
}

/// Scriptable tracee state.
#[derive(Debug, Default)]
pub struct State {
    pub regs: BTreeMap<Pid, user_regs>,
    pub fpregs: BTreeMap<Pid, Vec<u8>>,

    /// Mapped bytes. Anything absent is unreadable.
    pub memory: BTreeMap<u64, u8>,

    /// Addresses at which writes fail.
    pub fail_writes: HashSet<u64>,

    /// Writes allowed before every write fails.
    pub write_budget: Option<usize>,

    pub fail_set_registers: bool,
    pub fail_fp_registers: bool,
    pub fail_cont: bool,

    /// Statuses returned by successive waits. Waiting with none left fails with `ECHILD`.
    pub events: VecDeque<WaitStatus>,

    /// PC the continued thread reports when it next stops.
    pub resume_pc: Option<u32>,

    /// Memory as it was when the thread was continued.
    pub memory_at_resume: Option<BTreeMap<u64, u8>>,

    pub calls: Vec<Call>,
}

impl State {
    pub fn load(&mut self, addr: u64, bytes: &[u8]) {
        for (n, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + n as u64, *b);
        }
    }

    pub fn load_word(&mut self, addr: u64, word: u32) {
        self.load(addr, &word.to_le_bytes());
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        (addr..addr + len as u64).map(|a| self.memory.get(&a).copied()).collect()
    }

    pub fn word(&self, addr: u64) -> Option<u32> {
        let bytes = self.bytes(addr, 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn set_reg(&mut self, tid: Pid, reg: Reg, value: u32) {
        self.regs.entry(tid).or_default().uregs[reg.index()] = value;
    }

    pub fn set_cpsr(&mut self, tid: Pid, value: u32) {
        self.regs.entry(tid).or_default().uregs[armstep::arm::ARM_CPSR] = value;
    }

    pub fn reg(&self, tid: Pid, reg: Reg) -> u32 {
        self.regs.get(&tid).map(|r| r.uregs[reg.index()]).unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(addr, data) => Some((*addr, data.clone())),
                _ => None,
            })
            .collect()
    }
}

/// In-memory [`Ptrace`] implementation. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct FakeTracee {
    state: Arc<Mutex<State>>,
}

impl FakeTracee {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl Ptrace for FakeTracee {
    fn registers(&mut self, tid: Pid) -> Result<user_regs> {
        let mut state = self.state();
        state.calls.push(Call::Registers(tid));

        state
            .regs
            .get(&tid)
            .copied()
            .ok_or(Error::RegisterRead { tid, kind: RegisterKind::General, source: Errno::ESRCH })
    }

    fn set_registers(&mut self, tid: Pid, regs: &user_regs) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::SetRegisters(tid));

        if state.fail_set_registers {
            return Err(Error::RegisterWrite { tid, kind: RegisterKind::General, source: Errno::EIO });
        }

        state.regs.insert(tid, *regs);
        Ok(())
    }

    fn fp_registers(&mut self, tid: Pid) -> Result<Vec<u8>> {
        let mut state = self.state();
        state.calls.push(Call::FpRegisters(tid));

        if state.fail_fp_registers {
            return Err(Error::RegisterRead { tid, kind: RegisterKind::FloatingPoint, source: Errno::EINVAL });
        }

        Ok(state.fpregs.get(&tid).cloned().unwrap_or_default())
    }

    fn set_fp_registers(&mut self, tid: Pid, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::SetFpRegisters(tid, data.len()));
        state.fpregs.insert(tid, data.to_vec());
        Ok(())
    }

    fn read_memory(&mut self, tid: Pid, addr: u64, data: &mut [u8]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Read(addr, data.len()));

        match state.bytes(addr, data.len()) {
            Some(bytes) => {
                data.copy_from_slice(&bytes);
                Ok(())
            },
            None => Err(Error::MemoryRead { tid, addr, source: io::Error::from(Errno::EIO) }),
        }
    }

    fn write_memory(&mut self, tid: Pid, addr: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Write(addr, data.to_vec()));

        let exhausted = match state.write_budget.as_mut() {
            Some(0) => true,
            Some(budget) => {
                *budget -= 1;
                false
            },
            None => false,
        };

        if exhausted || state.fail_writes.contains(&addr) {
            return Err(Error::MemoryWrite { tid, addr, source: io::Error::from(Errno::EIO) });
        }

        state.load(addr, data);
        Ok(())
    }

    fn cont(&mut self, tid: Pid, _signal: Option<Signal>) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Cont(tid));

        if state.fail_cont {
            return Err(Error::Restart { tid, source: Errno::ESRCH });
        }

        state.memory_at_resume = Some(state.memory.clone());

        if let Some(pc) = state.resume_pc {
            state.set_reg(tid, Reg::PC, pc);
        }

        Ok(())
    }

    fn wait(&mut self, tid: Pid, _flags: WaitPidFlag) -> Result<WaitStatus> {
        let mut state = self.state();
        state.calls.push(Call::Wait(tid));

        state
            .events
            .pop_front()
            .ok_or(Error::Wait { tid, source: Errno::ECHILD })
    }
}

pub type FakeThread = Thread<PtraceThread<FakeTracee>>;

/// A thread `tid` of the fake process, behind a real dispatch thread.
pub fn thread(fake: &FakeTracee, tid: i32) -> (FakeThread, Arc<TracedProcess>) {
    let gate = PtraceThread::spawn(fake.clone()).expect("spawn ptrace thread");
    let process = Arc::new(TracedProcess::new(Pid::from_raw(PID)));

    let thread = Thread::new(gate, Pid::from_raw(tid), process.clone());

    (thread, process)
}

/// A thread of the fake process stopped at `pc`, with `code` loaded there.
pub fn stopped_at(fake: &FakeTracee, tid: i32, pc: u32, code: u32) -> (FakeThread, Arc<TracedProcess>) {
    {
        let mut state = fake.state();
        state.set_reg(Pid::from_raw(tid), Reg::PC, pc);
        state.load_word(u64::from(pc), code);
    }

    thread(fake, tid)
}
