//! Register transfer between the tracing primitives and the debugger's view of a thread.

use tracing::debug;

use crate::arm::{self, cpsr, user_regs};
use crate::decode::Reg;
use crate::error::Result;
use crate::gate::{Gate, Ptrace};
use crate::thread::Thread;

/// Register state of a traced thread.
///
/// Writing back a `Registers` captured from a thread, unmodified, leaves the thread's
/// execution state unchanged.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Registers {
    pub regs: user_regs,

    /// Raw floating-point register block, when captured.
    pub fpregset: Option<Vec<u8>>,
}

impl Registers {
    pub fn new(regs: user_regs) -> Self {
        Self { regs, fpregset: None }
    }

    /// Raw value of `reg`.
    pub fn get(&self, reg: Reg) -> u32 {
        self.regs.uregs[reg.index()]
    }

    pub fn set(&mut self, reg: Reg, value: u32) {
        self.regs.uregs[reg.index()] = value;
    }

    /// Value of `reg` as read by an instruction executing at the current PC.
    pub fn operand(&self, reg: Reg) -> u32 {
        if reg == Reg::PC {
            self.pc().wrapping_add(8)
        } else {
            self.get(reg)
        }
    }

    pub fn pc(&self) -> u32 {
        self.get(Reg::PC)
    }

    pub fn sp(&self) -> u32 {
        self.get(Reg::SP)
    }

    pub fn lr(&self) -> u32 {
        self.get(Reg::LR)
    }

    pub fn cpsr(&self) -> u32 {
        self.regs.uregs[arm::ARM_CPSR]
    }

    pub fn carry(&self) -> bool {
        self.cpsr() & cpsr::C != 0
    }

    /// Whether the thread is executing Thumb instructions.
    pub fn is_thumb(&self) -> bool {
        self.cpsr() & cpsr::T != 0
    }

    /// The general-purpose registers, in architecture-neutral form.
    pub fn slice(&self) -> Vec<Register> {
        let mut out: Vec<Register> = (0..16u8)
            .filter_map(Reg::new)
            .map(|reg| {
                let name = match reg {
                    Reg::SP | Reg::LR | Reg::PC => reg.to_string().to_uppercase(),
                    _ => format!("R{}", reg.index()),
                };
                Register::new(name, &self.get(reg).to_le_bytes())
            })
            .collect();

        out.push(Register::new("CPSR", &self.cpsr().to_le_bytes()));

        out
    }
}

/// A named register value, independent of the architecture's raw layouts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Register {
    pub name: String,

    /// Little-endian contents.
    pub bytes: Vec<u8>,
}

impl Register {
    pub fn new(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self { name: name.into(), bytes: bytes.to_vec() }
    }

    /// The value, if it fits in 64 bits.
    pub fn uint64(&self) -> Option<u64> {
        if self.bytes.len() > 8 {
            return None;
        }

        let mut buf = [0; 8];
        buf[..self.bytes.len()].copy_from_slice(&self.bytes);

        Some(u64::from_le_bytes(buf))
    }
}

/// Decode a raw `NT_ARM_VFP` block into `D0`-`D31` and `FPSCR`.
///
/// A block cut short by the kernel decodes to the registers it fully contains.
pub fn decode_fp_registers(data: &[u8]) -> Vec<Register> {
    let mut out: Vec<Register> = data
        .chunks_exact(8)
        .take(arm::VFP_REGS)
        .enumerate()
        .map(|(n, bytes)| Register::new(format!("D{}", n), bytes))
        .collect();

    let fpscr = arm::VFP_REGS * 8;
    if let Some(bytes) = data.get(fpscr..fpscr + 4) {
        out.push(Register::new("FPSCR", bytes));
    }

    out
}

impl<G: Gate> Thread<G> {
    /// Capture the general-purpose registers. No floating-point block is captured.
    pub fn registers(&self) -> Result<Registers> {
        let tid = self.tid();
        let regs = self.gate().exec(move |ptrace| ptrace.registers(tid))?;

        Ok(Registers::new(regs))
    }

    /// Capture the general-purpose and floating-point registers, for a later
    /// [`restore_registers()`](Thread::restore_registers).
    pub fn save_registers(&self) -> Result<Registers> {
        let mut regs = self.registers()?;
        let (_, fpregset) = self.fp_registers()?;
        regs.fpregset = Some(fpregset);

        Ok(regs)
    }

    /// Fetch the floating-point registers, decoded, along with the raw block they were
    /// decoded from.
    pub fn fp_registers(&self) -> Result<(Vec<Register>, Vec<u8>)> {
        let tid = self.tid();
        let raw = self.gate().exec(move |ptrace| ptrace.fp_registers(tid))?;

        Ok((decode_fp_registers(&raw), raw))
    }

    /// Write back a previously captured register set.
    ///
    /// The general-purpose registers are written first. The floating-point block, if one
    /// was captured, is only written if that succeeds.
    pub fn restore_registers(&self, saved: &Registers) -> Result<()> {
        let tid = self.tid();
        let Registers { regs, fpregset } = saved.clone();

        debug!(tid = tid.as_raw(), fp = fpregset.is_some(), "restoring registers");

        self.gate().exec(move |ptrace| {
            ptrace.set_registers(tid, &regs)?;

            if let Some(fpregset) = fpregset {
                ptrace.set_fp_registers(tid, &fpregset)?;
            }

            Ok(())
        })
    }
}
