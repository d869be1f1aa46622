//! Next-PC resolution: every address a thread could execute after its current instruction.

use tracing::{trace, warn};

use crate::decode::{self, AddrMode, Arg, BlockMode, Instruction, Mem, Offset, Op, Reg, RegList, Sign};
use crate::error::{Error, Result};
use crate::gate::{Gate, Ptrace};
use crate::regs::Registers;
use crate::thread::Thread;

/// Size of a stacked register, in bytes.
const WORD_SIZE: u32 = 4;

impl<G: Gate> Thread<G> {
    /// Resolve the candidate next PCs of the instruction at `regs.pc()`.
    ///
    /// The first candidate is always the fall-through address `pc + max_instruction_length`.
    /// Any others are the targets the instruction could transfer control to. Candidates may
    /// repeat.
    pub fn next_pcs(&self, regs: &Registers) -> Result<Vec<u64>> {
        let pc = regs.pc();
        let len = self.arch().max_instruction_length();

        let bytes = self.read_memory(u64::from(pc), len)?;

        let mut next_pcs = vec![u64::from(pc) + len as u64];

        if regs.is_thumb() {
            warn!(tid = self.tid().as_raw(), pc, "thread is in Thumb state, decoding as A32");
        }

        let instr = decode::decode(&bytes)
            .map_err(|source| Error::Decode { addr: u64::from(pc), source })?;

        trace!(pc, %instr, "decoded instruction");

        if let Some(target) = self.branch_target(&instr, regs)? {
            next_pcs.push(u64::from(target));
        }

        trace!(?next_pcs, "resolved next PCs");

        Ok(next_pcs)
    }

    /// Where `instr` writes the PC, if it can.
    fn branch_target(&self, instr: &Instruction, regs: &Registers) -> Result<Option<u32>> {
        let target = match (instr.op, instr.args.as_slice()) {
            (Op::B, [arg, ..]) |
            (Op::Bl, [arg, ..]) |
            (Op::Bx, [arg, ..]) |
            (Op::Blx, [arg, ..]) => {
                match *arg {
                    Arg::Imm(imm) => Some(imm),
                    Arg::Reg(reg) => Some(regs.operand(reg)),
                    Arg::PcRel(offset) => Some(regs.pc().wrapping_add(offset as u32)),
                    _ => None,
                }
            },
            (Op::Pop, [Arg::RegList(list), ..]) if list.contains(Reg::PC) => {
                let addr = regs.sp().wrapping_add(WORD_SIZE * list.below(Reg::PC));
                Some(self.read_word(addr)?)
            },
            (Op::Ldm(mode), [Arg::Reg(base), Arg::RegList(list), ..]) if list.contains(Reg::PC) => {
                let addr = block_pc_slot(regs.operand(*base), mode, *list);
                Some(self.read_word(addr)?)
            },
            (Op::Ldr, [Arg::Reg(Reg::PC), Arg::Mem(mem), ..]) => {
                let addr = effective_address(mem, regs);
                Some(self.read_word(addr)?)
            },
            (Op::Mov, [Arg::Reg(Reg::PC), sources @ ..]) |
            (Op::Add, [Arg::Reg(Reg::PC), sources @ ..]) => {
                let sum = sources
                    .iter()
                    .fold(0u32, |sum, arg| sum.wrapping_add(eval(arg, regs)));
                Some(sum)
            },
            (Op::Sub, [Arg::Reg(Reg::PC), rn, op2, ..]) => {
                Some(eval(rn, regs).wrapping_sub(eval(op2, regs)))
            },
            _ => None,
        };

        Ok(target)
    }

    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let tid = self.tid();

        self.gate().exec(move |ptrace| {
            let mut data = vec![0; len];
            ptrace.read_memory(tid, addr, &mut data)?;
            Ok(data)
        })
    }

    /// Read one little-endian word of tracee memory.
    fn read_word(&self, addr: u32) -> Result<u32> {
        let bytes = self.read_memory(u64::from(addr), WORD_SIZE as usize)?;

        let mut word = [0; WORD_SIZE as usize];
        word.copy_from_slice(&bytes);

        Ok(u32::from_le_bytes(word))
    }
}

/// Value of a data-processing source operand.
fn eval(arg: &Arg, regs: &Registers) -> u32 {
    match *arg {
        Arg::Imm(imm) => imm,
        Arg::Reg(reg) => regs.operand(reg),
        Arg::RegShift { reg, shift, count } => {
            shift.apply(regs.operand(reg), u32::from(count), regs.carry())
        },
        Arg::RegShiftReg { reg, shift, rs } => {
            let count = regs.operand(rs) & 0xFF;
            shift.apply(regs.operand(reg), count, regs.carry())
        },
        Arg::PcRel(offset) => regs.pc().wrapping_add(offset as u32),
        Arg::Mem(_) | Arg::RegList(_) => 0,
    }
}

/// Address a single load reads from.
fn effective_address(mem: &Mem, regs: &Registers) -> u32 {
    let base = regs.operand(mem.base);

    if mem.mode == AddrMode::PostIndex {
        return base;
    }

    match mem.offset {
        Offset::Imm(offset) => base.wrapping_add(offset as u32),
        Offset::Reg { sign, index, shift, count } => {
            let index = shift.apply(regs.operand(index), u32::from(count), regs.carry());
            match sign {
                Sign::Plus => base.wrapping_add(index),
                Sign::Minus => base.wrapping_sub(index),
            }
        },
    }
}

/// Address the PC is loaded from by a block load. The PC is always the highest
/// register, so it occupies the highest address of the transfer.
fn block_pc_slot(base: u32, mode: BlockMode, list: RegList) -> u32 {
    let below = WORD_SIZE * list.below(Reg::PC);

    match mode {
        BlockMode::Ia => base.wrapping_add(below),
        BlockMode::Ib => base.wrapping_add(below + WORD_SIZE),
        BlockMode::Da => base,
        BlockMode::Db => base.wrapping_sub(WORD_SIZE),
    }
}
