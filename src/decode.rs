//! Decoding of A32 instructions, down to the operands of those that can write the PC.
//!
//! Instructions that cannot redirect control flow are still classified, but decode to
//! [`Op::Other`] without operands.

use std::fmt;

/// Length of one A32 instruction, in bytes.
pub const INSTRUCTION_LEN: usize = 4;

#[derive(thiserror::Error, Clone, Debug, Eq, PartialEq)]
pub enum DecodeError {
    #[error("need 4 bytes to decode an instruction, got {0}")]
    Truncated(usize),

    #[error("undefined instruction {0:#010x}")]
    Undefined(u32),
}

/// A core register, `r0`-`r15`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Reg(u8);

impl Reg {
    pub const SP: Reg = Reg(13);
    pub const LR: Reg = Reg(14);
    pub const PC: Reg = Reg(15);

    /// Register `r{n}`, if `n` names one.
    pub fn new(n: u8) -> Option<Self> {
        if n < 16 {
            Some(Reg(n))
        } else {
            None
        }
    }

    /// Register numbered by the 4-bit field of `i` starting at bit `lsb`.
    fn field(i: u32, lsb: u32) -> Self {
        Reg(((i >> lsb) & 0xF) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Reg::SP => write!(f, "sp"),
            Reg::LR => write!(f, "lr"),
            Reg::PC => write!(f, "pc"),
            Reg(n) => write!(f, "r{}", n),
        }
    }
}

/// Bitmask of registers transferred by a block load, bit `n` selecting `r{n}`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegList(pub u16);

impl RegList {
    pub fn contains(self, reg: Reg) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of listed registers numbered below `reg`.
    pub fn below(self, reg: Reg) -> u32 {
        (self.0 & ((1u32 << reg.0) - 1) as u16).count_ones()
    }

    pub fn iter(self) -> impl Iterator<Item = Reg> {
        (0..16u8).filter(move |&n| self.0 & (1u16 << n) != 0).map(Reg)
    }
}

impl fmt::Display for RegList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (n, reg) in self.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", reg)?;
        }
        write!(f, "}}")
    }
}

/// Condition field of an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Cond {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
    /// The unconditional instruction space.
    Uncond,
}

impl Cond {
    fn decode(bits: u32) -> Self {
        use Cond::*;
        match bits & 0xF {
            0x0 => Eq,
            0x1 => Ne,
            0x2 => Cs,
            0x3 => Cc,
            0x4 => Mi,
            0x5 => Pl,
            0x6 => Vs,
            0x7 => Vc,
            0x8 => Hi,
            0x9 => Ls,
            0xA => Ge,
            0xB => Lt,
            0xC => Gt,
            0xD => Le,
            0xE => Al,
            _ => Uncond,
        }
    }

    fn suffix(self) -> &'static str {
        use Cond::*;
        match self {
            Eq => "eq",
            Ne => "ne",
            Cs => "cs",
            Cc => "cc",
            Mi => "mi",
            Pl => "pl",
            Vs => "vs",
            Vc => "vc",
            Hi => "hi",
            Ls => "ls",
            Ge => "ge",
            Lt => "lt",
            Gt => "gt",
            Le => "le",
            Al | Uncond => "",
        }
    }
}

/// Shift applied to a register operand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shift {
    Lsl,
    Lsr,
    Asr,
    Ror,
    /// Rotate right by one through the carry flag.
    Rrx,
}

impl Shift {
    fn decode(bits: u32) -> Self {
        match bits & 3 {
            0 => Shift::Lsl,
            1 => Shift::Lsr,
            2 => Shift::Asr,
            _ => Shift::Ror,
        }
    }

    /// Apply the shift to `value` in 32 bits. `carry` is only read by `RRX`.
    pub fn apply(self, value: u32, count: u32, carry: bool) -> u32 {
        match self {
            Shift::Lsl => value.checked_shl(count).unwrap_or(0),
            Shift::Lsr => value.checked_shr(count).unwrap_or(0),
            Shift::Asr => ((value as i32) >> count.min(31)) as u32,
            Shift::Ror => value.rotate_right(count),
            Shift::Rrx => (u32::from(carry) << 31) | (value >> 1),
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shift::Lsl => "lsl",
            Shift::Lsr => "lsr",
            Shift::Asr => "asr",
            Shift::Ror => "ror",
            Shift::Rrx => "rrx",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Sign {
    Plus,
    Minus,
}

/// Indexing of a single load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddrMode {
    /// `[rn, offset]`
    Offset,
    /// `[rn, offset]!`
    PreIndex,
    /// `[rn], offset`: the access uses `rn` unmodified.
    PostIndex,
}

/// Block transfer addressing: increment/decrement, after/before.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockMode {
    Ia,
    Ib,
    Da,
    Db,
}

/// Offset of a memory operand.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Offset {
    /// Signed byte offset.
    Imm(i32),
    /// `±index, shift #count`
    Reg {
        sign: Sign,
        index: Reg,
        shift: Shift,
        count: u8,
    },
}

/// Memory-addressing operand of a single load.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mem {
    pub base: Reg,
    pub mode: AddrMode,
    pub offset: Offset,
}

/// An instruction operand. Each shape carries only what it needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arg {
    Imm(u32),
    Reg(Reg),
    /// Register shifted by an immediate amount. `count` is 1-32, and ignored for `RRX`.
    RegShift { reg: Reg, shift: Shift, count: u8 },
    /// Register shifted by the low byte of another register.
    RegShiftReg { reg: Reg, shift: Shift, rs: Reg },
    /// Offset from the address of the instruction itself.
    PcRel(i32),
    Mem(Mem),
    RegList(RegList),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op {
    B,
    Bl,
    Bx,
    Blx,
    /// `LDMIA sp!, {..}`, or `LDR rt, [sp], #4`.
    Pop,
    /// Any other block load.
    Ldm(BlockMode),
    Ldr,
    Mov,
    Add,
    Sub,
    /// A defined instruction that cannot write the PC.
    Other,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub raw: u32,
    pub op: Op,
    pub cond: Cond,
    pub args: Vec<Arg>,
}

impl Instruction {
    fn new(raw: u32, op: Op, args: Vec<Arg>) -> Self {
        let cond = Cond::decode(raw >> 28);
        Self { raw, op, cond, args }
    }

    fn other(raw: u32) -> Self {
        Self::new(raw, Op::Other, vec![])
    }
}

/// Decode one little-endian A32 instruction from the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Instruction, DecodeError> {
    if bytes.len() < INSTRUCTION_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }

    let mut word = [0; INSTRUCTION_LEN];
    word.copy_from_slice(&bytes[..INSTRUCTION_LEN]);

    decode_word(u32::from_le_bytes(word))
}

/// Decode an A32 instruction word.
pub fn decode_word(i: u32) -> Result<Instruction, DecodeError> {
    if i >> 28 == 0xF {
        return Ok(decode_unconditional(i));
    }

    let instr = match (i >> 25) & 0b111 {
        0b000 => decode_alu_register(i),
        0b001 => decode_alu_immediate(i),
        0b010 => decode_transfer(i),
        0b011 => {
            if test_bit(i, 4) {
                decode_media(i)?
            } else {
                decode_transfer(i)
            }
        },
        0b100 => decode_block(i),
        0b101 => decode_branch(i),
        // Coprocessor, VFP and SVC. None of these write the PC in user mode.
        _ => Instruction::other(i),
    };

    Ok(instr)
}

fn test_bit(i: u32, n: u32) -> bool {
    i & (1 << n) != 0
}

/// Sign-extended, word-scaled 24-bit branch offset.
fn branch_offset(i: u32) -> i32 {
    ((i << 8) as i32) >> 6
}

/// The PC reads 8 bytes ahead of the instruction in A32 state.
const PC_BIAS: i32 = 8;

/// cond == 0b1111
fn decode_unconditional(i: u32) -> Instruction {
    if (i >> 25) & 0b111 == 0b101 {
        // BLX (immediate). The H bit selects a halfword-aligned Thumb target.
        let halfword = ((i >> 24) & 1) << 1;
        let offset = branch_offset(i) | halfword as i32;
        return Instruction::new(i, Op::Blx, vec![Arg::PcRel(offset + PC_BIAS)]);
    }

    Instruction::other(i)
}

/// cccc101L
fn decode_branch(i: u32) -> Instruction {
    let op = if test_bit(i, 24) { Op::Bl } else { Op::B };
    Instruction::new(i, op, vec![Arg::PcRel(branch_offset(i) + PC_BIAS)])
}

/// cccc000
fn decode_alu_register(i: u32) -> Instruction {
    match i & 0x0FFF_FFF0 {
        // BXJ falls back to BX when Jazelle is unavailable, as it is on Linux.
        0x012F_FF10 | 0x012F_FF20 => {
            return Instruction::new(i, Op::Bx, vec![Arg::Reg(Reg::field(i, 0))]);
        },
        0x012F_FF30 => {
            return Instruction::new(i, Op::Blx, vec![Arg::Reg(Reg::field(i, 0))]);
        },
        _ => {},
    }

    // Multiplies and extra load/stores.
    if test_bit(i, 7) && test_bit(i, 4) {
        return Instruction::other(i);
    }

    // Miscellaneous instructions: TST/TEQ/CMP/CMN encodings without S.
    if (i >> 23) & 0b11 == 0b10 && !test_bit(i, 20) {
        return Instruction::other(i);
    }

    decode_data_proc(i, decode_register_operand(i))
}

/// cccc001
fn decode_alu_immediate(i: u32) -> Instruction {
    // MSR (immediate), MOVW and MOVT.
    if (i >> 23) & 0b11 == 0b10 && !test_bit(i, 20) {
        return Instruction::other(i);
    }

    let rotate = (i >> 7) & 0x1E;
    let imm = (i & 0xFF).rotate_right(rotate);

    decode_data_proc(i, Arg::Imm(imm))
}

/// Register form of the second operand of a data-processing instruction.
fn decode_register_operand(i: u32) -> Arg {
    let reg = Reg::field(i, 0);
    let shift = Shift::decode(i >> 5);

    if test_bit(i, 4) {
        return Arg::RegShiftReg { reg, shift, rs: Reg::field(i, 8) };
    }

    match decode_imm_shift(shift, (i >> 7) & 0x1F) {
        None => Arg::Reg(reg),
        Some((shift, count)) => Arg::RegShift { reg, shift, count },
    }
}

/// Interpret a 5-bit immediate shift amount, where 0 encodes `LSR #32`, `ASR #32`,
/// `RRX`, or no shift at all.
fn decode_imm_shift(shift: Shift, amount: u32) -> Option<(Shift, u8)> {
    match (shift, amount) {
        (Shift::Lsl, 0) => None,
        (Shift::Lsr, 0) | (Shift::Asr, 0) => Some((shift, 32)),
        (Shift::Ror, 0) => Some((Shift::Rrx, 1)),
        _ => Some((shift, amount as u8)),
    }
}

fn decode_data_proc(i: u32, op2: Arg) -> Instruction {
    let rn = Arg::Reg(Reg::field(i, 16));
    let rd = Arg::Reg(Reg::field(i, 12));

    match (i >> 21) & 0xF {
        0x2 => Instruction::new(i, Op::Sub, vec![rd, rn, op2]),
        0x4 => Instruction::new(i, Op::Add, vec![rd, rn, op2]),
        0xD => Instruction::new(i, Op::Mov, vec![rd, op2]),
        _ => Instruction::other(i),
    }
}

/// cccc011.....................1....
fn decode_media(i: u32) -> Result<Instruction, DecodeError> {
    // Permanently undefined (UDF), which includes the kernel breakpoint.
    if i & 0x0FF0_00F0 == 0x07F0_00F0 {
        return Err(DecodeError::Undefined(i));
    }

    Ok(Instruction::other(i))
}

/// cccc01IPUBWL: single word and byte transfers.
fn decode_transfer(i: u32) -> Instruction {
    let load = test_bit(i, 20);
    let byte = test_bit(i, 22);

    if !load || byte {
        return Instruction::other(i);
    }

    let rt = Reg::field(i, 12);
    let base = Reg::field(i, 16);

    // POP (A2): LDR rt, [sp], #4
    if i & 0x0FFF_0FFF == 0x049D_0004 {
        return Instruction::new(i, Op::Pop, vec![Arg::RegList(RegList(1 << rt.0))]);
    }

    let pre_index = test_bit(i, 24);
    let writeback = test_bit(i, 21);
    let mode = match (pre_index, writeback) {
        (true, false) => AddrMode::Offset,
        (true, true) => AddrMode::PreIndex,
        (false, _) => AddrMode::PostIndex,
    };

    let sign = if test_bit(i, 23) { Sign::Plus } else { Sign::Minus };

    let offset = if test_bit(i, 25) {
        let index = Reg::field(i, 0);
        let (shift, count) = decode_imm_shift(Shift::decode(i >> 5), (i >> 7) & 0x1F)
            .unwrap_or((Shift::Lsl, 0));
        Offset::Reg { sign, index, shift, count }
    } else {
        let imm = (i & 0xFFF) as i32;
        match sign {
            Sign::Plus => Offset::Imm(imm),
            Sign::Minus => Offset::Imm(-imm),
        }
    };

    let mem = Mem { base, mode, offset };

    Instruction::new(i, Op::Ldr, vec![Arg::Reg(rt), Arg::Mem(mem)])
}

/// cccc100PUSWL: block transfers.
fn decode_block(i: u32) -> Instruction {
    if !test_bit(i, 20) {
        return Instruction::other(i);
    }

    let base = Reg::field(i, 16);
    let list = RegList((i & 0xFFFF) as u16);
    let writeback = test_bit(i, 21);

    let mode = match (test_bit(i, 24), test_bit(i, 23)) {
        (false, true) => BlockMode::Ia,
        (true, true) => BlockMode::Ib,
        (false, false) => BlockMode::Da,
        (true, false) => BlockMode::Db,
    };

    if base == Reg::SP && writeback && mode == BlockMode::Ia {
        return Instruction::new(i, Op::Pop, vec![Arg::RegList(list)]);
    }

    Instruction::new(i, Op::Ldm(mode), vec![Arg::Reg(base), Arg::RegList(list)])
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Offset::Imm(imm) => write!(f, "#{}", imm),
            Offset::Reg { sign, index, shift, count } => {
                let sign = if sign == Sign::Minus { "-" } else { "" };
                match (shift, count) {
                    (Shift::Lsl, 0) => write!(f, "{}{}", sign, index),
                    (Shift::Rrx, _) => write!(f, "{}{}, rrx", sign, index),
                    _ => write!(f, "{}{}, {} #{}", sign, index, shift, count),
                }
            },
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Arg::Imm(imm) => write!(f, "#{:#x}", imm),
            Arg::Reg(reg) => write!(f, "{}", reg),
            Arg::RegShift { reg, shift: Shift::Rrx, .. } => write!(f, "{}, rrx", reg),
            Arg::RegShift { reg, shift, count } => write!(f, "{}, {} #{}", reg, shift, count),
            Arg::RegShiftReg { reg, shift, rs } => write!(f, "{}, {} {}", reg, shift, rs),
            Arg::PcRel(offset) if offset < 0 => write!(f, ".-{:#x}", -i64::from(offset)),
            Arg::PcRel(offset) => write!(f, ".+{:#x}", offset),
            Arg::Mem(Mem { base, mode, offset }) => match mode {
                AddrMode::Offset => write!(f, "[{}, {}]", base, offset),
                AddrMode::PreIndex => write!(f, "[{}, {}]!", base, offset),
                AddrMode::PostIndex => write!(f, "[{}], {}", base, offset),
            },
            Arg::RegList(list) => write!(f, "{}", list),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self.op {
            Op::B => "b",
            Op::Bl => "bl",
            Op::Bx => "bx",
            Op::Blx => "blx",
            Op::Pop => "pop",
            Op::Ldm(BlockMode::Ia) => "ldmia",
            Op::Ldm(BlockMode::Ib) => "ldmib",
            Op::Ldm(BlockMode::Da) => "ldmda",
            Op::Ldm(BlockMode::Db) => "ldmdb",
            Op::Ldr => "ldr",
            Op::Mov => "mov",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Other => return write!(f, ".inst {:#010x}", self.raw),
        };

        write!(f, "{}{}", mnemonic, self.cond.suffix())?;

        for (n, arg) in self.args.iter().enumerate() {
            let sep = if n == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, arg)?;
        }

        Ok(())
    }
}
