/// Description of the target needed to plant software breakpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Arch {
    max_instruction_length: usize,
    breakpoint_instruction: &'static [u8],
}

/// Little-endian `0xe7f001f0`, the undefined instruction the Linux ARM kernel reports
/// as a `SIGTRAP` breakpoint.
const ARM_BREAKPOINT: [u8; 4] = [0xf0, 0x01, 0xf0, 0xe7];

impl Arch {
    /// 32-bit ARM in A32 state.
    pub const ARM: Arch = Arch {
        max_instruction_length: 4,
        breakpoint_instruction: &ARM_BREAKPOINT,
    };

    pub const fn new(max_instruction_length: usize, breakpoint_instruction: &'static [u8]) -> Self {
        Self { max_instruction_length, breakpoint_instruction }
    }

    /// Upper bound on the length of one instruction, in bytes.
    pub fn max_instruction_length(&self) -> usize {
        self.max_instruction_length
    }

    /// Bytes written over an instruction to make it trap.
    pub fn breakpoint_instruction(&self) -> &'static [u8] {
        self.breakpoint_instruction
    }
}

impl Default for Arch {
    fn default() -> Self {
        Arch::ARM
    }
}
