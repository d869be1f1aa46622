//! Kernel ABI definitions for 32-bit ARM tracees.
#![allow(non_camel_case_types)]

/// Linux constant defined in `include/uapi/linux/elf.h`.
pub(crate) const NT_PRSTATUS: libc::c_int = 0x1;

/// ARM VFP/NEON registers, defined in `include/uapi/linux/elf.h`.
pub(crate) const NT_ARM_VFP: libc::c_int = 0x400;

/// Size of the `NT_ARM_VFP` regset: 32 doubleword registers followed by `FPSCR`.
///
/// Defined in [`arch/arm/include/uapi/asm/ptrace.h`](https://github.com/torvalds/linux/blob/v6.1/arch/arm/include/uapi/asm/ptrace.h).
pub const ARM_VFPREGS_SIZE: usize = 32 * 8 + 4;

/// Number of doubleword VFP registers in the `NT_ARM_VFP` regset.
pub const VFP_REGS: usize = 32;

/// Index of `CPSR` in `user_regs::uregs`.
pub const ARM_CPSR: usize = 16;

/// Index of `ORIG_r0` in `user_regs::uregs`.
pub const ARM_ORIG_R0: usize = 17;

/// General-purpose register state of a 32-bit ARM tracee, as transferred by the
/// `NT_PRSTATUS` regset.
///
/// Defined in [`arch/arm/include/asm/user.h`](https://github.com/torvalds/linux/blob/v6.1/arch/arm/include/asm/user.h):
/// `r0`-`r15`, then `CPSR` and `ORIG_r0`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct user_regs {
    pub uregs: [u32; 18],
}

/// `CPSR` bits consulted while resolving next PCs.
pub mod cpsr {
    /// Carry flag.
    pub const C: u32 = 1 << 29;

    /// Thumb execution state.
    pub const T: u32 = 1 << 5;
}
