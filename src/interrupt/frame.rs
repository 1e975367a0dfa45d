//! The trap frame: the fixed-layout record the common ISR stub builds on
//! the kernel stack before calling into Rust, and consumes again (via
//! `iret`) on the way back out.
//!
//! Layout grounded in SPEC_FULL.md §3 ("all general-purpose registers in
//! push-all order, data segment selectors, the interrupt vector, an error
//! code... and the CPU-pushed return frame") and the classic bare-metal
//! x86 `pusha`-based ISR-stub convention the teacher's own
//! `interrupt/macros.rs` idiom descends from (64-bit `iretq` there, 32-bit
//! `iret` here per SPEC_FULL.md's target).

use static_assertions::const_assert_eq;

/// Registers in the order the x86 `pusha` instruction pushes them:
/// EDI, ESI, EBP, (dummy ESP), EBX, EDX, ECX, EAX.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PushaRegisters {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

/// The full on-stack trap frame, matching `boot/interrupt_stubs.asm`'s
/// push order exactly (lowest address first, i.e. most-recently-pushed
/// field first in this struct since the stack grows down).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub gpr: PushaRegisters,
    /// Saved data-segment selector (DS at the time of the trap).
    pub ds: u32,
    /// Interrupt vector number.
    pub int_no: u32,
    /// CPU-pushed error code, or 0 for interrupts that carry none.
    pub err_code: u32,
    // CPU-pushed return frame:
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    /// Only meaningful (and only pushed by the CPU) when the trap was
    /// taken from a lower privilege level (ring 3 -> ring 0).
    pub user_esp: u32,
    pub user_ss: u32,
}

const_assert_eq!(core::mem::size_of::<TrapFrame>(), 19 * 4);

impl TrapFrame {
    /// Syscall argument/return-value accessors per SPEC_FULL.md §4.7's
    /// ABI: number and return value in EAX, five args in EBX/ECX/EDX/ESI/EDI.
    pub fn syscall_number(&self) -> u32 {
        self.gpr.eax
    }

    pub fn syscall_args(&self) -> [u32; 5] {
        [self.gpr.ebx, self.gpr.ecx, self.gpr.edx, self.gpr.esi, self.gpr.edi]
    }

    pub fn set_return_value(&mut self, value: i32) {
        self.gpr.eax = value as u32;
    }

    pub fn was_user_mode(&self) -> bool {
        (self.cs & 0x3) == 3
    }

    /// Rewind `eip` past the two-byte `int 0x80` that trapped here, so
    /// `iret` re-executes the instruction from scratch. Used by syscalls
    /// that discover they must block (e.g. `wait` with no zombie child yet):
    /// rather than returning a meaningless value, the syscall is restarted
    /// in full once the blocking condition clears.
    pub fn rewind_syscall_instruction(&mut self) {
        self.eip = self.eip.wrapping_sub(2);
    }
}
