//! Flat GDT: null, kernel code/data, user code/data, and the TSS
//! descriptor used to switch kernel stacks on a ring3 -> ring0 trap.
//!
//! Grounded in `Dentosal-rust_os/src/interrupt/gdt.rs`'s `GdtBuilder`/
//! `Descriptor` shape, reworked from that crate's 64-bit long-mode
//! descriptor bits (`LONG_MODE`, 16-byte TSS descriptors) down to classical
//! 32-bit flat-segment descriptors (base/limit/access/flags, 8-byte TSS
//! descriptor).

use core::mem::size_of;

use crate::interrupt::tss::Tss;

pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18 | 3;
pub const USER_DATA_SELECTOR: u16 = 0x20 | 3;
pub const TSS_SELECTOR: u16 = 0x28;

const GDT_ENTRIES: usize = 6;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// A single 8-byte flat-model GDT descriptor.
fn encode(base: u32, limit: u32, access: u8, flags: u8) -> u64 {
    let mut entry: u64 = 0;
    entry |= (limit as u64) & 0xFFFF;
    entry |= ((limit as u64) >> 16 & 0xF) << 48;
    entry |= ((base as u64) & 0xFF_FFFF) << 16;
    entry |= ((base as u64) >> 24 & 0xFF) << 56;
    entry |= (access as u64) << 40;
    entry |= (flags as u64 & 0xF) << 52;
    entry
}

const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_DESCRIPTOR: u8 = 1 << 4; // code/data, not a system segment
const ACCESS_EXECUTABLE: u8 = 1 << 3;
const ACCESS_RW: u8 = 1 << 1;
const ACCESS_DPL3: u8 = 3 << 5;
const ACCESS_TSS_AVAILABLE: u8 = 0x9;

const FLAGS_GRANULARITY_4K: u8 = 1 << 3;
const FLAGS_32BIT: u8 = 1 << 2;

static mut GDT: [u64; GDT_ENTRIES] = [0; GDT_ENTRIES];
static mut TSS: Tss = Tss::new();

/// Build and load the flat GDT plus the single TSS used for the ring3 ->
/// ring0 stack switch, then reload every segment register.
///
/// # Safety
/// Must run once, very early in boot, before any `int`/exception can fire.
pub unsafe fn init() {
    GDT[0] = 0;
    GDT[1] = encode(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_DESCRIPTOR | ACCESS_EXECUTABLE | ACCESS_RW,
        FLAGS_GRANULARITY_4K | FLAGS_32BIT,
    ); // kernel code
    GDT[2] = encode(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_DESCRIPTOR | ACCESS_RW,
        FLAGS_GRANULARITY_4K | FLAGS_32BIT,
    ); // kernel data
    GDT[3] = encode(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_DESCRIPTOR | ACCESS_EXECUTABLE | ACCESS_RW | ACCESS_DPL3,
        FLAGS_GRANULARITY_4K | FLAGS_32BIT,
    ); // user code
    GDT[4] = encode(
        0,
        0xFFFFF,
        ACCESS_PRESENT | ACCESS_DESCRIPTOR | ACCESS_RW | ACCESS_DPL3,
        FLAGS_GRANULARITY_4K | FLAGS_32BIT,
    ); // user data

    let tss_base = &TSS as *const Tss as u32;
    let tss_limit = (size_of::<Tss>() - 1) as u32;
    GDT[5] = encode(
        tss_base,
        tss_limit,
        ACCESS_PRESENT | ACCESS_TSS_AVAILABLE,
        0,
    );

    let pointer = GdtPointer {
        limit: (size_of::<[u64; GDT_ENTRIES]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    core::arch::asm!(
        "lgdt [{0}]",
        "mov ax, {1:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        "push {2:e}",
        "lea eax, [1f]",
        "push eax",
        "retf",
        "1:",
        in(reg) &pointer,
        in(reg) KERNEL_DATA_SELECTOR,
        in(reg) KERNEL_CODE_SELECTOR as u32,
        out("eax") _,
    );

    core::arch::asm!("ltr {0:x}", in(reg) TSS_SELECTOR);
}

/// Update the ring0 stack the CPU switches to on a ring3 -> ring0 trap.
/// Called by the scheduler on every dispatch to a user process.
pub fn set_kernel_stack(esp0: u32) {
    unsafe {
        TSS.esp0 = esp0;
        TSS.ss0 = KERNEL_DATA_SELECTOR as u32;
    }
}
