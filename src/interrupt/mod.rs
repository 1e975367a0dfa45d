//! GDT/TSS/IDT setup and interrupt vector dispatch.
//!
//! Grounded in `Dentosal-rust_os/src/interrupt/mod.rs`'s `init`/`enable`
//! composition and `handler.rs`'s vector-to-handler dispatch shape,
//! reworked down from that crate's 64-bit SMP/APIC setup to a single-core
//! 32-bit PIC kernel per SPEC_FULL.md §3/§6. The ISR entry/exit machinery
//! itself lives in `boot/isr_stubs.asm`, assembled and linked by `build.rs`
//! exactly as `boot/entry.asm` is.

pub mod frame;
pub mod gdt;
pub mod idt;
pub mod tss;

use log::{trace, warn};

use crate::driver::{keyboard, pic};
use crate::interrupt::frame::TrapFrame;

const VECTOR_DIVIDE_ERROR: u8 = 0;
const VECTOR_PAGE_FAULT: u8 = 14;
const VECTOR_IRQ_BASE: u8 = pic::PIC1_OFFSET;
const VECTOR_TIMER: u8 = VECTOR_IRQ_BASE; // IRQ0
const VECTOR_KEYBOARD: u8 = VECTOR_IRQ_BASE + 1; // IRQ1
const VECTOR_SYSCALL: u8 = 0x80;

/// Declares `extern "C" { fn isr_stub_N(); ... }` for a list of vector
/// numbers and returns `[(vector, address), ...]` pairs for `idt::set_gate`.
macro_rules! isr_stub_table {
    ($($vector:literal => $name:ident),* $(,)?) => {{
        extern "C" {
            $(fn $name();)*
        }
        [$(($vector as u8, $name as usize as u32)),*]
    }};
}

/// Install the GDT/TSS, populate the IDT with every ISR stub, and load it.
/// Interrupts remain disabled (as they are at boot) until [`enable`] is
/// called by `rust_main` once the rest of kernel init has completed.
///
/// # Safety
/// Must run exactly once, before any interrupt can possibly fire.
pub unsafe fn init() {
    gdt::init();

    let stubs = isr_stub_table! {
        0 => isr_stub_0, 1 => isr_stub_1, 2 => isr_stub_2, 3 => isr_stub_3,
        4 => isr_stub_4, 5 => isr_stub_5, 6 => isr_stub_6, 7 => isr_stub_7,
        8 => isr_stub_8, 9 => isr_stub_9, 10 => isr_stub_10, 11 => isr_stub_11,
        12 => isr_stub_12, 13 => isr_stub_13, 14 => isr_stub_14, 15 => isr_stub_15,
        16 => isr_stub_16, 17 => isr_stub_17, 18 => isr_stub_18, 19 => isr_stub_19,
        20 => isr_stub_20, 21 => isr_stub_21, 22 => isr_stub_22, 23 => isr_stub_23,
        24 => isr_stub_24, 25 => isr_stub_25, 26 => isr_stub_26, 27 => isr_stub_27,
        28 => isr_stub_28, 29 => isr_stub_29, 30 => isr_stub_30, 31 => isr_stub_31,
        32 => isr_stub_32, 33 => isr_stub_33, 34 => isr_stub_34, 35 => isr_stub_35,
        36 => isr_stub_36, 37 => isr_stub_37, 38 => isr_stub_38, 39 => isr_stub_39,
        40 => isr_stub_40, 41 => isr_stub_41, 42 => isr_stub_42, 43 => isr_stub_43,
        44 => isr_stub_44, 45 => isr_stub_45, 46 => isr_stub_46, 47 => isr_stub_47,
        128 => isr_stub_128,
    };

    for (vector, handler) in stubs {
        idt::set_gate(vector, handler, vector == VECTOR_SYSCALL);
    }

    idt::load();
    pic::init();
}

/// Enable maskable interrupts (`sti`). Called once, late in `rust_main`.
pub fn enable() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
}

fn disable() -> bool {
    let flags: u32;
    unsafe {
        core::arch::asm!("pushfd; pop {0}; cli", out(reg) flags, options(nomem));
    }
    flags & (1 << 9) != 0
}

fn restore(was_enabled: bool) {
    if was_enabled {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) };
    }
}

/// Run `f` with interrupts disabled, restoring the prior IF state
/// afterwards. Grounded in `Dentosal-rust_os/src/interrupt/mod.rs`'s
/// `without_interrupts`.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    let was_enabled = disable();
    let result = f();
    restore(was_enabled);
    result
}

/// Entry point called by `isr_common_stub` for every vector. Returns the
/// trap frame to resume into, which may belong to a different process than
/// the one that was interrupted (a scheduler-driven context switch).
#[no_mangle]
pub extern "C" fn isr_dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let vector = unsafe { (*frame).int_no };

    match vector as u8 {
        VECTOR_PAGE_FAULT => return handle_page_fault(frame),
        v if v < VECTOR_IRQ_BASE => return handle_exception(frame),
        VECTOR_TIMER => return handle_timer(frame),
        VECTOR_KEYBOARD => {
            keyboard::handle_interrupt();
            pic::end_of_interrupt(1);
        }
        v if v >= VECTOR_IRQ_BASE && v < VECTOR_IRQ_BASE + 16 => {
            pic::end_of_interrupt(v - VECTOR_IRQ_BASE);
        }
        VECTOR_SYSCALL => return handle_syscall(frame),
        other => warn!("interrupt: unhandled vector {}", other),
    }

    frame
}

fn handle_exception(frame: *mut TrapFrame) -> *mut TrapFrame {
    let f = unsafe { &*frame };
    if f.was_user_mode() {
        warn!(
            "interrupt: exception {} in user pid {}, killing process",
            f.int_no,
            crate::process::scheduler::SCHEDULER.lock().current_pid()
        );
        let pid = crate::process::scheduler::SCHEDULER.lock().current_pid();
        crate::process::lifecycle::exit(pid, 128 + f.int_no as i32);
        return crate::process::scheduler::SCHEDULER.lock().tick(frame);
    }
    panic!(
        "unhandled CPU exception {} at eip={:#x} (err={:#x})",
        f.int_no, f.eip, f.err_code
    );
}

fn handle_page_fault(frame: *mut TrapFrame) -> *mut TrapFrame {
    let f = unsafe { &*frame };
    let fault_addr: u32;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) fault_addr, options(nomem, nostack));
    }
    let present = f.err_code & 0x1 != 0;
    let write = f.err_code & 0x2 != 0;
    let user = f.err_code & 0x4 != 0;

    let result = crate::memory::vmm::VMM
        .lock()
        .page_fault(fault_addr, present, write, user);

    match result {
        Ok(()) => frame,
        Err(_) if user => {
            let pid = crate::process::scheduler::SCHEDULER.lock().current_pid();
            warn!(
                "interrupt: segfault in pid {} at {:#x}, delivering SIGSEGV",
                pid, fault_addr
            );
            crate::process::lifecycle::exit(pid, 128 + crate::process::signal::Signal::Segv as i32);
            crate::process::scheduler::SCHEDULER.lock().tick(frame)
        }
        Err(e) => panic!(
            "unrecoverable kernel page fault at {:#x}: {:?}",
            fault_addr, e
        ),
    }
}

fn handle_timer(frame: *mut TrapFrame) -> *mut TrapFrame {
    pic::end_of_interrupt(0);
    let next = crate::process::scheduler::SCHEDULER.lock().tick(frame);
    trace!("interrupt: timer tick");
    next
}

fn handle_syscall(frame: *mut TrapFrame) -> *mut TrapFrame {
    crate::syscall::dispatch(frame)
}
