//! The syscall gate: dispatch table, argument marshaling, user-pointer
//! validation, and every registered handler.
//!
//! Grounded in `original_source/kernel/include/kernel/syscall.h` (the
//! `SYS_*` numbering and `NUM_SYSCALLS`) and
//! `Dentosal-rust_os/src/syscall/mod.rs`'s `SyscallResult { success, result }`
//! shape, generalized to the full table in SPEC_FULL.md §4.7. The
//! temporary-slot-mediated user buffer access resolves Open Question #4 in
//! DESIGN.md: every user-facing read or write, not just COW and exec, goes
//! through a temp slot rather than a direct kernel-window alias.

use alloc::string::String;
use alloc::vec::Vec;
use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

use crate::constants::{KERNEL_VIRT_BASE, NSIG, PAGE_SIZE, TIMER_HZ};
use crate::error::{KResult, KernelError};
use crate::interrupt::frame::TrapFrame;
use crate::memory::pmm::FRAME_ALLOCATOR;
use crate::memory::vmm::VMM;
use crate::process::pcb::{Pid, ProcessState};
use crate::process::scheduler::SCHEDULER;
use crate::process::signal::{DeliveryOutcome, Signal, SignalDisposition};
use crate::process::table::PROCESS_TABLE;
use crate::process::{lifecycle, signal as sig};

/// Registered syscall numbers, per SPEC_FULL.md §4.7's table. Deliberately
/// sparse (24, 25, 28, 29, 30 are unassigned); `TryFromPrimitive` rejects
/// those the same way it rejects anything past `NUM_SYSCALLS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum SyscallNumber {
    Exit = 1,
    Write = 2,
    Read = 3,
    Open = 4,
    Close = 5,
    Fork = 6,
    Exec = 7,
    Wait = 8,
    GetPid = 9,
    LSeek = 10,
    GetPPid = 11,
    Yield = 12,
    Sleep = 13,
    Brk = 14,
    SBrk = 15,
    Stat = 16,
    FStat = 17,
    Kill = 18,
    Signal = 19,
    Uptime = 20,
    Sysinfo = 21,
    GetUid = 22,
    SetUid = 23,
    Chdir = 26,
    GetCwd = 27,
    GetTime = 31,
    Reboot = 32,
}

const PATH_MAX: usize = crate::process::pcb::CWD_MAX;

/// Caller-supplied stat buffer: thirteen 32-bit fields per SPEC_FULL.md §6.
#[repr(C)]
struct StatBuf {
    dev: u32,
    ino: u32,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    rdev: u32,
    size: u32,
    blksize: u32,
    blocks: u32,
    atime: u32,
    mtime: u32,
    ctime: u32,
}

/// Caller-supplied sysinfo buffer per SPEC_FULL.md §6.
#[repr(C)]
struct SysinfoBuf {
    uptime: u32,
    total_mem: u32,
    free_mem: u32,
    total_processes: u32,
    running_processes: u32,
    context_switches: u32,
}

// --- User pointer / buffer access -------------------------------------

/// A pointer (plus length) is valid only if it and its end both lie below
/// the kernel boundary (`KERNEL_VIRT_BASE`, 3 GiB). Rejects without
/// touching memory, per SPEC_FULL.md §4.7.
fn validate_user_ptr(ptr: u32, len: u32) -> KResult<()> {
    if ptr == 0 && len != 0 {
        return Err(KernelError::BadUserPointer);
    }
    let end = ptr.checked_add(len).ok_or(KernelError::BadUserPointer)?;
    if ptr >= KERNEL_VIRT_BASE || end > KERNEL_VIRT_BASE {
        return Err(KernelError::BadUserPointer);
    }
    Ok(())
}

/// Copy up to `buf.len()` bytes starting at `user_ptr` in the *current*
/// address space into `buf`, page by page through a temporary slot. Stops
/// (short count) the moment a page fails to translate or no slot is free.
fn copy_from_user(user_ptr: u32, buf: &mut [u8]) -> usize {
    let mut copied = 0usize;
    while copied < buf.len() {
        let vaddr = user_ptr.wrapping_add(copied as u32);
        let page_base = vaddr & !((PAGE_SIZE as u32) - 1);
        let page_offset = (vaddr - page_base) as usize;
        let chunk = (PAGE_SIZE - page_offset).min(buf.len() - copied);

        let mut vmm = VMM.lock();
        let paddr = match vmm.translate(page_base) {
            Some(p) => p,
            None => break,
        };
        let slot = match vmm.alloc_slot() {
            Some(s) => s,
            None => break,
        };
        let slot_vaddr = match vmm.map_slot(slot, paddr) {
            Ok(v) => v,
            Err(_) => {
                vmm.free_slot(slot);
                break;
            }
        };
        unsafe {
            let src = (slot_vaddr as usize + page_offset) as *const u8;
            core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr().add(copied), chunk);
        }
        vmm.unmap_slot(slot);
        vmm.free_slot(slot);
        drop(vmm);
        copied += chunk;
    }
    copied
}

/// The write-side counterpart of [`copy_from_user`].
fn copy_to_user(user_ptr: u32, buf: &[u8]) -> usize {
    let mut copied = 0usize;
    while copied < buf.len() {
        let vaddr = user_ptr.wrapping_add(copied as u32);
        let page_base = vaddr & !((PAGE_SIZE as u32) - 1);
        let page_offset = (vaddr - page_base) as usize;
        let chunk = (PAGE_SIZE - page_offset).min(buf.len() - copied);

        let mut vmm = VMM.lock();
        let paddr = match vmm.translate(page_base) {
            Some(p) => p,
            None => break,
        };
        let slot = match vmm.alloc_slot() {
            Some(s) => s,
            None => break,
        };
        let slot_vaddr = match vmm.map_slot(slot, paddr) {
            Ok(v) => v,
            Err(_) => {
                vmm.free_slot(slot);
                break;
            }
        };
        unsafe {
            let dst = (slot_vaddr as usize + page_offset) as *mut u8;
            core::ptr::copy_nonoverlapping(buf.as_ptr().add(copied), dst, chunk);
        }
        vmm.unmap_slot(slot);
        vmm.free_slot(slot);
        drop(vmm);
        copied += chunk;
    }
    copied
}

/// Read a NUL-terminated string of at most `max_len` bytes out of user
/// space (used for `open`/`exec`/`chdir` path arguments).
fn read_user_cstring(ptr: u32, max_len: usize) -> KResult<String> {
    validate_user_ptr(ptr, max_len as u32)?;
    let mut raw = vec![0u8; max_len];
    let n = copy_from_user(ptr, &mut raw);
    let len = raw[..n].iter().position(|&b| b == 0).unwrap_or(n);
    core::str::from_utf8(&raw[..len])
        .map(String::from)
        .map_err(|_| KernelError::BadUserPointer)
}

fn align_up(n: u32, align: u32) -> u32 {
    (n + align - 1) & !(align - 1)
}

// --- Dispatch ----------------------------------------------------------

/// Entry point called by `interrupt::isr_dispatch` for vector `0x80`.
/// Returns the frame to resume into: almost always `frame` itself, except
/// when the syscall blocks (`wait`, `sleep`) or a signal checkpoint
/// terminates/stops the caller, in which case the scheduler has already
/// switched to a different task's frame.
pub fn dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let f = unsafe { &mut *frame };
    let pid = SCHEDULER.lock().current_pid();
    let number = f.syscall_number();
    let args = f.syscall_args();

    match SyscallNumber::try_from(number) {
        Ok(SyscallNumber::Exit) => return dispatch_exit(pid, args, frame),
        Ok(SyscallNumber::Wait) => return dispatch_wait(pid, args, frame),
        Ok(SyscallNumber::Sleep) => return dispatch_sleep(pid, args, frame),
        Ok(known) => {
            let ret = handle(pid, known, args);
            f.set_return_value(ret);
        }
        Err(_) => {
            f.set_return_value(KernelError::InvalidSyscall.as_syscall_return());
        }
    }

    apply_signal_checkpoint(pid, frame)
}

/// `exit` never returns to its caller per SPEC_FULL.md §4.6: mark the PCB
/// Zombie, then force an immediate reschedule (the "yield" the spec
/// prescribes) rather than falling through to `apply_signal_checkpoint`,
/// which would otherwise hand the now-Zombie frame straight back to the
/// ISR stub and let the exited process execute a few more instructions
/// before the next timer tick notices it is non-runnable.
fn dispatch_exit(pid: Pid, args: [u32; 5], frame: *mut TrapFrame) -> *mut TrapFrame {
    sys_exit(pid, args[0] as i32);
    // `frame` belongs to the now-Zombie process's kernel stack; `tick` drops
    // a non-runnable current (step 2) before it would ever be recorded as
    // anyone's saved context, so handing it back in unchanged is safe and
    // avoids inventing a frame pointer that doesn't point at a real trap frame.
    SCHEDULER.lock().tick(frame)
}

fn dispatch_wait(pid: Pid, args: [u32; 5], frame: *mut TrapFrame) -> *mut TrapFrame {
    let want_pid = if args[0] as i32 == -1 {
        None
    } else {
        Some(args[0])
    };
    let status_ptr = args[1];

    match lifecycle::try_reap(pid, want_pid) {
        Ok(Some((reaped_pid, exit_code))) => {
            if status_ptr != 0 && validate_user_ptr(status_ptr, 4).is_ok() {
                copy_to_user(status_ptr, &exit_code.to_ne_bytes());
            }
            let f = unsafe { &mut *frame };
            f.set_return_value(reaped_pid as i32);
            apply_signal_checkpoint(pid, frame)
        }
        Ok(None) => {
            let f = unsafe { &mut *frame };
            f.rewind_syscall_instruction();
            SCHEDULER.lock().block_current();
            SCHEDULER.lock().tick(frame)
        }
        Err(e) => {
            let f = unsafe { &mut *frame };
            f.set_return_value(e.as_syscall_return());
            apply_signal_checkpoint(pid, frame)
        }
    }
}

fn dispatch_sleep(pid: Pid, args: [u32; 5], frame: *mut TrapFrame) -> *mut TrapFrame {
    let ticks = args[0] as u64;
    let f = unsafe { &mut *frame };
    if ticks == 0 {
        f.set_return_value(0);
        return apply_signal_checkpoint(pid, frame);
    }
    f.set_return_value(0);
    let wake_at = SCHEDULER.lock().now() + ticks;
    SCHEDULER.lock().sleep_current_until(wake_at);
    SCHEDULER.lock().tick(frame)
}

/// Apply any pending default-disposition signal against `pid` after its
/// syscall has otherwise completed, per SPEC_FULL.md §4.9's "end of
/// syscall" checkpoint.
fn apply_signal_checkpoint(pid: Pid, frame: *mut TrapFrame) -> *mut TrapFrame {
    let outcome = {
        let mut table = PROCESS_TABLE.lock();
        match table.get_mut(pid) {
            Some(pcb) => sig::deliver_pending(pcb),
            None => return frame,
        }
    };

    match outcome {
        DeliveryOutcome::Terminate(code) => {
            lifecycle::exit(pid, code);
            SCHEDULER.lock().tick(frame)
        }
        DeliveryOutcome::Stop => {
            if let Some(pcb) = PROCESS_TABLE.lock().get_mut(pid) {
                pcb.state = ProcessState::Stopped;
            }
            SCHEDULER.lock().tick(frame)
        }
        DeliveryOutcome::Continue => {
            if let Some(pcb) = PROCESS_TABLE.lock().get_mut(pid) {
                pcb.state = ProcessState::Ready;
            }
            frame
        }
        DeliveryOutcome::NoAction => frame,
    }
}

/// Dispatch every non-blocking syscall to its handler, returning the raw
/// EAX value (negative on error, per `KernelError::as_syscall_return`).
fn handle(pid: Pid, number: SyscallNumber, args: [u32; 5]) -> i32 {
    match number {
        SyscallNumber::Exit => {
            // `dispatch` intercepts `Exit` before `handle` is ever called
            // (see `dispatch_exit`), for the same reason `Wait` and `Sleep`
            // are intercepted: only `dispatch` can return a different trap
            // frame. This arm exists solely so the match stays exhaustive.
            sys_exit(pid, args[0] as i32);
            0
        }
        SyscallNumber::Write => ok_or_err(sys_write(pid, args[0], args[1], args[2])),
        SyscallNumber::Read => ok_or_err(sys_read(pid, args[0], args[1], args[2])),
        SyscallNumber::Open => ok_or_err(sys_open(pid, args[0], args[1])),
        SyscallNumber::Close => ok_or_err_unit(sys_close(pid, args[0])),
        SyscallNumber::Fork => ok_or_err(sys_fork(pid)),
        SyscallNumber::Exec => ok_or_err_unit(sys_exec(pid, args[0], args[1])),
        SyscallNumber::GetPid => pid as i32,
        SyscallNumber::LSeek => ok_or_err(sys_lseek(pid, args[0], args[1] as i32, args[2])),
        SyscallNumber::GetPPid => sys_getppid(pid),
        SyscallNumber::Yield => {
            SCHEDULER.lock().request_yield();
            0
        }
        SyscallNumber::Brk => ok_or_err(do_brk(pid, args[0])),
        SyscallNumber::SBrk => sys_sbrk(pid, args[0] as i32),
        SyscallNumber::Stat => ok_or_err_unit(sys_stat(args[0], args[1], args[2])),
        SyscallNumber::FStat => ok_or_err_unit(sys_fstat(pid, args[0], args[1])),
        SyscallNumber::Kill => ok_or_err_unit(sys_kill(args[0], args[1])),
        SyscallNumber::Signal => ok_or_err_unit(sys_signal(pid, args[0], args[1])),
        SyscallNumber::Uptime => (SCHEDULER.lock().now() / TIMER_HZ as u64) as i32,
        SyscallNumber::Sysinfo => ok_or_err_unit(sys_sysinfo(args[0])),
        SyscallNumber::GetUid => sys_getuid(pid),
        SyscallNumber::SetUid => ok_or_err_unit(sys_setuid(pid, args[0])),
        SyscallNumber::Chdir => ok_or_err_unit(sys_chdir(pid, args[0], args[1])),
        SyscallNumber::GetCwd => ok_or_err(sys_getcwd(pid, args[0], args[1])),
        SyscallNumber::GetTime => SCHEDULER.lock().now() as i32,
        SyscallNumber::Reboot => ok_or_err_unit(sys_reboot(pid, args[0])),
    }
}

fn ok_or_err(result: KResult<u32>) -> i32 {
    match result {
        Ok(v) => v as i32,
        Err(e) => e.as_syscall_return(),
    }
}

fn ok_or_err_unit(result: KResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.as_syscall_return(),
    }
}

// --- Handlers ------------------------------------------------------------

fn sys_exit(pid: Pid, code: i32) {
    crate::fs::close_all(pid);
    lifecycle::exit(pid, code);
}

fn console_write(buf: &[u8]) {
    {
        let mut term = crate::driver::vga::TERMINAL.lock();
        for &b in buf {
            term.write_byte(b);
        }
    }
    {
        let mut com = crate::driver::serial::COM1_PORT.lock();
        for &b in buf {
            com.write_byte(b);
        }
    }
}

fn sys_write(pid: Pid, fd: u32, user_buf: u32, count: u32) -> KResult<u32> {
    if count == 0 {
        return Ok(0);
    }
    let count = count.min(4096);
    validate_user_ptr(user_buf, count)?;
    let mut buf = vec![0u8; count as usize];
    let n = copy_from_user(user_buf, &mut buf);

    if fd == crate::fs::STDOUT || fd == crate::fs::STDERR {
        console_write(&buf[..n]);
        Ok(n as u32)
    } else {
        crate::fs::write(pid, fd, &buf[..n]).map(|w| w as u32)
    }
}

fn sys_read(pid: Pid, fd: u32, user_buf: u32, count: u32) -> KResult<u32> {
    if count == 0 {
        return Ok(0);
    }
    let count = count.min(4096);
    validate_user_ptr(user_buf, count)?;
    let mut buf = vec![0u8; count as usize];

    let n = if fd == crate::fs::STDIN {
        crate::driver::keyboard::read(&mut buf)
    } else {
        crate::fs::read(pid, fd, &mut buf)?
    };
    copy_to_user(user_buf, &buf[..n]);
    Ok(n as u32)
}

fn sys_open(pid: Pid, path_ptr: u32, path_len: u32) -> KResult<u32> {
    let _ = path_len;
    let path = read_user_cstring(path_ptr, PATH_MAX)?;
    crate::fs::open(pid, &path)
}

fn sys_close(pid: Pid, fd: u32) -> KResult<()> {
    crate::fs::close(pid, fd)
}

fn sys_fork(pid: Pid) -> KResult<u32> {
    lifecycle::fork(pid)
}

fn read_whole_file(pid: Pid, path: &str) -> KResult<Vec<u8>> {
    let fd = crate::fs::open(pid, path)?;
    let stat = crate::fs::stat(path)?;
    let mut buf = vec![0u8; stat.size as usize];
    let n = crate::fs::read(pid, fd, &mut buf)?;
    buf.truncate(n);
    let _ = crate::fs::close(pid, fd);
    Ok(buf)
}

fn sys_exec(pid: Pid, path_ptr: u32, path_len: u32) -> KResult<()> {
    let _ = path_len;
    let path = read_user_cstring(path_ptr, PATH_MAX)?;
    let image = read_whole_file(pid, &path)?;
    lifecycle::exec(pid, &image)
}

fn sys_lseek(pid: Pid, fd: u32, offset: i32, whence: u32) -> KResult<u32> {
    crate::fs::lseek(pid, fd, offset, whence).map(|c| c as u32)
}

fn sys_getppid(pid: Pid) -> i32 {
    PROCESS_TABLE
        .lock()
        .get(pid)
        .map(|p| p.ppid as i32)
        .unwrap_or(0)
}

fn sys_getuid(pid: Pid) -> i32 {
    PROCESS_TABLE
        .lock()
        .get(pid)
        .map(|p| p.uid as i32)
        .unwrap_or(0)
}

fn sys_setuid(pid: Pid, new_uid: u32) -> KResult<()> {
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
    if pcb.uid != 0 {
        return Err(KernelError::InvalidState);
    }
    pcb.uid = new_uid;
    pcb.euid = new_uid;
    Ok(())
}

fn sys_chdir(pid: Pid, path_ptr: u32, path_len: u32) -> KResult<()> {
    let _ = path_len;
    let path = read_user_cstring(path_ptr, PATH_MAX)?;
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
    pcb.cwd = path;
    Ok(())
}

fn sys_getcwd(pid: Pid, user_buf: u32, buf_len: u32) -> KResult<u32> {
    let cwd = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(pid).ok_or(KernelError::NoSuchProcess)?;
        pcb.cwd.clone()
    };
    validate_user_ptr(user_buf, buf_len)?;
    let needed = cwd.len() + 1; // NUL terminator
    if needed as u32 > buf_len {
        return Err(KernelError::InvalidState);
    }
    let mut bytes = Vec::with_capacity(needed);
    bytes.extend_from_slice(cwd.as_bytes());
    bytes.push(0);
    let written = copy_to_user(user_buf, &bytes);
    Ok(written as u32)
}

fn sys_kill(target: u32, signal_num: u32) -> KResult<()> {
    if signal_num == 0 || signal_num as usize >= NSIG {
        return Err(KernelError::InvalidState);
    }
    let mut table = PROCESS_TABLE.lock();
    let target_pcb = table.get_mut(target).ok_or(KernelError::NoSuchProcess)?;
    sig::raise(target_pcb, signal_num);
    Ok(())
}

/// Sentinels mirroring the classic `SIG_DFL`/`SIG_IGN` convention: a
/// handler value of 0 restores the default disposition, 1 ignores the
/// signal, anything else is queued as a (never-trampolined) handler
/// address per SPEC_FULL.md §4.9.
const SIG_DFL: u32 = 0;
const SIG_IGN: u32 = 1;

fn sys_signal(pid: Pid, signal_num: u32, handler: u32) -> KResult<()> {
    if signal_num == 0 || signal_num as usize >= NSIG {
        return Err(KernelError::InvalidState);
    }
    if let Ok(sig_enum) = Signal::try_from(signal_num) {
        if sig_enum == Signal::Kill || sig_enum == Signal::Stop {
            return Err(KernelError::InvalidState);
        }
    }
    let disposition = match handler {
        SIG_DFL => SignalDisposition::Default,
        SIG_IGN => SignalDisposition::Ignore,
        addr => SignalDisposition::Handler(addr),
    };
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
    pcb.signal_handlers[signal_num as usize] = disposition;
    Ok(())
}

fn sys_stat(path_ptr: u32, path_len: u32, stat_ptr: u32) -> KResult<()> {
    let _ = path_len;
    let path = read_user_cstring(path_ptr, PATH_MAX)?;
    let stat = crate::fs::stat(&path)?;
    write_stat(stat_ptr, stat)
}

fn sys_fstat(pid: Pid, fd: u32, stat_ptr: u32) -> KResult<()> {
    let stat = crate::fs::fstat(pid, fd)?;
    write_stat(stat_ptr, stat)
}

fn write_stat(stat_ptr: u32, stat: crate::fs::FileStat) -> KResult<()> {
    let buf = StatBuf {
        dev: 0,
        ino: 0,
        mode: 0,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        size: stat.size,
        blksize: PAGE_SIZE as u32,
        blocks: (stat.size + 511) / 512,
        atime: 0,
        mtime: 0,
        ctime: 0,
    };
    validate_user_ptr(stat_ptr, core::mem::size_of::<StatBuf>() as u32)?;
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &buf as *const StatBuf as *const u8,
            core::mem::size_of::<StatBuf>(),
        )
    };
    copy_to_user(stat_ptr, bytes);
    Ok(())
}

fn sys_sysinfo(info_ptr: u32) -> KResult<()> {
    let scheduler = SCHEDULER.lock();
    let uptime = (scheduler.now() / TIMER_HZ as u64) as u32;
    let switches = scheduler.switch_count() as u32;
    drop(scheduler);

    let stats = FRAME_ALLOCATOR.lock().stats();
    let table = PROCESS_TABLE.lock();
    let total_processes = table.len() as u32;
    let running_processes = table
        .ring_pids()
        .iter()
        .filter(|&&pid| {
            table
                .get(pid)
                .map(|p| p.state == ProcessState::Running || p.state == ProcessState::Ready)
                .unwrap_or(false)
        })
        .count() as u32;
    drop(table);

    let buf = SysinfoBuf {
        uptime,
        total_mem: (stats.total * PAGE_SIZE) as u32,
        free_mem: (stats.free * PAGE_SIZE) as u32,
        total_processes,
        running_processes,
        context_switches: switches,
    };

    validate_user_ptr(info_ptr, core::mem::size_of::<SysinfoBuf>() as u32)?;
    let bytes = unsafe {
        core::slice::from_raw_parts(
            &buf as *const SysinfoBuf as *const u8,
            core::mem::size_of::<SysinfoBuf>(),
        )
    };
    copy_to_user(info_ptr, bytes);
    Ok(())
}

fn sys_reboot(pid: Pid, command: u32) -> KResult<()> {
    let is_root = PROCESS_TABLE
        .lock()
        .get(pid)
        .map(|p| p.uid == 0)
        .unwrap_or(false);
    if !is_root {
        return Err(KernelError::InvalidState);
    }

    match command {
        crate::constants::REBOOT_CMD_RESTART => {
            unsafe {
                let mut keyboard_controller = cpuio::Port::<u8>::new(0x64);
                keyboard_controller.write(0xFE);
            }
            Ok(())
        }
        crate::constants::REBOOT_CMD_HALT => {
            unsafe { core::arch::asm!("cli", options(nomem, nostack)) };
            loop {
                unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
            }
        }
        crate::constants::REBOOT_CMD_POWEROFF => {
            unsafe {
                let mut acpi_shutdown = cpuio::Port::<u16>::new(0x604);
                acpi_shutdown.write(0x2000);
            }
            Ok(())
        }
        _ => Err(KernelError::InvalidState),
    }
}

// --- brk / sbrk ----------------------------------------------------------

/// Grow or shrink the caller's data segment to `requested`, mapping or
/// unmapping whole pages between the old and new break. `requested == 0`
/// queries the current break without changing it.
fn do_brk(pid: Pid, requested: u32) -> KResult<u32> {
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;

    if pcb.heap_start == 0 {
        return Err(KernelError::InvalidState);
    }
    if requested == 0 {
        return Ok(pcb.brk);
    }
    if requested < pcb.heap_start || requested >= pcb.stack_start {
        return Err(KernelError::InvalidState);
    }

    let old_brk = pcb.brk;
    let old_top = align_up(old_brk.max(pcb.heap_start), PAGE_SIZE as u32);
    let new_top = align_up(requested, PAGE_SIZE as u32);

    if new_top > old_top {
        let mut page = old_top;
        while page < new_top {
            let frame = FRAME_ALLOCATOR.lock().alloc()?;
            if let Err(e) = VMM.lock().map(
                page,
                frame,
                crate::memory::paging::EntryFlags::PRESENT
                    | crate::memory::paging::EntryFlags::WRITE
                    | crate::memory::paging::EntryFlags::USER,
            ) {
                FRAME_ALLOCATOR.lock().free(frame);
                return Err(e);
            }
            page += PAGE_SIZE as u32;
        }
    } else if new_top < old_top {
        let mut page = new_top;
        while page < old_top {
            VMM.lock().unmap(page);
            page += PAGE_SIZE as u32;
        }
    }

    pcb.brk = requested;
    pcb.heap_end = new_top;
    Ok(old_brk)
}

fn sys_sbrk(pid: Pid, increment: i32) -> i32 {
    let current = match PROCESS_TABLE.lock().get(pid) {
        Some(pcb) => pcb.brk,
        None => return KernelError::NoSuchProcess.as_syscall_return(),
    };
    let new_brk = (current as i64 + increment as i64) as u32;
    match do_brk(pid, new_brk) {
        Ok(old) => old as i32,
        Err(e) => e.as_syscall_return(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(core::mem::size_of::<StatBuf>(), 13 * 4);
    const_assert_eq!(core::mem::size_of::<SysinfoBuf>(), 6 * 4);

    #[test]
    fn rejects_pointer_crossing_the_kernel_boundary() {
        assert!(validate_user_ptr(KERNEL_VIRT_BASE - 4, 8).is_err());
        assert!(validate_user_ptr(KERNEL_VIRT_BASE, 0).is_err());
    }

    #[test]
    fn accepts_pointer_comfortably_in_user_space() {
        assert!(validate_user_ptr(0x0804_8000, 4096).is_ok());
    }

    #[test]
    fn null_pointer_with_nonzero_length_is_rejected() {
        assert!(validate_user_ptr(0, 16).is_err());
    }

    #[test]
    fn zero_length_at_null_is_accepted() {
        assert!(validate_user_ptr(0, 0).is_ok());
    }

    #[test]
    fn syscall_number_gaps_are_rejected() {
        assert!(SyscallNumber::try_from(24).is_err());
        assert!(SyscallNumber::try_from(25).is_err());
        assert!(SyscallNumber::try_from(28).is_err());
        assert!(SyscallNumber::try_from(0).is_err());
        assert!(SyscallNumber::try_from(33).is_err());
    }

    #[test]
    fn syscall_number_table_boundaries_resolve() {
        assert_eq!(SyscallNumber::try_from(1), Ok(SyscallNumber::Exit));
        assert_eq!(SyscallNumber::try_from(32), Ok(SyscallNumber::Reboot));
        assert_eq!(SyscallNumber::try_from(31), Ok(SyscallNumber::GetTime));
    }

    #[test]
    fn align_up_rounds_to_page_boundary() {
        assert_eq!(align_up(1, PAGE_SIZE as u32), PAGE_SIZE as u32);
        assert_eq!(align_up(PAGE_SIZE as u32, PAGE_SIZE as u32), PAGE_SIZE as u32);
        assert_eq!(align_up(0, PAGE_SIZE as u32), 0);
    }
}
