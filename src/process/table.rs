//! The process table: a pid-keyed map of every live PCB plus the circular
//! sibling ring linking them, represented as pid-valued `next`/`prev`
//! fields rather than raw pointers.
//!
//! Grounded in `original_source/kernel/include/kernel/process.h`'s ring
//! fields and SPEC_FULL.md §9's "index-keyed table... ring links as table
//! indices" design note, combined with
//! `Dentosal-rust_os/src/multitasking/process_manager.rs`'s
//! `State { process_list, id_counter }` singleton shape.

use alloc::collections::BTreeMap;
use spin::Mutex;

use crate::process::pcb::{Pcb, Pid, NO_PID};

pub struct ProcessTable {
    processes: BTreeMap<Pid, Pcb>,
    /// Any pid currently in the ring; `NO_PID` only before the bootstrap
    /// PCB is inserted.
    anchor: Pid,
    next_pid: Pid,
}

impl ProcessTable {
    pub(crate) const fn new() -> Self {
        ProcessTable {
            processes: BTreeMap::new(),
            anchor: NO_PID,
            next_pid: 1,
        }
    }

    pub fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.processes.get_mut(&pid)
    }

    pub fn anchor(&self) -> Pid {
        self.anchor
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Insert a freshly created PCB into the ring. Interrupts must already
    /// be disabled by the caller per SPEC_FULL.md §3's PCB lifecycle.
    pub fn insert(&mut self, mut pcb: Pcb) -> Pid {
        let pid = pcb.pid;
        if self.anchor == NO_PID {
            pcb.next = pid;
            pcb.prev = pid;
            self.anchor = pid;
            self.processes.insert(pid, pcb);
        } else {
            let anchor = self.anchor;
            let tail = self.processes.get(&anchor).unwrap().prev;
            pcb.next = anchor;
            pcb.prev = tail;
            self.processes.insert(pid, pcb);
            self.processes.get_mut(&tail).unwrap().next = pid;
            self.processes.get_mut(&anchor).unwrap().prev = pid;
        }
        pid
    }

    /// Unlink and remove a PCB from the ring, returning it. Panics if the
    /// ring would become empty while the kernel still references another
    /// PCB as current — callers must never reap the bootstrap thread while
    /// any other process remains runnable (not directly enforced here,
    /// mirroring the scheduler's own "ring never empty" invariant).
    pub fn remove(&mut self, pid: Pid) -> Option<Pcb> {
        let pcb = self.processes.remove(&pid)?;
        if pcb.next == pid {
            // Was the only entry.
            self.anchor = NO_PID;
        } else {
            let next = pcb.next;
            let prev = pcb.prev;
            if let Some(p) = self.processes.get_mut(&prev) {
                p.next = next;
            }
            if let Some(n) = self.processes.get_mut(&next) {
                n.prev = prev;
            }
            if self.anchor == pid {
                self.anchor = next;
            }
        }
        Some(pcb)
    }

    /// The pid that follows `pid` in ring order.
    pub fn next_of(&self, pid: Pid) -> Option<Pid> {
        self.processes.get(&pid).map(|p| p.next)
    }

    /// Iterate every pid currently in the ring, starting from the anchor.
    pub fn ring_pids(&self) -> alloc::vec::Vec<Pid> {
        let mut out = alloc::vec::Vec::with_capacity(self.processes.len());
        if self.anchor == NO_PID {
            return out;
        }
        let mut cur = self.anchor;
        loop {
            out.push(cur);
            cur = self.processes.get(&cur).unwrap().next;
            if cur == self.anchor {
                break;
            }
        }
        out
    }
}

pub static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::{ProcessFlags, ProcessState};
    use crate::process::signal::SignalDisposition;

    fn dummy_pcb(pid: Pid) -> Pcb {
        Pcb {
            pid,
            ppid: 0,
            name: alloc::string::String::from("t"),
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            state: ProcessState::Ready,
            flags: ProcessFlags::empty(),
            address_space: crate::memory::vmm::AddressSpace { directory_phys: 0 },
            heap_start: 0,
            heap_end: 0,
            brk: 0,
            stack_start: 0,
            stack_end: 0,
            kernel_stack: alloc::vec::Vec::new(),
            saved_context: core::ptr::null_mut(),
            exit_code: 0,
            priority: 2,
            quantum: 5,
            pending_signals: 0,
            signal_handlers: [SignalDisposition::Default; crate::constants::NSIG],
            wake_tick: 0,
            cwd: alloc::string::String::from("/"),
            next: 0,
            prev: 0,
        }
    }

    #[test]
    fn ring_stays_circular_through_insert_and_remove() {
        let mut table = ProcessTable::new();
        table.insert(dummy_pcb(1));
        table.insert(dummy_pcb(2));
        table.insert(dummy_pcb(3));

        let pids = table.ring_pids();
        assert_eq!(pids.len(), 3);
        assert!(pids.contains(&1) && pids.contains(&2) && pids.contains(&3));

        table.remove(2);
        let pids = table.ring_pids();
        assert_eq!(pids.len(), 2);
        assert!(!pids.contains(&2));

        // ring still closes on itself
        let first = pids[0];
        assert_eq!(table.next_of(table.next_of(first).unwrap()).unwrap(), first);
    }

    #[test]
    fn removing_the_only_pcb_empties_the_ring() {
        let mut table = ProcessTable::new();
        table.insert(dummy_pcb(1));
        table.remove(1);
        assert!(table.is_empty());
        assert_eq!(table.anchor(), NO_PID);
    }
}
