//! Kernel-wide error taxonomy.
//!
//! Internal plumbing returns `Result<T, KernelError>`; the syscall gate is
//! the only place this gets collapsed down to the -1/errno-style ABI in
//! [`KernelErrorCode`].

use num_enum::IntoPrimitive;

/// A fallible kernel operation's failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// The frame allocator has no free frames left.
    OutOfFrames,
    /// The kernel heap could not satisfy an allocation.
    OutOfHeap,
    /// No temporary mapping slot was free.
    OutOfTempSlots,
    /// The process table is full or a PCB could not be allocated.
    OutOfProcesses,
    /// An ELF header failed validation.
    InvalidElf,
    /// A syscall number outside the registered range.
    InvalidSyscall,
    /// A user-supplied pointer referenced kernel space or was null.
    BadUserPointer,
    /// A file descriptor did not resolve to an open file.
    BadFileDescriptor,
    /// An operation was attempted from a state that forbids it
    /// (wait with no children, exec on a kernel thread, setuid by non-root).
    InvalidState,
    /// A page fault that copy-on-write could not service.
    SegmentationFault,
    /// No such process.
    NoSuchProcess,
}

/// The negative-errno-style code that crosses the syscall ABI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(i32)]
pub enum KernelErrorCode {
    OutOfMemory = -1,
    InvalidArgument = -2,
    BadPointer = -3,
    BadFd = -4,
    InvalidState = -5,
    Fault = -6,
    NoSuchProcess = -7,
}

impl From<KernelError> for KernelErrorCode {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::OutOfFrames
            | KernelError::OutOfHeap
            | KernelError::OutOfTempSlots
            | KernelError::OutOfProcesses => KernelErrorCode::OutOfMemory,
            KernelError::InvalidElf | KernelError::InvalidSyscall => {
                KernelErrorCode::InvalidArgument
            }
            KernelError::BadUserPointer => KernelErrorCode::BadPointer,
            KernelError::BadFileDescriptor => KernelErrorCode::BadFd,
            KernelError::InvalidState => KernelErrorCode::InvalidState,
            KernelError::SegmentationFault => KernelErrorCode::Fault,
            KernelError::NoSuchProcess => KernelErrorCode::NoSuchProcess,
        }
    }
}

impl KernelError {
    /// The raw `i32` returned in EAX for a failed syscall.
    pub fn as_syscall_return(self) -> i32 {
        let code: KernelErrorCode = self.into();
        let raw: i32 = code.into();
        raw
    }
}

pub type KResult<T> = Result<T, KernelError>;
