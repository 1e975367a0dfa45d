//! Minimal in-memory filesystem: a flat name -> byte-vector store plus an
//! open-file table, exposed at the interface `syscall::dispatch` needs
//! (open/close/read/write/lseek/stat) and nothing more.
//!
//! A trivial external collaborator per SPEC_FULL.md §1's scoping (a real
//! block-device filesystem is an explicit Non-goal); grounded at interface
//! level on `original_source/kernel/vfs.c`/`ramfs.c`'s open-by-path,
//! read/write-by-fd shape.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

use crate::error::{KResult, KernelError};
use crate::process::pcb::Pid;

pub type Fd = u32;

/// Standard streams are always open: 0 = keyboard input, 1/2 = VGA+serial
/// output, both served directly by `syscall::sys_read`/`sys_write` without
/// going through the inode table.
pub const STDIN: Fd = 0;
pub const STDOUT: Fd = 1;
pub const STDERR: Fd = 2;

const FIRST_FILE_FD: Fd = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub size: u32,
}

struct OpenFile {
    owner: Pid,
    inode: String,
    cursor: usize,
}

struct Filesystem {
    inodes: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<Fd, OpenFile>,
    next_fd: Fd,
}

impl Filesystem {
    const fn new() -> Self {
        Filesystem {
            inodes: BTreeMap::new(),
            open: BTreeMap::new(),
            next_fd: FIRST_FILE_FD,
        }
    }
}

static FS: Mutex<Filesystem> = Mutex::new(Filesystem::new());

/// Create an empty inode if it doesn't already exist. Exposed for boot-time
/// seeding (e.g. installing the init shell binary) rather than the syscall
/// surface, which only ever opens existing paths.
pub fn seed(path: &str, contents: Vec<u8>) {
    FS.lock().inodes.insert(path.to_string(), contents);
}

pub fn open(owner: Pid, path: &str) -> KResult<Fd> {
    let mut fs = FS.lock();
    if !fs.inodes.contains_key(path) {
        return Err(KernelError::BadFileDescriptor);
    }
    let fd = fs.next_fd;
    fs.next_fd += 1;
    fs.open.insert(
        fd,
        OpenFile {
            owner,
            inode: path.to_string(),
            cursor: 0,
        },
    );
    Ok(fd)
}

pub fn close(owner: Pid, fd: Fd) -> KResult<()> {
    let mut fs = FS.lock();
    match fs.open.get(&fd) {
        Some(f) if f.owner == owner => {
            fs.open.remove(&fd);
            Ok(())
        }
        _ => Err(KernelError::BadFileDescriptor),
    }
}

pub fn read(owner: Pid, fd: Fd, buf: &mut [u8]) -> KResult<usize> {
    let mut fs = FS.lock();
    let open = fs.open.get_mut(&fd).ok_or(KernelError::BadFileDescriptor)?;
    if open.owner != owner {
        return Err(KernelError::BadFileDescriptor);
    }
    let inode = open.inode.clone();
    let cursor = open.cursor;
    let data = fs.inodes.get(&inode).ok_or(KernelError::BadFileDescriptor)?;
    let available = data.len().saturating_sub(cursor);
    let n = buf.len().min(available);
    buf[..n].copy_from_slice(&data[cursor..cursor + n]);
    fs.open.get_mut(&fd).unwrap().cursor += n;
    Ok(n)
}

pub fn write(owner: Pid, fd: Fd, buf: &[u8]) -> KResult<usize> {
    let mut fs = FS.lock();
    let open = fs.open.get_mut(&fd).ok_or(KernelError::BadFileDescriptor)?;
    if open.owner != owner {
        return Err(KernelError::BadFileDescriptor);
    }
    let inode = open.inode.clone();
    let cursor = open.cursor;
    let data = fs.inodes.get_mut(&inode).ok_or(KernelError::BadFileDescriptor)?;
    if cursor + buf.len() > data.len() {
        data.resize(cursor + buf.len(), 0);
    }
    data[cursor..cursor + buf.len()].copy_from_slice(buf);
    fs.open.get_mut(&fd).unwrap().cursor += buf.len();
    Ok(buf.len())
}

pub fn lseek(owner: Pid, fd: Fd, offset: i32, whence: u32) -> KResult<usize> {
    let mut fs = FS.lock();
    let inode = {
        let open = fs.open.get(&fd).ok_or(KernelError::BadFileDescriptor)?;
        if open.owner != owner {
            return Err(KernelError::BadFileDescriptor);
        }
        open.inode.clone()
    };
    let len = fs.inodes.get(&inode).map(|d| d.len()).unwrap_or(0);
    let open = fs.open.get_mut(&fd).unwrap();
    let base = match whence {
        0 => 0,                // SEEK_SET
        1 => open.cursor as i64, // SEEK_CUR
        2 => len as i64,       // SEEK_END
        _ => return Err(KernelError::InvalidState),
    };
    let new_cursor = base + offset as i64;
    if new_cursor < 0 {
        return Err(KernelError::InvalidState);
    }
    open.cursor = new_cursor as usize;
    Ok(open.cursor)
}

pub fn stat(path: &str) -> KResult<FileStat> {
    let fs = FS.lock();
    fs.inodes
        .get(path)
        .map(|d| FileStat { size: d.len() as u32 })
        .ok_or(KernelError::BadFileDescriptor)
}

pub fn fstat(owner: Pid, fd: Fd) -> KResult<FileStat> {
    let fs = FS.lock();
    let open = fs.open.get(&fd).ok_or(KernelError::BadFileDescriptor)?;
    if open.owner != owner {
        return Err(KernelError::BadFileDescriptor);
    }
    fs.inodes
        .get(&open.inode)
        .map(|d| FileStat { size: d.len() as u32 })
        .ok_or(KernelError::BadFileDescriptor)
}

/// Release every fd a terminating process still held open, so they don't
/// linger in the table forever.
pub fn close_all(owner: Pid) {
    FS.lock().open.retain(|_, f| f.owner != owner);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        seed("/test", Vec::new());
        let fd = open(1, "/test").unwrap();
        assert_eq!(write(1, fd, b"hello").unwrap(), 5);
        lseek(1, fd, 0, 0).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(read(1, fd, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        close(1, fd).unwrap();
    }

    #[test]
    fn open_missing_path_fails() {
        assert!(open(1, "/does-not-exist").is_err());
    }

    #[test]
    fn operations_from_non_owner_are_rejected() {
        seed("/owned", Vec::new());
        let fd = open(1, "/owned").unwrap();
        assert!(close(2, fd).is_err());
        assert!(read(2, fd, &mut [0u8; 1]).is_err());
    }
}
