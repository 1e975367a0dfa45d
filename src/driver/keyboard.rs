//! PS/2 keyboard scancode decoder (IRQ1).
//!
//! Grounded in `original_source/kernel/keyboard.c`: a set-1 scancode table
//! mapped to ASCII, feeding a small ring buffer that `sys_read` on fd 0
//! drains. Trivial external collaborator; no layout switching, no repeat.

use cpuio::Port;
use spin::Mutex;

const DATA_PORT: u16 = 0x60;
const BUFFER_CAPACITY: usize = 128;

const SCANCODE_ASCII: [u8; 58] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 8, b'\t', b'q',
    b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's', b'd',
    b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v', b'b',
    b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ',
];

struct RingBuffer {
    data: [u8; BUFFER_CAPACITY],
    head: usize,
    tail: usize,
    len: usize,
}

impl RingBuffer {
    const fn new() -> Self {
        RingBuffer {
            data: [0; BUFFER_CAPACITY],
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    fn push(&mut self, byte: u8) {
        if self.len == BUFFER_CAPACITY {
            return; // drop on overflow
        }
        self.data[self.tail] = byte;
        self.tail = (self.tail + 1) % BUFFER_CAPACITY;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.len == 0 {
            return None;
        }
        let byte = self.data[self.head];
        self.head = (self.head + 1) % BUFFER_CAPACITY;
        self.len -= 1;
        Some(byte)
    }
}

static BUFFER: Mutex<RingBuffer> = Mutex::new(RingBuffer::new());

/// Called from the IRQ1 handler.
pub fn handle_interrupt() {
    let scancode = unsafe { Port::<u8>::new(DATA_PORT).read() };
    // High bit set means key release; ignore those for this simple decoder.
    if scancode & 0x80 != 0 {
        return;
    }
    if let Some(&ascii) = SCANCODE_ASCII.get(scancode as usize) {
        if ascii != 0 {
            BUFFER.lock().push(ascii);
        }
    }
}

/// Drain up to `buf.len()` bytes of already-decoded keyboard input.
pub fn read(buf: &mut [u8]) -> usize {
    let mut buffer = BUFFER.lock();
    let mut n = 0;
    while n < buf.len() {
        match buffer.pop() {
            Some(b) => {
                buf[n] = b;
                n += 1;
            }
            None => break,
        }
    }
    n
}
