//! VGA text-mode console driver.
//!
//! Grounded in `original_source/kernel/vga.c` for behavior (80x25 text
//! buffer at physical `0xB8000`, scroll-on-overflow) and in the teacher's
//! `driver::vga_buffer` for the Rust-side volatile-cell idiom.

use core::fmt;
use spin::Mutex;
use volatile::Volatile;

use crate::constants::KERNEL_VIRT_BASE;

const SCREEN_HEIGHT: usize = 25;
const SCREEN_WIDTH: usize = 80;
const VGA_BUFFER_PHYS: u32 = 0xB8000;

#[derive(Clone, Copy)]
#[repr(u8)]
#[allow(dead_code)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct CellColor(u8);

impl CellColor {
    const fn new(fg: Color, bg: Color) -> Self {
        CellColor((bg as u8) << 4 | (fg as u8))
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct CharCell {
    character: u8,
    color: CellColor,
}

struct Buffer {
    chars: [[Volatile<CharCell>; SCREEN_WIDTH]; SCREEN_HEIGHT],
}

pub struct Terminal {
    row: usize,
    col: usize,
    color: CellColor,
}

impl Terminal {
    const fn new() -> Self {
        Terminal {
            row: 0,
            col: 0,
            color: CellColor::new(Color::White, Color::Black),
        }
    }

    fn buffer(&mut self) -> &'static mut Buffer {
        // Identity-ish kernel-virtual alias of the VGA memory-mapped buffer;
        // mapped once during VMM init alongside the rest of the low 1 MiB.
        let vaddr = KERNEL_VIRT_BASE + VGA_BUFFER_PHYS;
        unsafe { &mut *(vaddr as *mut Buffer) }
    }

    pub fn reset(&mut self) {
        self.color = CellColor::new(Color::White, Color::Black);
        self.clear();
    }

    pub fn clear(&mut self) {
        let color = self.color;
        let buffer = self.buffer();
        for row in 0..SCREEN_HEIGHT {
            for col in 0..SCREEN_WIDTH {
                buffer.chars[row][col].write(CharCell {
                    character: b' ',
                    color,
                });
            }
        }
        self.row = 0;
        self.col = 0;
    }

    pub fn set_color(&mut self, fg: Color, bg: Color) {
        self.color = CellColor::new(fg, bg);
    }

    fn newline(&mut self) {
        if self.row + 1 < SCREEN_HEIGHT {
            self.row += 1;
        } else {
            self.scroll();
        }
        self.col = 0;
    }

    fn scroll(&mut self) {
        let color = self.color;
        let buffer = self.buffer();
        for row in 1..SCREEN_HEIGHT {
            for col in 0..SCREEN_WIDTH {
                let cell = buffer.chars[row][col].read();
                buffer.chars[row - 1][col].write(cell);
            }
        }
        for col in 0..SCREEN_WIDTH {
            buffer.chars[SCREEN_HEIGHT - 1][col].write(CharCell {
                character: b' ',
                color,
            });
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            byte => {
                if self.col >= SCREEN_WIDTH {
                    self.newline();
                }
                let (row, col, color) = (self.row, self.col, self.color);
                self.buffer().chars[row][col].write(CharCell {
                    character: byte,
                    color,
                });
                self.col += 1;
            }
        }
    }

    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }
}

impl fmt::Write for Terminal {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Terminal::write_str(self, s);
        Ok(())
    }
}

pub static TERMINAL: Mutex<Terminal> = Mutex::new(Terminal::new());

#[macro_export]
macro_rules! rprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::driver::vga::TERMINAL.lock(), $($arg)*);
    }};
}

#[macro_export]
macro_rules! rprintln {
    () => { $crate::rprint!("\n") };
    ($($arg:tt)*) => {{
        $crate::rprint!($($arg)*);
        $crate::rprint!("\n");
    }};
}

#[macro_export]
macro_rules! rreset {
    () => {
        $crate::driver::vga::TERMINAL.lock().reset();
    };
}
