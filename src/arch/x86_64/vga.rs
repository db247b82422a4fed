//! Minimal VGA text-mode console, used only for the panic path (serial may
//! not be attached to anything on real hardware). A single writer — no
//! scrollback/hotkey machinery, since `Logger` owns normal output.

use core::fmt::{self, Write};
use core::ptr;
use spin::Mutex;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;
const VGA_ADDRESS: usize = 0xb8000;

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    const fn new(fg: u8, bg: u8) -> Self {
        Self((bg << 4) | fg)
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

struct Writer {
    row: usize,
    col: usize,
    color_code: ColorCode,
}

impl Writer {
    fn cell(row: usize, col: usize) -> *mut ScreenChar {
        (VGA_ADDRESS as *mut ScreenChar).wrapping_add(row * BUFFER_WIDTH + col)
    }

    fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.col >= BUFFER_WIDTH {
                    self.new_line();
                }
                let ch = ScreenChar { ascii_character: byte, color_code: self.color_code };
                unsafe { ptr::write_volatile(Self::cell(self.row, self.col), ch) };
                self.col += 1;
            }
        }
    }

    fn new_line(&mut self) {
        if self.row + 1 >= BUFFER_HEIGHT {
            for row in 1..BUFFER_HEIGHT {
                for col in 0..BUFFER_WIDTH {
                    let ch = unsafe { ptr::read_volatile(Self::cell(row, col)) };
                    unsafe { ptr::write_volatile(Self::cell(row - 1, col), ch) };
                }
            }
            self.clear_row(BUFFER_HEIGHT - 1);
        } else {
            self.row += 1;
        }
        self.col = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar { ascii_character: b' ', color_code: self.color_code };
        for col in 0..BUFFER_WIDTH {
            unsafe { ptr::write_volatile(Self::cell(row, col), blank) };
        }
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

static WRITER: Mutex<Writer> = Mutex::new(Writer { row: 0, col: 0, color_code: ColorCode::new(12, 0) });

/// Emergency print, used only by the panic handler. Uses `try_lock` so a
/// panic inside a held VGA lock still gets something on screen.
pub fn print_critical(s: &str) {
    if let Some(mut w) = WRITER.try_lock() {
        let _ = w.write_str(s);
    }
}
