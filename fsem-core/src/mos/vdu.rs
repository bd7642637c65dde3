//! VDU stream filter for OSWRCH.
//!
//! The file server drives a BBC Micro screen: control codes below 32 take a
//! fixed number of parameter bytes that must not reach the host terminal.
//! VDU 21 / VDU 6 turn output off and on, and a text window of two lines or
//! fewer (the server's status line) suppresses output until it is replaced.

use crate::console::Console;

/// Parameter bytes consumed by each VDU control code.
const PARAMS: [u8; 32] = [
    0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 1, 2, 5, 0, 0, 1, 9, 8, 5, 0, 0, 4, 4, 0, 2,
];

const VDU_ENABLE: u8 = 6;
const VDU_DISABLE: u8 = 21;
const VDU_TEXT_WINDOW: u8 = 28;

/// VDU driver state.
#[derive(Debug, Clone)]
pub struct Vdu {
    /// Control code whose parameters are being collected.
    code: u8,
    params: [u8; 9],
    pending: usize,
    /// Current text window is tall enough to show.
    window_visible: bool,
    enabled: bool,
}

impl Default for Vdu {
    fn default() -> Self {
        Self {
            code: 0,
            params: [0; 9],
            pending: 0,
            window_visible: true,
            enabled: true,
        }
    }
}

impl Vdu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Feed one byte of the VDU stream.
    pub fn write<C: Console + ?Sized>(&mut self, console: &mut C, ch: u8) {
        if self.pending > 0 {
            let count = PARAMS[self.code as usize] as usize;
            self.params[count - self.pending] = ch;
            self.pending -= 1;
            if self.pending == 0 {
                self.finish_control();
            }
            return;
        }

        if ch < 0x20 {
            self.code = ch;
            self.pending = PARAMS[ch as usize] as usize;
            match ch {
                VDU_ENABLE => self.enabled = true,
                VDU_DISABLE => self.enabled = false,
                _ => {}
            }
        }

        if self.window_visible && self.enabled && self.pending == 0 {
            console.write(ch);
        }
    }

    fn finish_control(&mut self) {
        if self.code == VDU_TEXT_WINDOW {
            // left, bottom, right, top
            let bottom = self.params[1] as i16;
            let top = self.params[3] as i16;
            self.window_visible = bottom - top > 2;
        }
    }
}
