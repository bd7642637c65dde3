//! Console abstraction for the emulated file server.
//!
//! The `Console` trait carries VDU output from OSWRCH and the host keys that
//! drive the scheduler. `HeadlessConsole` backs tests; the CLI provides a
//! terminal implementation.

use std::collections::VecDeque;

/// Character I/O between the emulator and the host.
pub trait Console: Send {
    /// Write a visible byte to the screen.
    fn write(&mut self, ch: u8);

    /// Check if a key is available (non-blocking).
    fn has_key(&self) -> bool;

    /// Get next key. Returns None if no key is waiting.
    fn get_key(&mut self) -> Option<u8>;
}

/// Headless console for testing: captures output, provides queued keys.
#[derive(Default)]
pub struct HeadlessConsole {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl HeadlessConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-queued keys.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            output: Vec::new(),
            input: input.iter().copied().collect(),
        }
    }

    /// Queue keys.
    pub fn queue_input(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    /// All output so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Output as a string (lossy UTF-8 conversion).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
    }
}

impl Console for HeadlessConsole {
    fn write(&mut self, ch: u8) {
        self.output.push(ch);
    }

    fn has_key(&self) -> bool {
        !self.input.is_empty()
    }

    fn get_key(&mut self) -> Option<u8> {
        self.input.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_console_output() {
        let mut console = HeadlessConsole::new();
        console.write(b'F');
        console.write(b'S');
        assert_eq!(console.output_string(), "FS");
        console.clear_output();
        assert!(console.output().is_empty());
    }

    #[test]
    fn test_headless_console_input() {
        let mut console = HeadlessConsole::with_input(b"xq");
        assert!(console.has_key());
        assert_eq!(console.get_key(), Some(b'x'));
        assert_eq!(console.get_key(), Some(b'q'));
        assert!(!console.has_key());
        assert_eq!(console.get_key(), None);
    }
}
