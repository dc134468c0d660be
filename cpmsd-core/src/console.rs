//! Character devices seen by BDOS: console and list (printer).
//!
//! The dispatcher only talks to a `dyn CpmConsole`, so the same calls run
//! against a terminal in the CLI and against `HeadlessConsole` in tests.

use std::collections::VecDeque;

/// Console and list device for BDOS character I/O.
pub trait CpmConsole: Send {
    /// Write a character to console output.
    fn write(&mut self, ch: u8);

    /// Write a whole message, e.g. a BDOS error banner.
    fn write_str(&mut self, s: &str) {
        for &ch in s.as_bytes() {
            self.write(ch);
        }
    }

    /// Write to the list device. Dropped unless the console keeps one.
    fn print(&mut self, _ch: u8) {}

    /// Check if a key is available (non-blocking).
    fn has_key(&self) -> bool;

    /// Get next key from buffer. Returns None if no key available.
    fn get_key(&mut self) -> Option<u8>;

    /// Wait for a key (blocking). Default implementation polls.
    fn wait_for_key(&mut self) -> u8 {
        loop {
            if let Some(key) = self.get_key() {
                return key;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }
}

/// Scripted console: queued keystrokes in, captured console and list out.
#[derive(Default)]
pub struct HeadlessConsole {
    output: Vec<u8>,
    list: Vec<u8>,
    input: VecDeque<u8>,
}

impl HeadlessConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-queued input.
    pub fn with_input(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn queue_input(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    /// Everything written to the console so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Console output as text (lossy UTF-8 conversion).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    /// Everything sent to the list device.
    pub fn list_output(&self) -> &[u8] {
        &self.list
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
        self.list.clear();
    }
}

impl CpmConsole for HeadlessConsole {
    fn write(&mut self, ch: u8) {
        self.output.push(ch);
    }

    fn print(&mut self, ch: u8) {
        self.list.push(ch);
    }

    fn has_key(&self) -> bool {
        !self.input.is_empty()
    }

    fn get_key(&mut self) -> Option<u8> {
        self.input.pop_front()
    }

    /// Once the script runs out every wait sees a carriage return, so a
    /// line read always terminates.
    fn wait_for_key(&mut self) -> u8 {
        self.input.pop_front().unwrap_or(b'\r')
    }
}
