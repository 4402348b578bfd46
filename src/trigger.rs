//! Scanner input normalization.
//!
//! Turns raw keystrokes (HID scanner acting as a keyboard) or serial byte chunks
//! into discrete `PalletCode` events. Both modes are line oriented: CR or LF ends a
//! code.

use std::fmt;

/// A trimmed, non-empty pallet identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PalletCode(String);

impl PalletCode {
    /// `None` when `raw` is empty after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PalletCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    Keyboard,
    SerialPort,
}

/// One unit of raw scanner input.
#[derive(Clone, Copy, Debug)]
pub enum RawInput<'a> {
    Key(char),
    Bytes(&'a [u8]),
}

pub struct TriggerNormalizer {
    mode: InputMode,
    keys: String,
    bytes: Vec<u8>,
}

impl TriggerNormalizer {
    pub fn new(mode: InputMode) -> Self {
        Self {
            mode,
            keys: String::new(),
            bytes: Vec::new(),
        }
    }

    /// Switch modes. Anything buffered so far is dropped.
    pub fn set_mode(&mut self, mode: InputMode) {
        self.mode = mode;
        self.keys.clear();
        self.bytes.clear();
    }

    pub fn is_idle(&self) -> bool {
        self.keys.is_empty() && self.bytes.is_empty()
    }

    /// Input that does not belong to the current mode is ignored.
    pub fn feed(&mut self, input: RawInput<'_>) -> Option<PalletCode> {
        match (self.mode, input) {
            (InputMode::Keyboard, RawInput::Key(key)) => self.feed_key(key),
            (InputMode::SerialPort, RawInput::Bytes(bytes)) => self.feed_bytes(bytes),
            _ => None,
        }
    }

    fn feed_key(&mut self, key: char) -> Option<PalletCode> {
        if is_terminator(key) {
            let code = PalletCode::new(&self.keys);
            self.keys.clear();
            return code;
        }
        if !key.is_control() {
            self.keys.push(key);
        }
        None
    }

    fn feed_bytes(&mut self, bytes: &[u8]) -> Option<PalletCode> {
        self.bytes.extend_from_slice(bytes);
        let end = self.bytes.iter().position(|&b| b == b'\r' || b == b'\n')?;
        let code = PalletCode::new(&String::from_utf8_lossy(&self.bytes[..end]));
        self.bytes.clear();
        code
    }
}

fn is_terminator(key: char) -> bool {
    key == '\r' || key == '\n'
}
