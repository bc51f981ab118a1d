//! Base-40 callsign codec
//!
//! Callsigns are up to nine characters drawn from a 40-symbol alphabet and
//! travel on the wire as a 6-byte big-endian base-40 integer. The first
//! character is the most significant digit; short callsigns are padded with
//! the zero symbol (space) before encoding.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Result, WireError};

// =============================================================================
// Constants
// =============================================================================

/// Symbol table; a symbol's position is its base-40 digit value
pub const CALLSIGN_ALPHABET: &[u8; 40] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-/.";

/// Number of characters in a canonical callsign
pub const CALLSIGN_LEN: usize = 9;

/// Number of bytes in an encoded callsign
pub const CALLSIGN_CODE_LEN: usize = 6;

/// Largest valid code (40^9 - 1)
pub const MAX_CALLSIGN_CODE: u64 = 0xEE6B_27FF_FFFF;

/// Index of the module character within a canonical callsign
pub const MODULE_INDEX: usize = 8;

// =============================================================================
// Callsign
// =============================================================================

/// A callsign in canonical form together with its base-40 code
///
/// Two callsigns are equal when their codes are equal. Because encoding pads
/// and truncates to nine characters, `"N0CALL"` and `"N0CALL   "` compare equal
/// while `"N0CALL"` and `"N0CALL B"` do not.
#[derive(Clone, Copy)]
pub struct Callsign {
    code: u64,
    text: [u8; CALLSIGN_LEN],
}

impl Callsign {
    /// Encode a callsign from text
    ///
    /// Lower-case letters are folded to upper case, characters outside the
    /// alphabet become spaces, and anything past nine characters is dropped.
    pub fn new(text: &str) -> Self {
        let mut canonical = [b' '; CALLSIGN_LEN];
        for (slot, ch) in canonical.iter_mut().zip(text.chars()) {
            let upper = ch.to_ascii_uppercase();
            if upper.is_ascii() && CALLSIGN_ALPHABET.contains(&(upper as u8)) {
                *slot = upper as u8;
            }
        }

        let code = canonical
            .iter()
            .fold(0u64, |acc, &c| acc * 40 + symbol_value(c));

        Self {
            code,
            text: canonical,
        }
    }

    /// Decode a callsign from its numeric code
    ///
    /// Returns `None` when the code exceeds [`MAX_CALLSIGN_CODE`].
    pub fn from_code(code: u64) -> Option<Self> {
        if code > MAX_CALLSIGN_CODE {
            return None;
        }

        let mut text = [b' '; CALLSIGN_LEN];
        let mut remaining = code;
        for slot in text.iter_mut().rev() {
            *slot = CALLSIGN_ALPHABET[(remaining % 40) as usize];
            remaining /= 40;
        }

        Some(Self { code, text })
    }

    /// Decode a callsign from its 6-byte wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let code: [u8; CALLSIGN_CODE_LEN] =
            bytes.try_into().map_err(|_| WireError::Length {
                expected: CALLSIGN_CODE_LEN,
                actual: bytes.len(),
            })?;
        let value = code_to_u64(code);
        Self::from_code(value).ok_or(WireError::CallsignRange(value))
    }

    /// Replace this callsign with the one carried by `code`
    ///
    /// An out-of-range code is rejected and `self` is left untouched.
    pub fn set_code(&mut self, code: [u8; CALLSIGN_CODE_LEN]) -> Result<()> {
        let value = code_to_u64(code);
        *self = Self::from_code(value).ok_or(WireError::CallsignRange(value))?;
        Ok(())
    }

    /// The 6-byte big-endian wire form
    pub fn code(&self) -> [u8; CALLSIGN_CODE_LEN] {
        let wide = self.code.to_be_bytes();
        let mut out = [0u8; CALLSIGN_CODE_LEN];
        out.copy_from_slice(&wide[2..]);
        out
    }

    /// The numeric code
    pub fn code_value(&self) -> u64 {
        self.code
    }

    /// Canonical nine-character form, space padded
    pub fn as_str(&self) -> &str {
        // Only alphabet symbols are ever stored, all of which are ASCII
        std::str::from_utf8(&self.text).unwrap_or_default()
    }

    /// Canonical form with trailing spaces removed
    pub fn trimmed(&self) -> &str {
        self.as_str().trim_end()
    }

    /// The first `len` characters of the canonical form (at most nine)
    pub fn prefix(&self, len: usize) -> &str {
        &self.as_str()[..len.min(CALLSIGN_LEN)]
    }

    /// Canonical form cut or space padded to exactly `len` characters
    pub fn padded(&self, len: usize) -> String {
        let mut out = self.prefix(len).to_string();
        while out.len() < len {
            out.push(' ');
        }
        out
    }

    /// Module character (ninth position)
    pub fn module(&self) -> char {
        self.text[MODULE_INDEX] as char
    }

    /// Character at `index` of the canonical form
    pub fn char_at(&self, index: usize) -> Option<char> {
        self.text.get(index).map(|&c| c as char)
    }

    /// Same callsign with the module position replaced
    pub fn with_module(&self, module: char) -> Self {
        let mut text = self.padded(MODULE_INDEX);
        text.push(module);
        Self::new(&text)
    }
}

impl Default for Callsign {
    fn default() -> Self {
        Self::new("")
    }
}

impl From<&str> for Callsign {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl PartialEq for Callsign {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Callsign {}

impl Hash for Callsign {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trimmed())
    }
}

impl fmt::Debug for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callsign({:?}, {:#014x})", self.as_str(), self.code)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn symbol_value(symbol: u8) -> u64 {
    CALLSIGN_ALPHABET
        .iter()
        .position(|&c| c == symbol)
        .unwrap_or(0) as u64
}

fn code_to_u64(code: [u8; CALLSIGN_CODE_LEN]) -> u64 {
    code.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}
