//! parser.rs
//! Line assembly and command token decoding for the serial protocol.
//!
//! Bytes arrive in fragments of any size. [`LineAssembler`] collects them into
//! bounded lines terminated by `\n`; a complete line is split on whitespace and
//! every token is decoded into a [`Command`]:
//!
//! ```text
//! <2-char code><optional sign><digits>     HH90   RB+10   EV-5   DP
//! ```
//!
//! A leading sign marks the command relative. Tokens without a value decode as
//! a relative move of 0: a commanded channel stays put, an unset one is
//! centred.

use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LINE_CAPACITY: usize = 32;
pub const END_OF_LINE: u8 = b'\n';
pub const CODE_LEN: usize = 2;

/// Two-character protocol name of a channel, e.g. `HH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelCode([u8; CODE_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("channel code {0:?} must be exactly two printable ASCII characters")]
pub struct InvalidChannelCode(pub String);

impl ChannelCode {
    /// For code literals known at compile time.
    pub const fn from_ascii(code: [u8; CODE_LEN]) -> Self {
        assert!(code[0].is_ascii_graphic() && code[1].is_ascii_graphic());
        ChannelCode(code)
    }

    pub fn as_str(&self) -> &str {
        // Only printable ASCII gets in through `try_from`.
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl TryFrom<&str> for ChannelCode {
    type Error = InvalidChannelCode;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.as_bytes() {
            [a, b] if a.is_ascii_graphic() && b.is_ascii_graphic() => Ok(ChannelCode([*a, *b])),
            _ => Err(InvalidChannelCode(value.to_string())),
        }
    }
}

impl TryFrom<String> for ChannelCode {
    type Error = InvalidChannelCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ChannelCode::try_from(value.as_str())
    }
}

impl From<ChannelCode> for String {
    fn from(code: ChannelCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ChannelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded token. Borrowed from the line and dropped after dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// First two characters of the token (fewer if the token is shorter).
    pub code: &'a str,
    pub value: i32,
    pub relative: bool,
    /// Set when the token carried no digits and decoded as relative 0.
    pub fallback: bool,
}

fn is_value_start(c: char) -> bool {
    c == '+' || c == '-' || c.is_ascii_digit()
}

/// atoi-style: optional sign, then digits up to the first non-digit.
/// Saturates instead of overflowing. Returns `None` when no digit follows.
fn parse_signed(field: &str) -> Option<i32> {
    let bytes = field.as_bytes();
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };

    let mut value: i32 = 0;
    let mut seen = false;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        seen = true;
        let d = (b - b'0') as i32;
        value = value.saturating_mul(10);
        value = if negative { value.saturating_sub(d) } else { value.saturating_add(d) };
    }
    seen.then_some(value)
}

/// Splits a token into code and value.
pub fn parse_token(token: &str) -> Command<'_> {
    let code_end = token
        .char_indices()
        .nth(CODE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    let (code, rest) = token.split_at(code_end);

    let Some(start) = rest.find(is_value_start) else {
        return Command { code, value: 0, relative: true, fallback: true };
    };
    let field = &rest[start..];
    let relative = field.starts_with(['+', '-']);

    match parse_signed(field) {
        Some(value) => Command { code, value, relative, fallback: false },
        None => Command { code, value: 0, relative: true, fallback: true },
    }
}

/// Whitespace-separated commands of a line, left to right.
pub fn tokenize(line: &str) -> impl Iterator<Item = Command<'_>> {
    line.split_whitespace().map(parse_token)
}

/// A completed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    /// Bytes beyond the buffer capacity were dropped.
    pub truncated: bool,
}

/// Bounded accumulator for incoming bytes.
///
/// Holds at most `capacity - 1` content bytes (the last slot is reserved for the
/// terminator). Once full, further bytes are dropped but the line keeps going
/// until the end marker, so an oversized line is still delivered, truncated.
pub struct LineAssembler {
    buf: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

impl LineAssembler {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            // Grows on demand past the default size.
            buf: Vec::with_capacity(capacity.min(DEFAULT_LINE_CAPACITY)),
            capacity,
            truncated: false,
        }
    }

    /// Feeds one byte; returns the line when `byte` is the end marker.
    pub fn push(&mut self, byte: u8) -> Option<Line> {
        if byte == END_OF_LINE {
            let text = String::from_utf8_lossy(&self.buf).into_owned();
            let line = Line { text, truncated: self.truncated };
            self.buf.clear();
            self.truncated = false;
            return Some(line);
        }

        if self.buf.len() < self.capacity - 1 {
            self.buf.push(byte);
        } else {
            self.truncated = true;
        }
        None
    }

    /// Consumes pending bytes until one line completes. Bytes after the line
    /// stay queued for the next call.
    pub fn drain(&mut self, pending: &mut VecDeque<u8>) -> Option<Line> {
        while let Some(byte) = pending.pop_front() {
            if let Some(line) = self.push(byte) {
                return Some(line);
            }
        }
        None
    }

    /// Bytes of the line currently being assembled.
    pub fn partial_len(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(asm: &mut LineAssembler, bytes: &[u8]) -> Vec<Line> {
        bytes.iter().filter_map(|&b| asm.push(b)).collect()
    }

    #[test]
    fn absolute_and_relative_tokens() {
        assert_eq!(
            parse_token("HH90"),
            Command { code: "HH", value: 90, relative: false, fallback: false }
        );
        assert_eq!(
            parse_token("RB+10"),
            Command { code: "RB", value: 10, relative: true, fallback: false }
        );
        assert_eq!(
            parse_token("EV-25"),
            Command { code: "EV", value: -25, relative: true, fallback: false }
        );
    }

    #[test]
    fn value_starts_at_first_sign_or_digit() {
        let cmd = parse_token("JWx:45y");
        assert_eq!((cmd.code, cmd.value, cmd.relative), ("JW", 45, false));
    }

    #[test]
    fn digitless_tokens_decode_as_relative_zero() {
        for token in ["DP", "HH", "RB+", "EV-x", "H"] {
            let cmd = parse_token(token);
            assert!(cmd.relative && cmd.fallback, "{token}");
            assert_eq!(cmd.value, 0, "{token}");
        }
        assert_eq!(parse_token("H").code, "H");
    }

    #[test]
    fn huge_values_saturate() {
        assert_eq!(parse_token("HH99999999999").value, i32::MAX);
        assert_eq!(parse_token("HH-99999999999").value, i32::MIN);
    }

    #[test]
    fn tokenize_keeps_order_and_ignores_cr() {
        let codes: Vec<_> = tokenize("HH10  RB+5\tDP\r").map(|c| c.code).collect();
        assert_eq!(codes, ["HH", "RB", "DP"]);
        assert_eq!(tokenize("   ").count(), 0);
    }

    #[test]
    fn lines_survive_fragmentation() {
        let mut asm = LineAssembler::default();
        assert!(feed(&mut asm, b"HH").is_empty());
        assert!(feed(&mut asm, b"90 R").is_empty());
        assert_eq!(asm.partial_len(), 6);
        let lines = feed(&mut asm, b"B+1\nDP\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "HH90 RB+1");
        assert_eq!(lines[1].text, "DP");
        assert_eq!(asm.partial_len(), 0);
    }

    #[test]
    fn overflow_truncates_but_still_delivers() {
        let mut asm = LineAssembler::new(8);
        let lines = feed(&mut asm, b"HH10 RB+20 EV5\nDP\n");
        assert_eq!(lines[0], Line { text: "HH10 RB".into(), truncated: true });
        assert_eq!(lines[1], Line { text: "DP".into(), truncated: false });
    }

    #[test]
    fn huge_capacity_does_not_preallocate() {
        let mut asm = LineAssembler::new(usize::MAX / 2);
        assert_eq!(asm.capacity(), usize::MAX / 2);
        let lines = feed(&mut asm, b"HH10\n");
        assert_eq!(lines[0], Line { text: "HH10".into(), truncated: false });
    }

    #[test]
    fn exactly_full_line_is_not_truncated() {
        let mut asm = LineAssembler::new(4);
        let lines = feed(&mut asm, b"abc\n");
        assert_eq!(lines[0], Line { text: "abc".into(), truncated: false });
    }

    #[test]
    fn drain_stops_after_one_line() {
        let mut asm = LineAssembler::default();
        let mut pending: VecDeque<u8> = b"HH1\nHH2\nHH".iter().copied().collect();
        assert_eq!(asm.drain(&mut pending).unwrap().text, "HH1");
        assert_eq!(pending.len(), 6);
        assert_eq!(asm.drain(&mut pending).unwrap().text, "HH2");
        assert!(asm.drain(&mut pending).is_none());
        assert_eq!(asm.partial_len(), 2);
    }

    #[test]
    fn channel_codes_validate() {
        assert!(ChannelCode::try_from("HH").is_ok());
        assert!(ChannelCode::try_from("H").is_err());
        assert!(ChannelCode::try_from("HHH").is_err());
        assert!(ChannelCode::try_from("H ").is_err());
        assert_eq!(ChannelCode::try_from("RB").unwrap().to_string(), "RB");
    }
}
