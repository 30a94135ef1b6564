//! Byte-cursor JSON scanner.
//!
//! Parses one nesting level at a time into a tagged [`Value`]. Strings,
//! numbers and literals are parsed fully; objects and arrays are skipped
//! (balancing brackets, honouring string escapes) and returned as raw spans
//! that can be scanned again on demand:
//!
//! ```
//! use gatewire::codec::Scanner;
//!
//! let input = br#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
//! let d = Scanner::new(input).find("d").unwrap().unwrap();
//! let interval = d.get("heartbeat_interval").unwrap().unwrap();
//!
//! assert_eq!(interval.as_u64(), Some(41250));
//! ```
//!
//! Every read is bounds-checked: truncated input, bad escapes and nesting
//! deeper than [`MAX_DEPTH`] are reported as `Malformed`.

use std::borrow::Cow;
use std::ops::Range;

use crate::error::{GatewayError, Result};

/// Maximum nesting depth of skipped containers.
pub const MAX_DEPTH: usize = 64;

/// A JSON value at one nesting level.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// `null`.
    Null,
    /// `true` or `false`.
    Bool(bool),
    /// Number, kept as its source text.
    Number(&'a str),
    /// String with escapes decoded. Borrowed when no escapes were present.
    String(Cow<'a, str>),
    /// Raw object span, braces included.
    Object(&'a [u8]),
    /// Raw array span, brackets included.
    Array(&'a [u8]),
}

impl<'a> Value<'a> {
    /// Name of the value's type for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
        }
    }

    /// Check for `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean value, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Unsigned integer value. `None` for fractions, exponents, negatives
    /// and values past `u64::MAX`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// Signed integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(text) => text.parse().ok(),
            _ => None,
        }
    }

    /// String value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a member of an object value. `Ok(None)` for non-objects and
    /// missing keys.
    pub fn get(&self, key: &str) -> Result<Option<Value<'a>>> {
        match self {
            Value::Object(raw) => Scanner::new(*raw).find(key),
            _ => Ok(None),
        }
    }
}

/// One `"key": value` pair of an object.
#[derive(Debug, Clone)]
pub struct Member<'a> {
    /// Decoded key.
    pub key: Cow<'a, str>,
    /// Parsed value.
    pub value: Value<'a>,
    /// Byte range of the value's source text within the scanned input.
    pub span: Range<usize>,
}

/// Cursor over a JSON document.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Create a scanner at the start of `input`.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Parse the input as exactly one value (surrounding whitespace allowed).
    pub fn parse_document(&mut self) -> Result<Value<'a>> {
        self.skip_whitespace();
        let (value, _) = self.parse_value()?;
        self.skip_whitespace();
        self.expect_end()?;
        Ok(value)
    }

    /// Iterate the members of the object that makes up the input.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the input does not start with an object. Later
    /// syntax errors are yielded by the iterator, after which it stops.
    pub fn members(mut self) -> Result<Members<'a>> {
        self.skip_whitespace();
        self.expect(b'{')?;
        Ok(Members {
            scanner: self,
            state: MembersState::First,
        })
    }

    /// Find the first member named `key` in the object that makes up the input.
    pub fn find(self, key: &str) -> Result<Option<Value<'a>>> {
        for member in self.members()? {
            let member = member?;
            if member.key == key {
                return Ok(Some(member.value));
            }
        }
        Ok(None)
    }

    /// Parse the value at the cursor, returning it with its byte range.
    pub fn parse_value(&mut self) -> Result<(Value<'a>, Range<usize>)> {
        let input = self.input;
        let start = self.pos;
        let value = match self.peek() {
            None => return Err(self.truncated()),
            Some(b'"') => Value::String(self.parse_string()?),
            Some(b'{') => {
                self.skip_container()?;
                Value::Object(&input[start..self.pos])
            }
            Some(b'[') => {
                self.skip_container()?;
                Value::Array(&input[start..self.pos])
            }
            Some(b't') => {
                self.expect_literal(b"true")?;
                Value::Bool(true)
            }
            Some(b'f') => {
                self.expect_literal(b"false")?;
                Value::Bool(false)
            }
            Some(b'n') => {
                self.expect_literal(b"null")?;
                Value::Null
            }
            Some(b'-' | b'0'..=b'9') => Value::Number(self.parse_number()?),
            Some(other) => return Err(self.unexpected(other)),
        };
        Ok((value, start..self.pos))
    }

    /// Parse a string at the cursor, decoding escapes.
    fn parse_string(&mut self) -> Result<Cow<'a, str>> {
        self.expect(b'"')?;
        let input = self.input;
        let start = self.pos;

        // Fast path: no escapes, borrow straight from the input.
        loop {
            match self.peek() {
                None => return Err(self.truncated()),
                Some(b'"') => {
                    let raw = &input[start..self.pos];
                    self.pos += 1;
                    return std::str::from_utf8(raw)
                        .map(Cow::Borrowed)
                        .map_err(|_| self.error("invalid UTF-8 in string"));
                }
                Some(b'\\') => break,
                Some(byte) if byte < 0x20 => return Err(self.error("control character in string")),
                Some(_) => self.pos += 1,
            }
        }

        let mut out = input[start..self.pos].to_vec();
        loop {
            match self.bump() {
                None => return Err(self.truncated()),
                Some(b'"') => break,
                Some(b'\\') => self.decode_escape(&mut out)?,
                Some(byte) if byte < 0x20 => return Err(self.error("control character in string")),
                Some(byte) => out.push(byte),
            }
        }

        String::from_utf8(out)
            .map(Cow::Owned)
            .map_err(|_| self.error("invalid UTF-8 in string"))
    }

    /// Skip a string at the cursor without decoding it.
    fn skip_string(&mut self) -> Result<()> {
        self.expect(b'"')?;
        loop {
            match self.bump() {
                None => return Err(self.truncated()),
                Some(b'"') => return Ok(()),
                Some(b'\\') => match self.bump() {
                    None => return Err(self.truncated()),
                    Some(b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't') => {}
                    Some(b'u') => {
                        self.read_hex4()?;
                    }
                    Some(_) => return Err(self.error("invalid escape sequence")),
                },
                Some(byte) if byte < 0x20 => return Err(self.error("control character in string")),
                Some(_) => {}
            }
        }
    }

    /// Decode the escape after a backslash into `out`.
    fn decode_escape(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let ch = match self.bump() {
            None => return Err(self.truncated()),
            Some(b'"') => '"',
            Some(b'\\') => '\\',
            Some(b'/') => '/',
            Some(b'b') => '\u{8}',
            Some(b'f') => '\u{c}',
            Some(b'n') => '\n',
            Some(b'r') => '\r',
            Some(b't') => '\t',
            Some(b'u') => self.decode_unicode()?,
            Some(_) => return Err(self.error("invalid escape sequence")),
        };
        let mut buf = [0u8; 4];
        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    /// Decode `XXXX` (and a trailing low surrogate when needed) after `\u`.
    fn decode_unicode(&mut self) -> Result<char> {
        let first = self.read_hex4()?;
        let code = match first {
            0xD800..=0xDBFF => {
                if self.bump() != Some(b'\\') || self.bump() != Some(b'u') {
                    return Err(self.error("unpaired surrogate in unicode escape"));
                }
                let second = self.read_hex4()?;
                if !(0xDC00..=0xDFFF).contains(&second) {
                    return Err(self.error("unpaired surrogate in unicode escape"));
                }
                0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00)
            }
            0xDC00..=0xDFFF => return Err(self.error("unpaired surrogate in unicode escape")),
            _ => first,
        };
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn read_hex4(&mut self) -> Result<u32> {
        let end = match self.pos.checked_add(4) {
            Some(end) if end <= self.input.len() => end,
            _ => return Err(self.truncated()),
        };
        let mut value = 0u32;
        for &digit in &self.input[self.pos..end] {
            let nibble = char::from(digit)
                .to_digit(16)
                .ok_or_else(|| self.error("invalid hex digit in unicode escape"))?;
            value = value * 16 + nibble;
        }
        self.pos = end;
        Ok(value)
    }

    /// Skip an object or array, balancing brackets with a bounded stack.
    fn skip_container(&mut self) -> Result<()> {
        let mut closers = [0u8; MAX_DEPTH];
        let mut depth = 0usize;

        loop {
            match self.peek() {
                None => return Err(self.truncated()),
                Some(b'"') => self.skip_string()?,
                Some(open @ (b'{' | b'[')) => {
                    if depth == MAX_DEPTH {
                        return Err(self.error("nesting too deep"));
                    }
                    closers[depth] = if open == b'{' { b'}' } else { b']' };
                    depth += 1;
                    self.pos += 1;
                }
                Some(close @ (b'}' | b']')) => {
                    if depth == 0 || closers[depth - 1] != close {
                        return Err(self.error("mismatched bracket"));
                    }
                    depth -= 1;
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Parse a number, returning its source text.
    fn parse_number(&mut self) -> Result<&'a str> {
        let input = self.input;
        let start = self.pos;
        self.eat(b'-');

        match self.peek() {
            None => return Err(self.truncated()),
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                self.skip_digits();
            }
            Some(_) => return Err(self.error("invalid number")),
        }

        if self.eat(b'.') && self.skip_digits() == 0 {
            return Err(self.error("missing digits after decimal point"));
        }

        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.skip_digits() == 0 {
                return Err(self.error("missing digits in exponent"));
            }
        }

        std::str::from_utf8(&input[start..self.pos]).map_err(|_| self.error("invalid number"))
    }

    fn skip_digits(&mut self) -> usize {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.pos - start
    }

    fn expect_literal(&mut self, literal: &[u8]) -> Result<()> {
        let rest = &self.input[self.pos..];
        if rest.starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else if rest.len() < literal.len() && literal.starts_with(rest) {
            Err(self.truncated())
        } else {
            Err(self.error("invalid literal"))
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        match self.peek() {
            Some(found) if found == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(self.unexpected(found)),
            None => Err(self.truncated()),
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(found) => Err(self.unexpected(found)),
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn error(&self, message: &str) -> GatewayError {
        GatewayError::Malformed(format!("{} at byte {}", message, self.pos))
    }

    fn truncated(&self) -> GatewayError {
        self.error("unexpected end of input")
    }

    fn unexpected(&self, found: u8) -> GatewayError {
        GatewayError::Malformed(format!(
            "unexpected {:?} at byte {}",
            char::from(found),
            self.pos
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum MembersState {
    First,
    Next,
    Done,
}

/// Iterator over the members of an object. Stops after the first error.
#[derive(Debug, Clone)]
pub struct Members<'a> {
    scanner: Scanner<'a>,
    state: MembersState,
}

impl<'a> Members<'a> {
    fn read_member(&mut self) -> Result<Member<'a>> {
        let scanner = &mut self.scanner;
        scanner.skip_whitespace();
        let key = scanner.parse_string()?;
        scanner.skip_whitespace();
        scanner.expect(b':')?;
        scanner.skip_whitespace();
        let (value, span) = scanner.parse_value()?;
        Ok(Member { key, value, span })
    }

    fn finish(&mut self) -> Result<()> {
        self.scanner.skip_whitespace();
        self.scanner.expect_end()
    }

    fn step(&mut self) -> Option<Result<Member<'a>>> {
        match self.state {
            MembersState::Done => return None,
            MembersState::First => {
                self.scanner.skip_whitespace();
                if self.scanner.eat(b'}') {
                    self.state = MembersState::Done;
                    return self.finish().err().map(Err);
                }
            }
            MembersState::Next => {
                self.scanner.skip_whitespace();
                match self.scanner.bump() {
                    Some(b',') => {}
                    Some(b'}') => {
                        self.state = MembersState::Done;
                        return self.finish().err().map(Err);
                    }
                    Some(found) => {
                        self.scanner.pos -= 1;
                        return Some(Err(self.scanner.unexpected(found)));
                    }
                    None => return Some(Err(self.scanner.truncated())),
                }
            }
        }
        self.state = MembersState::Next;
        Some(self.read_member())
    }
}

impl<'a> Iterator for Members<'a> {
    type Item = Result<Member<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.step();
        if matches!(item, Some(Err(_))) {
            self.state = MembersState::Done;
        }
        item
    }
}
