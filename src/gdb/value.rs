//! GDB/MI value trees
//!
//! A recursive-descent parser for the payloads carried by MI records, plus
//! the canonical text form the trees serialize back to.

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::fmt::{self, Write};

static INVALID: MiValue = MiValue::Invalid;

/// GDB/MI value types
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MiValue {
    /// Structurally invalid input, or a child that does not exist
    #[default]
    Invalid,
    /// A decoded C-string
    Const(String),
    /// `{...}`
    Tuple(Vec<MiResult>),
    /// `[...]`, elements may or may not carry names
    List(Vec<MiResult>),
}

/// GDB/MI result (variable=value pair)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiResult {
    /// Empty for unnamed list elements
    pub variable: String,
    pub value: MiValue,
}

impl MiResult {
    pub fn new(variable: impl Into<String>, value: MiValue) -> Self {
        Self {
            variable: variable.into(),
            value,
        }
    }

    pub fn unnamed(value: MiValue) -> Self {
        Self::new(String::new(), value)
    }
}

impl MiValue {
    /// Parse a single value. Anything unbalanced yields [`MiValue::Invalid`].
    pub fn parse(input: &str) -> MiValue {
        ValueParser::new(input.as_bytes()).parse_value()
    }

    /// Parse the body of an MI record (`,name=value,...`) into a tuple.
    ///
    /// The leading comma is optional. Parsing stops at the first entry that
    /// does not parse; everything before it is kept.
    pub fn parse_results(input: &[u8]) -> MiValue {
        MiValue::Tuple(ValueParser::new(input).parse_result_sequence())
    }

    pub fn empty_tuple() -> Self {
        MiValue::Tuple(Vec::new())
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, MiValue::Invalid)
    }

    pub fn children(&self) -> &[MiResult] {
        match self {
            MiValue::Tuple(children) | MiValue::List(children) => children,
            _ => &[],
        }
    }

    /// Look up a named child. Duplicate names resolve to the first entry.
    pub fn find_child(&self, name: &str) -> &MiValue {
        self.children()
            .iter()
            .find(|child| child.variable == name)
            .map(|child| &child.value)
            .unwrap_or(&INVALID)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// The constant's text, or `""` for anything else.
    pub fn data(&self) -> &str {
        self.as_str().unwrap_or("")
    }

    pub fn find_str(&self, name: &str) -> Option<&str> {
        self.find_child(name).as_str()
    }

    pub fn to_int(&self) -> Option<i64> {
        self.as_str()?.trim().parse().ok()
    }

    pub fn find_u64(&self, name: &str) -> Option<u64> {
        self.find_str(name)?.trim().parse().ok()
    }

    /// Append a named child to a tuple or list. Other values are left alone.
    pub fn push_child(&mut self, name: impl Into<String>, value: MiValue) {
        if let MiValue::Tuple(children) | MiValue::List(children) = self {
            children.push(MiResult::new(name, value));
        }
    }
}

/// Decode a complete C-quoted string such as the body of a `~"..."` record.
pub fn parse_c_string(input: &[u8]) -> Option<String> {
    let mut parser = ValueParser::new(input);
    if parser.peek() != Some(b'"') {
        return None;
    }
    parser.parse_c_string()
}

struct ValueParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> ValueParser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> MiValue {
        self.skip_whitespace();
        match self.peek() {
            Some(b'"') => self.parse_c_string().map(MiValue::Const).unwrap_or_default(),
            Some(b'{') => self.parse_container(b'}').map(MiValue::Tuple).unwrap_or_default(),
            Some(b'[') => self.parse_container(b']').map(MiValue::List).unwrap_or_default(),
            _ => MiValue::Invalid,
        }
    }

    /// Consume `name=` if present; otherwise leave the position untouched.
    fn parse_name(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'-' || c == b'_') {
            self.pos += 1;
        }
        if self.pos > start && self.peek() == Some(b'=') {
            let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
            self.pos += 1;
            Some(name)
        } else {
            self.pos = start;
            None
        }
    }

    fn parse_entry(&mut self) -> Option<MiResult> {
        self.skip_whitespace();
        let variable = self.parse_name().unwrap_or_default();
        let value = self.parse_value();
        value.is_valid().then_some(MiResult { variable, value })
    }

    fn parse_container(&mut self, close: u8) -> Option<Vec<MiResult>> {
        // opening delimiter
        self.pos += 1;
        let mut children = Vec::new();
        self.skip_whitespace();
        if self.eat(close) {
            return Some(children);
        }
        loop {
            children.push(self.parse_entry()?);
            self.skip_whitespace();
            if self.eat(b',') {
                continue;
            }
            return self.eat(close).then_some(children);
        }
    }

    fn parse_result_sequence(&mut self) -> Vec<MiResult> {
        let mut results = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek().is_none() {
                break;
            }
            if !self.eat(b',') && !results.is_empty() {
                break;
            }
            match self.parse_entry() {
                Some(entry) => results.push(entry),
                None => break,
            }
        }
        results
    }

    fn parse_c_string(&mut self) -> Option<String> {
        // opening quote
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            match self.next_byte()? {
                b'"' => return Some(String::from_utf8_lossy(&bytes).into_owned()),
                b'\\' => {
                    let escaped = self.next_byte()?;
                    let decoded = match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'a' => 0x07,
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        b'v' => 0x0b,
                        b'e' => 0x1b,
                        b'0'..=b'7' => self.parse_octal(escaped),
                        other => other,
                    };
                    bytes.push(decoded);
                }
                other => bytes.push(other),
            }
        }
    }

    /// Up to three octal digits, the first already consumed.
    fn parse_octal(&mut self, first: u8) -> u8 {
        let mut code = u32::from(first - b'0');
        for _ in 0..2 {
            match self.peek() {
                Some(digit @ b'0'..=b'7') => {
                    code = code * 8 + u32::from(digit - b'0');
                    self.pos += 1;
                }
                _ => break,
            }
        }
        (code & 0xff) as u8
    }
}

impl fmt::Display for MiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MiValue::Invalid => Ok(()),
            MiValue::Const(s) => write_c_string(f, s),
            MiValue::Tuple(children) => {
                f.write_char('{')?;
                write_children(f, children)?;
                f.write_char('}')
            }
            MiValue::List(children) => {
                f.write_char('[')?;
                write_children(f, children)?;
                f.write_char(']')
            }
        }
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, children: &[MiResult]) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_char(',')?;
        }
        if !child.variable.is_empty() {
            write!(f, "{}=", child.variable)?;
        }
        write!(f, "{}", child.value)?;
    }
    Ok(())
}

fn write_c_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if (c as u32) < 0x20 || c == '\x7f' => write!(f, "\\{:03o}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl Serialize for MiValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MiValue::Invalid => serializer.serialize_none(),
            MiValue::Const(s) => serializer.serialize_str(s),
            MiValue::Tuple(children) => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for child in children {
                    map.serialize_entry(&child.variable, &child.value)?;
                }
                map.end()
            }
            MiValue::List(children) => {
                let mut seq = serializer.serialize_seq(Some(children.len()))?;
                for child in children {
                    if child.variable.is_empty() {
                        seq.serialize_element(&child.value)?;
                    } else {
                        seq.serialize_element(child)?;
                    }
                }
                seq.end()
            }
        }
    }
}

impl Serialize for MiResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.variable, &self.value)?;
        map.end()
    }
}
