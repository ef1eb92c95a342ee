//! Parsing of decoder output lines.

use crate::error::{Error, Result};
use crate::signature;
use std::ops::Range;

/// Type tokens that are never resolved to a class, matched by substring
const BASE_TYPES: &[&str] = &[
    "enum", "string", "int", "double", "float", "bool", "fixed", "bytes", "oneof", "map", "group",
];

/// Returns true if `token` names a scalar, wrapper or structural type
///
/// This is a substring test, not a token comparison: a type token such as
/// `mapstuff` or `com/example/Point` (which contains `int`) also counts as a
/// base type and is never recursed into.
pub fn is_base_type(token: &str) -> bool {
    BASE_TYPES.iter().any(|base| token.contains(base))
}

/// Where the declared type sits in a field line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLineShape {
    /// `<label> <type> <name> = <number>;`
    Plain,
    /// `<type> <oneof-marker> <name> = <number>;`
    Oneof,
}

impl FieldLineShape {
    fn type_position(self) -> usize {
        match self {
            FieldLineShape::Plain => 1,
            FieldLineShape::Oneof => 0,
        }
    }
}

/// How a field's type token is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind<'a> {
    /// `message` placeholder, resolved through the class's fields
    Message,
    /// `group` placeholder, resolved like `message`
    Group,
    /// `enum` placeholder; values are not recoverable
    Enum,
    /// Scalar or structural type
    Base,
    /// Any other token: a message class by binary name
    Reference(&'a str),
}

impl<'a> TypeKind<'a> {
    /// Classify a type token
    pub fn of(token: &'a str) -> Self {
        match token {
            "message" => TypeKind::Message,
            "group" => TypeKind::Group,
            "enum" => TypeKind::Enum,
            t if is_base_type(t) => TypeKind::Base,
            t => TypeKind::Reference(t),
        }
    }
}

/// A field definition line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLine {
    raw: String,
    shape: FieldLineShape,
    type_span: Range<usize>,
    name: Option<String>,
}

impl FieldLine {
    /// The line as produced by the decoder
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Line shape
    pub fn shape(&self) -> FieldLineShape {
        self.shape
    }

    /// The declared type token
    pub fn type_token(&self) -> &str {
        &self.raw[self.type_span.clone()]
    }

    /// The field name token, if the line has one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The line with its type token replaced by `replacement`
    pub fn with_type(&self, replacement: &str) -> String {
        let mut line = String::with_capacity(self.raw.len() + replacement.len());
        line.push_str(&self.raw[..self.type_span.start]);
        line.push_str(replacement);
        line.push_str(&self.raw[self.type_span.end..]);
        line
    }

    /// The line with a qualified type token shortened to its simple name
    pub fn display(&self) -> String {
        let token = self.type_token();
        if token.contains('/') {
            self.with_type(signature::simple_name(token))
        } else {
            self.raw.clone()
        }
    }
}

/// One line of decoder output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFieldLine {
    /// A line opening or closing a block (`oneof x {`, `}`)
    Delimiter(String),
    /// A field definition
    Field(FieldLine),
}

impl DecodedFieldLine {
    /// Parse a single non-empty line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end();
        if line.contains('{') || line.contains('}') {
            return Ok(DecodedFieldLine::Delimiter(line.to_string()));
        }

        let Some(eq) = line.find('=') else {
            return Err(Error::malformed_field_line(line));
        };

        let tokens = tokenize(&line[..eq]);
        if tokens.len() < 2 {
            return Err(Error::malformed_field_line(line));
        }

        let shape = if tokens[1].1.contains("oneof") {
            FieldLineShape::Oneof
        } else {
            FieldLineShape::Plain
        };
        let (start, token) = tokens[shape.type_position()];

        Ok(DecodedFieldLine::Field(FieldLine {
            raw: line.to_string(),
            shape,
            type_span: start..start + token.len(),
            name: tokens.get(2).map(|(_, name)| name.to_string()),
        }))
    }
}

/// Parse decoder output, skipping blank lines
pub fn parse_lines(text: &str) -> Result<Vec<DecodedFieldLine>> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(DecodedFieldLine::parse)
        .collect()
}

/// Whitespace separated tokens with their byte offsets
fn tokenize(s: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in s.char_indices() {
        if c.is_whitespace() {
            if let Some(st) = start.take() {
                tokens.push((st, &s[st..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(st) = start {
        tokens.push((st, &s[st..]));
    }
    tokens
}
