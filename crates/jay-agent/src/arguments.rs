//! Literal-only argument grammar for tool calls.
//!
//! Model-authored argument text is never evaluated. It is parsed against
//! a small grammar of positional and keyword arguments whose values are
//! literals: strings, integers, floats, booleans, `None` and lists.

use std::fmt;

use serde_json::{Number, Value};

/// Arguments as written in the call, before binding to a schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub positional: Vec<Value>,
    pub keyword: Vec<(String, Value)>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// A syntax error with the byte offset where it was detected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for ArgumentError {}

type ParseResult<T> = std::result::Result<T, ArgumentError>;

/// Parse the text between a call's parentheses.
pub fn parse_arguments(src: &str) -> ParseResult<Arguments> {
    let mut parser = Parser { src, pos: 0 };
    parser.arguments()
}

/// Render a value in the same literal syntax the grammar accepts.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(render_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(_) => quote(&value.to_string()),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        Err(ArgumentError {
            offset: self.pos,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn arguments(&mut self) -> ParseResult<Arguments> {
        let mut args = Arguments::default();
        self.skip_ws();
        if self.peek().is_none() {
            return Ok(args);
        }

        loop {
            let start = self.pos;
            match self.keyword_name() {
                Some(name) => {
                    let value = self.literal()?;
                    if args.keyword.iter().any(|(k, _)| *k == name) {
                        self.pos = start;
                        return self.error(format!("keyword argument '{}' repeated", name));
                    }
                    args.keyword.push((name, value));
                }
                None => {
                    if !args.keyword.is_empty() {
                        return self.error("positional argument follows keyword argument");
                    }
                    let value = self.literal()?;
                    args.positional.push(value);
                }
            }

            self.skip_ws();
            match self.peek() {
                None => break,
                Some(',') => {
                    self.bump();
                    self.skip_ws();
                    if self.peek().is_none() {
                        break;
                    }
                }
                Some(c) => return self.error(format!("expected ',' but found '{}'", c)),
            }
        }

        Ok(args)
    }

    /// Consume `IDENT =` if present, leaving the position untouched otherwise.
    fn keyword_name(&mut self) -> Option<String> {
        let start = self.pos;
        let ident = self.identifier()?;
        self.skip_ws();
        if self.peek() == Some('=') && self.peek_nth(1) != Some('=') {
            self.bump();
            self.skip_ws();
            Some(ident)
        } else {
            self.pos = start;
            None
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            _ => return None,
        }
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        Some(self.src[start..self.pos].to_string())
    }

    fn literal(&mut self) -> ParseResult<Value> {
        self.skip_ws();
        match self.peek() {
            None => self.error("expected a value"),
            Some('"') | Some('\'') => self.string().map(Value::String),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => {
                let start = self.pos;
                let ident = self.identifier().unwrap_or_default();
                match ident.as_str() {
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    "None" | "null" => Ok(Value::Null),
                    other => {
                        self.pos = start;
                        self.error(format!("'{}' is not a literal value", other))
                    }
                }
            }
            Some(c) => self.error(format!("unexpected character '{}'", c)),
        }
    }

    fn sequence(&mut self, open: char, close: char) -> ParseResult<Value> {
        debug_assert_eq!(self.peek(), Some(open));
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return self.error(format!("unclosed '{}'", open)),
                Some(c) if c == close => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                _ => {}
            }
            items.push(self.literal()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(c) if c == close => {}
                None => return self.error(format!("unclosed '{}'", open)),
                Some(c) => return self.error(format!("expected ',' or '{}' but found '{}'", close, c)),
            }
        }
    }

    fn string(&mut self) -> ParseResult<String> {
        let start = self.pos;
        let quote = self.bump().unwrap_or('"');
        let triple = self.peek() == Some(quote) && self.peek_nth(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                self.pos = start;
                return self.error("unterminated string");
            };
            match c {
                '\\' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('0') => out.push('\0'),
                    Some('\\') => out.push('\\'),
                    Some('\'') => out.push('\''),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => {
                        self.pos = start;
                        return self.error("unterminated string");
                    }
                },
                c if c == quote => {
                    if !triple {
                        return Ok(out);
                    }
                    let mut run = 1;
                    while self.peek() == Some(quote) {
                        self.bump();
                        run += 1;
                    }
                    if run >= 3 {
                        out.extend(std::iter::repeat_n(quote, run - 3));
                        return Ok(out);
                    }
                    out.extend(std::iter::repeat_n(quote, run));
                }
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> ParseResult<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }

        let text: String = self.src[start..self.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        let text = text.trim_start_matches('+');

        if !is_float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::Number(n.into()));
            }
        }
        match text.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(n) => Ok(Value::Number(n)),
            None => {
                self.pos = start;
                self.error(format!("invalid number '{}'", text))
            }
        }
    }
}
