//! Tool-call detection in assistant text.
//!
//! A call looks like `to-system: _name(ARG = value, ...) END_FUNC` and may
//! appear after ordinary conversational text. Recognition is
//! narrow: after the marker, the next non-whitespace character must be the
//! tool-name prefix and the first word must contain `(`. Anything else is
//! treated as prose that happens to mention the marker.
//!
//! The parser is stateless. A turn with several calls is handled one call
//! at a time, re-parsing each new generation after a result is appended.

use serde_json::Value;

use crate::arguments::render_literal;
use crate::protocol::{INVOCATION_MARKER, TERMINATOR, TOOL_NAME_PREFIX};

/// A tool call as written by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCall {
    pub name: String,
    /// Text between the call's parentheses, exactly as emitted
    pub raw_arguments: String,
}

/// Result of scanning one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// No tool call; the text is user-visible output as-is
    NoCall { text: String },
    Call {
        /// Conversational text before the marker
        preamble: String,
        call: RawCall,
        /// The generation as it belongs in the transcript: everything up to
        /// and including the terminator, nothing after it
        transcript: String,
        /// The terminator (or closing parenthesis) was missing and has been
        /// supplied
        force_closed: bool,
    },
}

/// Scan assistant text for a tool call.
pub fn parse(text: &str) -> ParseOutcome {
    let no_call = || ParseOutcome::NoCall {
        text: text.to_string(),
    };

    let Some(marker_at) = text.find(INVOCATION_MARKER) else {
        return no_call();
    };
    let after_marker = marker_at + INVOCATION_MARKER.len();
    let rest = &text[after_marker..];
    let leading_ws = rest.len() - rest.trim_start().len();
    let call_start = after_marker + leading_ws;
    let call_text = &text[call_start..];

    if !call_text.starts_with(TOOL_NAME_PREFIX) {
        return no_call();
    }
    let first_word = call_text.split_whitespace().next().unwrap_or("");
    let Some(open) = first_word.find('(') else {
        return no_call();
    };

    let name = call_text[..open].to_string();
    let args_start = call_start + open + 1;
    let args = &text[args_start..];

    // The terminator only counts once the argument list has closed, so a
    // string argument may contain it.
    let (raw_arguments, transcript, force_closed) = match matching_paren(args) {
        Some(close) => {
            let after_paren = args_start + close + 1;
            let raw = args[..close].to_string();
            match text[after_paren..].find(TERMINATOR) {
                Some(t) => (raw, text[..after_paren + t + TERMINATOR.len()].to_string(), false),
                None => (raw, format!("{} {}", &text[..after_paren], TERMINATOR), true),
            }
        }
        None => match args.find(TERMINATOR) {
            Some(t) => (
                args[..t].trim_end().to_string(),
                text[..args_start + t + TERMINATOR.len()].to_string(),
                true,
            ),
            None => (
                args.trim_end().to_string(),
                format!("{}) {}", text.trim_end(), TERMINATOR),
                true,
            ),
        },
    };

    ParseOutcome::Call {
        preamble: text[..marker_at].to_string(),
        call: RawCall {
            name,
            raw_arguments,
        },
        transcript,
        force_closed,
    }
}

/// Byte offset of the `)` that closes an argument list whose `(` has
/// already been consumed. Parentheses inside string literals don't count.
fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Render a call in canonical form.
///
/// `parse(&serialize_call(name, args))` yields a call with the same name
/// whose arguments parse back to `args`.
pub fn serialize_call(name: &str, args: &[(String, Value)]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|(k, v)| format!("{} = {}", k, render_literal(v)))
        .collect();
    format!(
        "{} {}({}) {}",
        INVOCATION_MARKER,
        name,
        rendered.join(", "),
        TERMINATOR
    )
}

/// The call as it is kept in the transcript, from the marker through the
/// terminator, without the preamble
pub fn invocation_span(text: &str) -> Option<String> {
    match parse(text) {
        ParseOutcome::Call {
            preamble,
            transcript,
            ..
        } => Some(transcript[preamble.len()..].to_string()),
        ParseOutcome::NoCall { .. } => None,
    }
}
