//! Protocol markers shared with the model's prompt, plus clean-up of raw
//! generations before they are parsed.
//!
//! These strings appear verbatim in existing transcripts and in the
//! few-shot prompt, so they are matched bit-exact.

use std::sync::LazyLock;

use regex::Regex;

/// Opens a tool-call span in assistant text
pub const INVOCATION_MARKER: &str = "to-system:";
/// Closes a tool-call span
pub const TERMINATOR: &str = "END_FUNC";
/// Prefixes every tool result folded back into the conversation
pub const RESULT_TAG: &str = "to-Jay:";
/// Every registered tool name starts with this
pub const TOOL_NAME_PREFIX: char = '_';

pub const INTERNAL_OPEN: &str = "<jay_internal>";
pub const INTERNAL_CLOSE: &str = "</jay_internal>";

pub const BEGIN_OF_TEXT: &str = "<|begin_of_text|>";
pub const END_OF_TURN: &str = "<|eot_id|>";

/// The model tends to write the tool result itself right after the
/// terminator; stopping here cuts it off as `...END_FU`.
pub const RESULT_ECHO_STOP: &str = "NC(to-Jay:";

/// Stop markers sent with every conversational generation
pub fn default_stop_markers() -> Vec<String> {
    vec![END_OF_TURN.to_string(), RESULT_ECHO_STOP.to_string()]
}

/// Llama 3 role header, including the blank line that follows it
pub fn role_header(role: &str) -> String {
    format!("<|start_header_id|>{}<|end_header_id|>\n\n", role)
}

static MARKER_CASING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)to-system\s*:").expect("static regex"));

static INTERNAL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<jay_internal>.*?</jay_internal>").expect("static regex")
});

const TRAILING_ARTIFACTS: &[&str] = &["</EXAMPLE>", "</START>"];

/// A generation after post-processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    /// The terminator was cut short by a stop marker and has been completed
    pub completed_terminator: bool,
}

/// Post-process raw generated text before it is handed to the parser.
///
/// - a terminator truncated by the result-echo stop marker is completed
/// - casing drift of the invocation marker is normalized
/// - trailing few-shot artifacts are trimmed
pub fn normalize_generation(raw: &str) -> Normalized {
    let mut text = MARKER_CASING
        .replace_all(raw, INVOCATION_MARKER)
        .into_owned();

    loop {
        let trimmed = text.trim_end();
        match TRAILING_ARTIFACTS.iter().find(|a| trimmed.ends_with(*a)) {
            Some(artifact) => {
                let keep = trimmed.len() - artifact.len();
                text.truncate(keep);
            }
            None => break,
        }
    }

    let mut completed_terminator = false;
    if text.contains(INVOCATION_MARKER) {
        let end = text.trim_end().len();
        text.truncate(end);
        if let Some(missing) = truncated_terminator_tail(&text) {
            text.push_str(missing);
            completed_terminator = true;
        }
    }

    Normalized {
        text,
        completed_terminator,
    }
}

/// If `text` ends with a proper prefix of the terminator (at least three
/// characters), return the part that is missing.
fn truncated_terminator_tail(text: &str) -> Option<&'static str> {
    (3..TERMINATOR.len())
        .rev()
        .find(|&len| text.ends_with(&TERMINATOR[..len]))
        .map(|len| &TERMINATOR[len..])
}

/// Remove internal-reasoning blocks for display to the user.
///
/// An opening tag without a matching close only loses the tag itself; the
/// model often forgets the close tag and answers straight after it.
pub fn strip_internal(text: &str) -> String {
    let without_blocks = INTERNAL_BLOCK.replace_all(text, "");
    without_blocks
        .replace(INTERNAL_OPEN, "")
        .replace(INTERNAL_CLOSE, "")
        .trim()
        .to_string()
}

/// The internal monologue, if the text has one
pub fn internal_reasoning(text: &str) -> Option<&str> {
    let start = text.find(INTERNAL_OPEN)? + INTERNAL_OPEN.len();
    let end = text[start..].find(INTERNAL_CLOSE)? + start;
    Some(text[start..end].trim())
}
