//! Shared utilities

use jay_agent::protocol::{INTERNAL_CLOSE, INTERNAL_OPEN};

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// Words that end an interactive session
const EXIT_WORDS: &[&str] = &["false", "f", "exit", "stop", "cls"];

pub fn is_exit_word(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    EXIT_WORDS.contains(&input.as_str())
}

/// Filters streamed text down to what the user should see, dropping
/// `<jay_internal>` blocks even when a tag is split across deltas.
#[derive(Debug, Default)]
pub struct VisibleText {
    pending: String,
    inside: bool,
}

impl VisibleText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a delta; returns the part that is safe to print now
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut out = String::new();

        loop {
            let tag = if self.inside { INTERNAL_CLOSE } else { INTERNAL_OPEN };
            if let Some(pos) = self.pending.find(tag) {
                if !self.inside {
                    out.push_str(&self.pending[..pos]);
                }
                self.pending.drain(..pos + tag.len());
                self.inside = !self.inside;
                continue;
            }

            // hold back a suffix that could still grow into the tag
            let keep = partial_suffix(&self.pending, tag);
            let ready = self.pending.len() - keep;
            if !self.inside {
                out.push_str(&self.pending[..ready]);
            }
            self.pending.drain(..ready);
            break out;
        }
    }

    /// Flush whatever was held back at the end of a generation
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside { String::new() } else { rest }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`
fn partial_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_drops_internal_blocks() {
        let mut v = VisibleText::new();
        let mut out = String::new();
        for delta in ["Sure. <jay_in", "ternal>thinking", " hard</jay_", "internal> It is 9."] {
            out.push_str(&v.push(delta));
        }
        assert_eq!(out, "Sure.  It is 9.");
    }

    #[test]
    fn test_visible_text_passes_plain_text() {
        let mut v = VisibleText::new();
        assert_eq!(v.push("a < b"), "a < b");
        assert_eq!(v.push("<"), "");
        assert_eq!(v.push("p>"), "<p>");
        assert_eq!(v.push(" 3 <"), " 3 ");
        assert_eq!(v.finish(), "<");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
    }

    #[test]
    fn test_exit_words() {
        assert!(is_exit_word("exit"));
        assert!(is_exit_word("  STOP "));
        assert!(is_exit_word("F"));
        assert!(!is_exit_word("stop the timer"));
        assert!(!is_exit_word(""));
    }
}
