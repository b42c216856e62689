//! Streaming event types and utilities

use crate::types::{Completion, StopReason, Usage, truncate_at_stop};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion is generated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// Generated text delta
    Delta { text: String },
    /// Generation finished
    Done {
        usage: Usage,
        stop_reason: Option<StopReason>,
    },
    /// Error occurred
    Error { message: String },
}

impl CompletionEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CompletionEvent::Done { .. } | CompletionEvent::Error { .. }
        )
    }
}

/// A stream of completion events
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// Builds a [`Completion`] from streamed deltas, honoring stop markers
/// across delta boundaries.
///
/// Text that could be the start of a stop marker is held back until the
/// next delta disambiguates it, so callers never display a partial marker.
#[derive(Debug, Default)]
pub struct CompletionBuilder {
    stop: Vec<String>,
    text: String,
    emitted: usize,
    stopped: Option<StopReason>,
    usage: Usage,
    finish_reason: Option<StopReason>,
}

impl CompletionBuilder {
    /// Create a new builder for the given stop markers
    pub fn new(stop: Vec<String>) -> Self {
        Self {
            stop,
            ..Default::default()
        }
    }

    /// Whether a stop marker has been seen; further deltas are ignored
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_some()
    }

    /// Feed a delta, returning the portion that is now safe to display
    pub fn push_delta(&mut self, delta: &str) -> Option<String> {
        if self.is_stopped() {
            return None;
        }
        self.text.push_str(delta);

        let (truncated, reason) = truncate_at_stop(&self.text, &self.stop);
        let safe_end = if reason.is_some() {
            self.text = truncated;
            self.stopped = reason;
            self.text.len()
        } else {
            self.text.len() - self.held_back()
        };

        if safe_end > self.emitted {
            let out = self.text[self.emitted..safe_end].to_string();
            self.emitted = safe_end;
            Some(out)
        } else {
            None
        }
    }

    /// Process a streaming event and update the builder state
    pub fn process_event(&mut self, event: &CompletionEvent) -> Option<String> {
        match event {
            CompletionEvent::Delta { text } => self.push_delta(text),
            CompletionEvent::Done { usage, stop_reason } => {
                self.usage = *usage;
                self.finish_reason = stop_reason.clone();
                None
            }
            CompletionEvent::Error { .. } => None,
        }
    }

    /// Text that has not been returned from `push_delta` yet
    pub fn pending(&self) -> &str {
        &self.text[self.emitted..]
    }

    /// Build the final completion
    pub fn build(self) -> Completion {
        Completion {
            text: self.text,
            usage: self.usage,
            stop_reason: self.stopped.or(self.finish_reason),
            elapsed_ms: 0,
        }
    }

    /// Length of the longest suffix of the buffer that is a proper prefix
    /// of some stop marker.
    fn held_back(&self) -> usize {
        let mut longest = 0;
        for marker in &self.stop {
            for len in (1..marker.len()).rev() {
                if len <= longest {
                    break;
                }
                if marker.is_char_boundary(len) && self.text.ends_with(&marker[..len]) {
                    longest = len;
                    break;
                }
            }
        }
        longest.min(self.text.len() - self.emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(markers: &[&str]) -> CompletionBuilder {
        CompletionBuilder::new(markers.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_plain_deltas_pass_through() {
        let mut b = builder(&["<|eot_id|>"]);
        assert_eq!(b.push_delta("Hello"), Some("Hello".into()));
        assert_eq!(b.push_delta(", world"), Some(", world".into()));
        assert_eq!(b.build().text, "Hello, world");
    }

    #[test]
    fn test_marker_split_across_deltas() {
        let mut b = builder(&["<|eot_id|>"]);
        assert_eq!(b.push_delta("Done.<|eo"), Some("Done.".into()));
        assert_eq!(b.pending(), "<|eo");
        assert_eq!(b.push_delta("t_id|>\ntrailing"), None);
        assert!(b.is_stopped());
        assert_eq!(b.push_delta("ignored"), None);

        let completion = b.build();
        assert_eq!(completion.text, "Done.");
        assert_eq!(
            completion.stop_reason,
            Some(StopReason::StopMarker {
                marker: "<|eot_id|>".into()
            })
        );
    }

    #[test]
    fn test_false_alarm_prefix_is_released() {
        let mut b = builder(&["END_FUNC"]);
        assert_eq!(b.push_delta("the END"), Some("the ".into()));
        assert_eq!(b.push_delta(" of it"), Some("END of it".into()));
        assert!(!b.is_stopped());
    }

    #[test]
    fn test_done_event_records_usage() {
        let mut b = builder(&[]);
        b.process_event(&CompletionEvent::Delta { text: "4".into() });
        b.process_event(&CompletionEvent::Done {
            usage: Usage::new(12, 1),
            stop_reason: Some(StopReason::Stop),
        });
        let completion = b.build();
        assert_eq!(completion.text, "4");
        assert_eq!(completion.usage.total, 13);
        assert_eq!(completion.stop_reason, Some(StopReason::Stop));
    }

    #[test]
    fn test_terminal_events() {
        assert!(CompletionEvent::Error { message: "x".into() }.is_terminal());
        assert!(!CompletionEvent::Delta { text: "x".into() }.is_terminal());
    }
}
