//! Countdown timers
//!
//! `_set_timer` returns as soon as the timer is armed. The countdown runs
//! on a detached task and reports through a [`Notifier`] when it expires.

use async_trait::async_trait;
use jay_agent::{ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Receives expired timers
pub trait Notifier: Send + Sync {
    fn notify(&self, minutes: u32);
}

/// Rings the terminal bell and prints to stderr
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, minutes: u32) {
        tracing::info!(minutes, "timer expired");
        let unit = if minutes == 1 { "minute" } else { "minutes" };
        eprintln!("\x07\n[timer] {} {} are up\n", minutes, unit);
    }
}

/// `_set_timer(MINUTES)`
pub struct TimerTool {
    notifier: Arc<dyn Notifier>,
    unit: Duration,
}

impl TimerTool {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            unit: Duration::from_secs(60),
        }
    }

    #[cfg(test)]
    fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }
}

#[async_trait]
impl Tool for TimerTool {
    fn name(&self) -> &str {
        "_set_timer"
    }

    fn description(&self) -> &str {
        "Sets a timer that alerts the user after the given number of minutes."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("MINUTES", ParamType::Int)
            .describe("Minutes until the timer goes off")
    }

    async fn execute(&self, arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let Some(minutes) = arguments.int("MINUTES") else {
            return ToolResult::error("Missing MINUTES");
        };
        let minutes = match u32::try_from(minutes) {
            Ok(m) if m > 0 => m,
            _ => return ToolResult::error(format!("MINUTES must be a positive whole number, got {}", minutes)),
        };

        let notifier = self.notifier.clone();
        let wait = self.unit * minutes;
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            notifier.notify(minutes);
        });
        tracing::debug!(minutes, "timer armed");

        ToolResult::text("['Timer Set']")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<u32>);

    impl Notifier for ChannelNotifier {
        fn notify(&self, minutes: u32) {
            let _ = self.0.send(minutes);
        }
    }

    fn args(minutes: i64) -> ResolvedArguments {
        let mut map = serde_json::Map::new();
        map.insert("MINUTES".into(), json!(minutes));
        ResolvedArguments(map)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_returns_before_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tool = TimerTool::new(Arc::new(ChannelNotifier(tx)));

        let started = tokio::time::Instant::now();
        let result = tool.execute(args(2), CancellationToken::new()).await;
        assert!(result.succeeded);
        assert_eq!(result.payload, "['Timer Set']");
        assert!(rx.try_recv().is_err());

        assert_eq!(rx.recv().await, Some(2));
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_timer_fires_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tool = TimerTool::new(Arc::new(ChannelNotifier(tx))).with_unit(Duration::from_millis(10));

        tool.execute(args(5), CancellationToken::new()).await;
        tool.execute(args(1), CancellationToken::new()).await;

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(5));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_minutes() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let tool = TimerTool::new(Arc::new(ChannelNotifier(tx)));

        let result = tool.execute(args(0), CancellationToken::new()).await;
        assert!(!result.succeeded);
        let result = tool.execute(args(-3), CancellationToken::new()).await;
        assert!(!result.succeeded);
    }
}
