//! Current date and time

use async_trait::async_trait;
use jay_agent::{ParameterSchema, ResolvedArguments, Tool, ToolResult};
use tokio_util::sync::CancellationToken;

/// `_time()`
pub struct TimeTool;

impl TimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "_time"
    }

    fn description(&self) -> &str {
        "Tells the time and date."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let now = chrono::Local::now();
        ToolResult::text(format!(
            "Time and Date is ['{}'].",
            now.format("%a %b %e %H:%M:%S %Y")
        ))
    }
}
