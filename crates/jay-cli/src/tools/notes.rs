//! Saving notes to disk

use async_trait::async_trait;
use jay_agent::{ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// `_save_note(TITLE, BODY, FORMAT=".txt")`
pub struct SaveNoteTool {
    dir: PathBuf,
}

impl SaveNoteTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

/// `<timestamp>-<title>.<ext>`, with the title reduced to a single path segment
fn note_file_name(title: &str, format: &str, now: chrono::DateTime<chrono::Local>) -> String {
    let ext: String = format
        .trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let ext = if ext.is_empty() { "txt".to_string() } else { ext };

    let title = title.trim();
    let title = title.strip_suffix(&format!(".{}", ext)).unwrap_or(title);
    let title: String = title
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let title = title.trim_start_matches('.');
    let title = if title.is_empty() { "note" } else { title };

    format!("{}-{}.{}", now.format("%Y_%m_%d_%H_%M_%S"), title, ext)
}

async fn write_note(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

#[async_trait]
impl Tool for SaveNoteTool {
    fn name(&self) -> &str {
        "_save_note"
    }

    fn description(&self) -> &str {
        "Saves a note for the user. FORMAT is the file extension."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("TITLE", ParamType::String)
            .required("BODY", ParamType::String)
            .optional("FORMAT", ParamType::String, json!(".txt"))
    }

    async fn execute(&self, arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let (Some(title), Some(body)) = (arguments.str("TITLE"), arguments.str("BODY")) else {
            return ToolResult::error("Missing TITLE or BODY");
        };
        let format = arguments.str("FORMAT").unwrap_or(".txt");

        let name = note_file_name(title, format, chrono::Local::now());
        match write_note(&self.dir, &name, body).await {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "note saved");
                ToolResult::text("['Note saved.']")
            }
            Err(e) => ToolResult::error(format!("The note could not be saved: {}", e)),
        }
    }
}
