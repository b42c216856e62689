//! Reading files for the model
//!
//! Only files under one configured directory are readable. Absolute paths
//! and `..` are refused before touching the filesystem, and the canonical
//! path must still sit under the directory after symlinks resolve.

use async_trait::async_trait;
use jay_agent::{ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::utils::truncate_chars;

/// Longest file content handed back to the model, in characters
const MAX_CHARS: usize = 20_000;

/// `_read_file_for_AI(FILE)`
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map `name` onto a readable path under the root
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let relative = Path::new(name.trim());
        if relative.as_os_str().is_empty() {
            return None;
        }
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return None;
        }

        let root = self.root.canonicalize().ok()?;
        let path = root.join(relative).canonicalize().ok()?;
        path.starts_with(&root).then_some(path)
    }
}

fn not_found(name: &str) -> ToolResult {
    ToolResult::error(format!(
        "File {} was not found. Ask the user for further clarification.",
        name
    ))
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "_read_file_for_AI"
    }

    fn description(&self) -> &str {
        "Reads a file the user has placed in their shared files folder."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("FILE", ParamType::String)
            .describe("File name relative to the shared folder")
    }

    async fn execute(&self, arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let name = arguments.str("FILE").unwrap_or_default();
        let Some(path) = self.locate(name) else {
            tracing::debug!(file = name, "file refused or missing");
            return not_found(name);
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ToolResult::text(format!("File: [{}]", truncate_chars(&content, MAX_CHARS))),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "file read failed");
                not_found(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file(name: &str) -> ResolvedArguments {
        let mut map = serde_json::Map::new();
        map.insert("FILE".into(), json!(name));
        ResolvedArguments(map)
    }

    #[tokio::test]
    async fn test_read_file_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs").join("plan.txt"), "step one").unwrap();

        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(file("docs/plan.txt"), CancellationToken::new()).await;
        assert!(result.succeeded);
        assert_eq!(result.payload, "File: [step one]");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path());
        let result = tool.execute(file("nope.txt"), CancellationToken::new()).await;
        assert!(!result.succeeded);
        assert_eq!(
            result.payload,
            "File nope.txt was not found. Ask the user for further clarification."
        );
    }

    #[tokio::test]
    async fn test_escapes_refused() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("shared");
        std::fs::create_dir(&root).unwrap();
        let secret = outer.path().join("secret.txt");
        std::fs::write(&secret, "hidden").unwrap();

        let tool = ReadFileTool::new(&root);
        for name in ["../secret.txt", secret.to_str().unwrap(), ""] {
            let result = tool.execute(file(name), CancellationToken::new()).await;
            assert!(!result.succeeded, "{} should be refused", name);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_out_of_root_refused() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("shared");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("secret.txt"), "hidden").unwrap();
        std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("link.txt")).unwrap();

        let tool = ReadFileTool::new(&root);
        let result = tool.execute(file("link.txt"), CancellationToken::new()).await;
        assert!(!result.succeeded);
    }
}
