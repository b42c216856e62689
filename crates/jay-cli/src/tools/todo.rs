//! The to-do list
//!
//! One plain-text file, one `* element (h:mm{am|pm} d/m/Y)` line per entry.
//! The three tools share a [`TodoList`], which serializes edits.

use async_trait::async_trait;
use jay_agent::{ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// The to-do file and a lock over read-modify-write edits
pub struct TodoList {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TodoList {
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            lock: Mutex::new(()),
        })
    }

    async fn contents(&self) -> std::io::Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    async fn store(&self, contents: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, contents).await
    }

    pub async fn add(&self, element: &str, now: chrono::DateTime<chrono::Local>) -> std::io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut contents = self.contents().await?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&format!(
            "* {} ({})\n",
            element.trim(),
            now.format("%-I:%M%P %-d/%-m/%Y")
        ));
        self.store(&contents).await
    }

    /// Remove every line mentioning `element`; returns how many went
    pub async fn remove(&self, element: &str) -> std::io::Result<usize> {
        let _guard = self.lock.lock().await;
        let needle = element.trim();
        if needle.is_empty() {
            return Ok(0);
        }
        let contents = self.contents().await?;
        let (dropped, kept): (Vec<&str>, Vec<&str>) =
            contents.lines().partition(|line| line.contains(needle));
        let removed = dropped.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut rest = kept.join("\n");
        if !rest.is_empty() {
            rest.push('\n');
        }
        self.store(&rest).await?;
        Ok(removed)
    }

    pub async fn read(&self) -> std::io::Result<String> {
        let _guard = self.lock.lock().await;
        self.contents().await
    }
}

/// `_todo_list_add(ELEMENT)`
pub struct TodoAddTool {
    list: Arc<TodoList>,
}

impl TodoAddTool {
    pub fn new(list: Arc<TodoList>) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Tool for TodoAddTool {
    fn name(&self) -> &str {
        "_todo_list_add"
    }

    fn description(&self) -> &str {
        "Adds an element to the user's to-do list."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("ELEMENT", ParamType::String)
    }

    async fn execute(&self, arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let Some(element) = arguments.str("ELEMENT").filter(|e| !e.trim().is_empty()) else {
            return ToolResult::error("ELEMENT must not be empty");
        };
        match self.list.add(element, chrono::Local::now()).await {
            Ok(()) => ToolResult::text("To-Do Element Added."),
            Err(e) => ToolResult::error(format!("The to-do list could not be updated: {}", e)),
        }
    }
}

/// `_todo_list_delete(ELEMENT)`
pub struct TodoDeleteTool {
    list: Arc<TodoList>,
}

impl TodoDeleteTool {
    pub fn new(list: Arc<TodoList>) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Tool for TodoDeleteTool {
    fn name(&self) -> &str {
        "_todo_list_delete"
    }

    fn description(&self) -> &str {
        "Deletes every to-do line that contains ELEMENT."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new().required("ELEMENT", ParamType::String)
    }

    async fn execute(&self, arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        let element = arguments.str("ELEMENT").unwrap_or_default();
        match self.list.remove(element).await {
            Ok(0) => ToolResult::error(format!(
                "Element Deletion Failed. Nothing on the to-do list matches \"{}\". Please inform the user.",
                element
            )),
            Ok(_) => ToolResult::text("To-Do Element Deleted."),
            Err(e) => ToolResult::error(format!("The to-do list could not be updated: {}", e)),
        }
    }
}

/// `_todo_list_read()`
pub struct TodoReadTool {
    list: Arc<TodoList>,
}

impl TodoReadTool {
    pub fn new(list: Arc<TodoList>) -> Self {
        Self { list }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn name(&self) -> &str {
        "_todo_list_read"
    }

    fn description(&self) -> &str {
        "Reads the user's to-do list."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _arguments: ResolvedArguments, _cancel: CancellationToken) -> ToolResult {
        match self.list.read().await {
            Ok(list) if list.trim().is_empty() => ToolResult::text("To-Do: \"The list is empty.\"."),
            Ok(list) => ToolResult::text(format!("To-Do: \"{}\".", list.trim_end())),
            Err(e) => ToolResult::error(format!("The to-do list could not be read: {}", e)),
        }
    }
}
