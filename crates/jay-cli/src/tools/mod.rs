//! Built-in tools for the assistant

mod files;
mod notes;
mod time;
mod timer;
mod todo;

pub use files::ReadFileTool;
pub use notes::SaveNoteTool;
pub use time::TimeTool;
pub use timer::{Notifier, TerminalNotifier, TimerTool};
pub use todo::{TodoAddTool, TodoDeleteTool, TodoList, TodoReadTool};
