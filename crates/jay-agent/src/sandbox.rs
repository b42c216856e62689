//! Isolated execution of generated code fragments

use async_trait::async_trait;
use regex::Regex;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;

const MAIN_HINT: &str = ". Ensure the \"main\" function is used to run the code.";
const RETURN_HINT: &str =
    ". Ensure that \"return\" is used inside a function, never use it outside a function.";

const RESULT_LINE: &str = "@@jay-result@@ ";
const ERROR_LINE: &str = "@@jay-error@@ ";

/// Runs inside the interpreter next to the fragment. The fragment gets a
/// fresh global scope and its stdout is swallowed; only the tagged lines
/// written here reach the parent.
const HARNESS: &str = r#"import contextlib
import io
import sys


def _limit_memory(megabytes):
    try:
        import resource
        limit = megabytes * 1024 * 1024
        resource.setrlimit(resource.RLIMIT_AS, (limit, limit))
    except Exception:
        pass


def _run(path):
    with open(path, encoding="utf-8") as handle:
        source = handle.read()
    scope = {"__name__": "__fragment__"}
    with contextlib.redirect_stdout(io.StringIO()):
        exec(compile(source, "<fragment>", "exec"), scope)
        entry = scope.get("main")
        if entry is None:
            raise NameError("name 'main' is not defined")
        return entry()


if __name__ == "__main__":
    megabytes = int(sys.argv[2]) if len(sys.argv) > 2 else 0
    if megabytes > 0:
        _limit_memory(megabytes)
    try:
        value = _run(sys.argv[1])
    except BaseException as exc:
        message = str(exc).replace("\n", " ")
        sys.stdout.write("@@jay-error@@ " + type(exc).__name__ + ": " + message + "\n")
    else:
        sys.stdout.write("@@jay-result@@ " + str(value).replace("\n", " ") + "\n")
"#;

static PYTHON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```python[^\n]*\n?(.*?)(?:```|\z)").expect("static regex"));

static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*\n(.*?)```").expect("static regex"));

static MAIN_DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^def\s+main\s*\(").expect("static regex"));

static INPUT_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^A-Za-z0-9_.])input\s*\(").expect("static regex"));

/// What running a fragment produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Text form of the value returned by `main()`
    Success(String),
    /// Error text, already carrying any corrective hint
    Failure(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ExecutionOutcome::Success(s) | ExecutionOutcome::Failure(s) => s,
        }
    }
}

/// Pull the code fragment out of a generation.
///
/// Takes the last ```` ```python ```` block (an unterminated final block
/// runs to the end of the text), then the last closed fence of any
/// language, then the whole text.
pub fn extract_code(generation: &str) -> String {
    if let Some(start) = generation.rfind("```python") {
        if let Some(caps) = PYTHON_FENCE.captures(&generation[start..]) {
            return caps[1].to_string();
        }
    }
    if let Some(caps) = ANY_FENCE.captures_iter(generation).last() {
        return caps[1].to_string();
    }
    generation.to_string()
}

/// Append the hint the model needs to fix common structural mistakes
pub fn corrective_hint(error: &str) -> String {
    let mut out = error.to_string();
    if error.contains("'main'") {
        out.push_str(MAIN_HINT);
    }
    if error.contains("'return' outside function") {
        out.push_str(RETURN_HINT);
    }
    out
}

/// Static check and cleanup before anything runs.
///
/// Drops lines that print, turns top-level `return` statements into
/// plain expressions, and refuses fragments that read input or have no
/// `main` entry point.
pub fn inspect(code: &str) -> std::result::Result<String, String> {
    let cleaned = code
        .lines()
        .filter(|line| !line.contains("print("))
        .map(|line| line.strip_prefix("return ").unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.trim().is_empty() {
        return Err("no code was found in the response. Begin the code with \"```python\"".into());
    }
    if INPUT_CALL.is_match(&cleaned) {
        return Err(
            "the code calls \"input\". The user will not input anything, never use \"input\""
                .into(),
        );
    }
    if !MAIN_DEF.is_match(&cleaned) {
        return Err(corrective_hint("NameError: name 'main' is not defined"));
    }
    Ok(cleaned)
}

/// Executes an inspected fragment and reports its `main()` value
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, code: &str) -> ExecutionOutcome;
}

/// Runs fragments in a separate Python process inside a scratch directory
#[derive(Debug, Clone)]
pub struct PythonRunner {
    pub interpreter: String,
    pub timeout: Duration,
    /// Address-space limit for the child; 0 disables it
    pub memory_limit_mb: u64,
}

impl Default for PythonRunner {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            timeout: Duration::from_secs(10),
            memory_limit_mb: 1024,
        }
    }
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>, timeout: Duration, memory_limit_mb: u64) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            memory_limit_mb,
        }
    }

    fn command(&self, dir: &std::path::Path) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg("-I")
            .arg(dir.join("harness.py"))
            .arg(dir.join("fragment.py"))
            .arg(self.memory_limit_mb.to_string())
            .current_dir(dir)
            .env_clear()
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
    }
}

#[async_trait]
impl CodeRunner for PythonRunner {
    async fn run(&self, code: &str) -> ExecutionOutcome {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionOutcome::Failure(format!(
                    "Failed to create sandbox directory: {}",
                    e
                ));
            }
        };
        if let Err(e) = tokio::fs::write(dir.path().join("fragment.py"), code).await {
            return ExecutionOutcome::Failure(format!("Failed to write code: {}", e));
        }
        if let Err(e) = tokio::fs::write(dir.path().join("harness.py"), HARNESS).await {
            return ExecutionOutcome::Failure(format!("Failed to write harness: {}", e));
        }

        let child = match self.command(dir.path()).spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionOutcome::Failure(format!(
                    "Failed to start {}: {}",
                    self.interpreter, e
                ));
            }
        };

        tracing::debug!(interpreter = %self.interpreter, "running code fragment");
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            // the child is killed when its future is dropped
            Err(_) => ExecutionOutcome::Failure(format!(
                "Code execution timed out after {}s",
                self.timeout.as_secs()
            )),
            Ok(Err(e)) => ExecutionOutcome::Failure(format!("Failed to run code: {}", e)),
            Ok(Ok(output)) => read_outcome(&output.stdout, &output.stderr, output.status.code()),
        }
    }
}

fn read_outcome(stdout: &[u8], stderr: &[u8], status: Option<i32>) -> ExecutionOutcome {
    let stdout = String::from_utf8_lossy(stdout);
    for line in stdout.lines().rev() {
        if let Some(value) = line.strip_prefix(RESULT_LINE) {
            return ExecutionOutcome::Success(value.trim().to_string());
        }
        if let Some(error) = line.strip_prefix(ERROR_LINE) {
            return ExecutionOutcome::Failure(corrective_hint(error.trim()));
        }
    }

    let stderr = String::from_utf8_lossy(stderr);
    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => ExecutionOutcome::Failure(corrective_hint(last.trim())),
        None => match status {
            Some(code) => {
                ExecutionOutcome::Failure(format!("Interpreter exited with status {}", code))
            }
            None => ExecutionOutcome::Failure("Interpreter was terminated by a signal".into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_extract_last_python_block() {
        let text = "First try:\n```python\ndef main():\n    return 1\n```\n\
                    Better:\n```python\ndef main():\n    return 2\n```\nDone.";
        assert_eq!(extract_code(text), "def main():\n    return 2\n");
    }

    #[test]
    fn test_extract_unterminated_block() {
        let text = "Plan.\n```python\ndef main():\n    return 6 / 2";
        assert_eq!(extract_code(text), "def main():\n    return 6 / 2");
    }

    #[test]
    fn test_extract_generic_fence_and_plain() {
        assert_eq!(extract_code("```\nx = 1\n```"), "x = 1\n");
        assert_eq!(extract_code("def main(): return 1"), "def main(): return 1");
    }

    #[test]
    fn test_inspect_cleans_code() {
        let code = "def main():\n    x = 6 / 2\n    print(x)\n    return x\nreturn main()";
        let cleaned = inspect(code).unwrap();
        assert_eq!(cleaned, "def main():\n    x = 6 / 2\n    return x\nmain()");
    }

    #[test]
    fn test_inspect_rejects_input_and_missing_main() {
        let err = inspect("def main():\n    return int(input())").unwrap_err();
        assert!(err.contains("input"));

        let err = inspect("x = 6 / 2").unwrap_err();
        assert!(err.ends_with("Ensure the \"main\" function is used to run the code."));

        // a method named input on an object is fine
        assert!(inspect("def main():\n    return reader.input(3)").is_ok());
    }

    #[test]
    fn test_corrective_hints() {
        assert_eq!(
            corrective_hint("NameError: name 'main' is not defined"),
            "NameError: name 'main' is not defined. Ensure the \"main\" function is used to run the code."
        );
        let hinted = corrective_hint("SyntaxError: 'return' outside function (<fragment>, line 3)");
        assert!(hinted.ends_with("never use it outside a function."));
        assert_eq!(corrective_hint("ZeroDivisionError: division by zero"), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_read_outcome() {
        assert_eq!(
            read_outcome(b"@@jay-result@@ 3.0\n", b"", Some(0)),
            ExecutionOutcome::Success("3.0".into())
        );
        assert_eq!(
            read_outcome(b"@@jay-error@@ ZeroDivisionError: division by zero\n", b"", Some(0)),
            ExecutionOutcome::Failure("ZeroDivisionError: division by zero".into())
        );
        assert_eq!(
            read_outcome(b"", b"Traceback\nMemoryError\n", Some(1)),
            ExecutionOutcome::Failure("MemoryError".into())
        );
        assert!(!read_outcome(b"", b"", Some(137)).is_success());
    }

    #[tokio::test]
    async fn test_python_runner_success() {
        if !python_available() {
            return;
        }
        let runner = PythonRunner::default();
        let outcome = runner
            .run("def main():\n    print('noise')\n    return 6 / 2\n")
            .await;
        assert_eq!(outcome, ExecutionOutcome::Success("3.0".into()));
    }

    #[tokio::test]
    async fn test_python_runner_error() {
        if !python_available() {
            return;
        }
        let outcome = PythonRunner::default()
            .run("def main():\n    return 1 / 0\n")
            .await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failure("ZeroDivisionError: division by zero".into())
        );
    }

    #[tokio::test]
    async fn test_python_runner_timeout() {
        if !python_available() {
            return;
        }
        let runner = PythonRunner::new("python3", Duration::from_secs(1), 0);
        let outcome = runner
            .run("def main():\n    while True:\n        pass\n")
            .await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Failure("Code execution timed out after 1s".into())
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let runner = PythonRunner::new("jay-no-such-python", Duration::from_secs(1), 0);
        let outcome = runner.run("def main():\n    return 1\n").await;
        assert!(outcome.text().starts_with("Failed to start jay-no-such-python"));
    }
}
