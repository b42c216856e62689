//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default model when neither config nor flags pick one
pub const DEFAULT_MODEL: &str = "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo";

/// Configuration for jay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model to use
    pub model: Option<String>,
    /// Override the model's endpoint (`.../v1`)
    pub base_url: Option<String>,
    /// API key (alternative to environment variables)
    pub api_key: Option<String>,
    /// Stream generations as they arrive
    pub stream: bool,
    /// Maximum tokens per generation
    pub max_tokens: u32,
    /// Where transcripts are written
    pub transcripts_dir: Option<PathBuf>,
    /// Where `_save_note` writes notes
    pub notes_dir: Option<PathBuf>,
    /// The to-do list file
    pub todo_file: Option<PathBuf>,
    /// The only directory `_read_file_for_AI` may read from
    pub files_dir: Option<PathBuf>,
    /// Default tool execution limit
    pub tool_timeout_secs: u64,
    pub sandbox: SandboxSettings,
    pub generation: GenerationSettings,
}

/// Code execution settings for the calculator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub interpreter: String,
    pub timeout_secs: u64,
    /// 0 disables the limit
    pub memory_limit_mb: u64,
    /// Total executions per question, including the first
    pub max_attempts: u32,
}

/// Retry and timeout behavior for generations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            api_key: None,
            stream: true,
            max_tokens: 1024,
            transcripts_dir: None,
            notes_dir: None,
            todo_file: None,
            files_dir: None,
            tool_timeout_secs: 60,
            sandbox: SandboxSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 10,
            memory_limit_mb: 1024,
            max_attempts: 3,
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay_ms: 1000,
            timeout_secs: 120,
        }
    }
}

impl GenerationSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jay")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("JAY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Base directory for data jay writes
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jay")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or malformed file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config file");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            ..Default::default()
        };
        default_config.save_to(&path)?;
        Ok(path)
    }

    /// API key from config, then the provider's environment variable
    pub fn get_api_key(&self, env_var: Option<&str>) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        env_var.and_then(|var| std::env::var(var).ok())
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.transcripts_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("transcripts"))
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.notes_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("notes"))
    }

    pub fn todo_file(&self) -> PathBuf {
        self.todo_file
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("todo").join("Todo_List.txt"))
    }

    pub fn files_dir(&self) -> PathBuf {
        self.files_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("files"))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# jay configuration file
# Place at ~/.config/jay/config.toml (Linux), ~/Library/Application Support/jay/config.toml (Mac)
# or set JAY_CONFIG_PATH

# Model to use; any OpenAI-compatible /completions model that speaks the Llama 3 template
model = "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo"

# Endpoint override, e.g. a local llama.cpp server
# base_url = "http://127.0.0.1:8080/v1"

# API key (optional - TOGETHER_API_KEY / OPENAI_API_KEY are used otherwise)
# api_key = "..."

stream = true
max_tokens = 1024
tool_timeout_secs = 60

# Where transcripts, notes and the to-do list live (defaults under the local data dir)
# transcripts_dir = "~/jay/transcripts"
# notes_dir = "~/jay/notes"
# todo_file = "~/jay/Todo_List.txt"
# files_dir = "~/jay/files"

[sandbox]
interpreter = "python3"
timeout_secs = 10
memory_limit_mb = 1024
max_attempts = 3

[generation]
max_retries = 1
retry_delay_ms = 1000
timeout_secs = 120
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.toml"));
        assert!(cfg.stream);
        assert_eq!(cfg.sandbox.max_attempts, 3);
        assert_eq!(cfg.generation.max_retries, 1);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "model = \"llama3:8b-instruct-q8_0\"\nstream = false\n[sandbox]\ntimeout_secs = 3\n",
        )
        .unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.model.as_deref(), Some("llama3:8b-instruct-q8_0"));
        assert!(!cfg.stream);
        assert_eq!(cfg.sandbox.timeout_secs, 3);
        assert_eq!(cfg.sandbox.interpreter, "python3");
        assert_eq!(cfg.max_tokens, 1024);
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "model = [unterminated").unwrap();
        assert!(Config::load_from(&path).model.is_none());
    }

    #[test]
    fn test_example_config_parses() {
        let cfg: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(cfg.model.as_deref(), Some(DEFAULT_MODEL));
        assert_eq!(cfg.generation.timeout_secs, 120);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            notes_dir: Some(PathBuf::from("/tmp/notes")),
            ..Default::default()
        };
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).notes_dir(), PathBuf::from("/tmp/notes"));
    }

    #[test]
    fn test_configured_api_key_wins() {
        let cfg = Config {
            api_key: Some("from-config".into()),
            ..Default::default()
        };
        assert_eq!(cfg.get_api_key(Some("JAY_TEST_UNSET_VAR")).as_deref(), Some("from-config"));
        assert!(Config::default().get_api_key(None).is_none());
    }
}
