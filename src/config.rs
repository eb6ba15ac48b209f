use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backend used for the persistent event log.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Append-only JSONL file. The default; trivially inspectable.
    #[default]
    File,
    /// SQLite database with an indexed event table.
    Sqlite,
}

/// Connection settings for the local model endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen3".to_string()
}

/// Runtime configuration, loaded from a YAML file.
///
/// Every field has a default so an empty (or absent) config file yields a
/// working runtime under the platform data directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Root directory for the event log, structured logs, and state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding module manifests. Relative paths resolve against
    /// `data_dir`.
    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,
    #[serde(default)]
    pub store: StoreBackend,
    /// Maximum follow-up depth before cascaded dispatches are dropped.
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: u32,
    /// Number of recent chat messages handed to the model on each turn.
    #[serde(default = "default_chat_context")]
    pub chat_context: usize,
    /// Watch `modules_dir` and reload manifests on change.
    #[serde(default = "default_hot_reload")]
    pub hot_reload: bool,
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
}

fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}

fn default_max_cascade_depth() -> u32 {
    16
}

fn default_chat_context() -> usize {
    10
}

fn default_hot_reload() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            modules_dir: default_modules_dir(),
            store: StoreBackend::File,
            max_cascade_depth: default_max_cascade_depth(),
            chat_context: default_chat_context(),
            hot_reload: default_hot_reload(),
            llm: LlmConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from `path`. A missing file yields the defaults;
    /// a present but unparseable file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file as YAML: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_cascade_depth == 0 {
            anyhow::bail!("max_cascade_depth must be at least 1");
        }
        if self.chat_context == 0 {
            anyhow::bail!("chat_context must be at least 1");
        }
        Ok(())
    }

    /// Path of the JSONL event log.
    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join("events.jsonl")
    }

    /// Path of the SQLite event database.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("events.db")
    }

    /// Directory for structured JSONL logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Absolute module manifest directory.
    pub fn resolved_modules_dir(&self) -> PathBuf {
        if self.modules_dir.is_absolute() {
            self.modules_dir.clone()
        } else {
            self.data_dir.join(&self.modules_dir)
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
