//! Configuration management
//!
//! This module handles loading, validation, and management of the Tera configuration.
//! Configuration is stored in TOML format at ~/.tera/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level
//! - **llm**: Model sources, retry and timeout budget
//! - **characters**: Personas; `default` always exists
//! - **memory**: Long-term memory switch, embedding and store sizing
//! - **sandbox**: Languages, limits and interpreters for code execution
//! - **chat**: Driver loop limits
//!
//! # Path Expansion
//!
//! `~` is expanded in `core.data_dir` and `sandbox.scratch_dir`; the data
//! directory is created if missing.
//!
//! # Examples
//!
//! ```no_run
//! use tera_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Active character: {}", config.characters.active);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tera_sdk::errors::EngineError;

use crate::agent::DriverSettings;
use crate::llm::RetryPolicy;
use crate::memory::Metric;
use crate::sandbox::{Language, SandboxPolicy};

pub mod registry;

/// Name of the character that always exists
pub const DEFAULT_CHARACTER: &str = "default";

/// Environment variable that overrides the active source's API key
pub const API_KEY_ENV: &str = "TERA_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Model sources
    #[serde(default)]
    pub llm: LLMConfig,

    /// Personas
    #[serde(default)]
    pub characters: CharactersConfig,

    /// Long-term memory
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Code execution
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Conversation loop
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Wire protocol spoken by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAI => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(EngineError::Config(format!(
                "Unknown provider kind '{}'. Must be one of: openai, ollama",
                other
            ))),
        }
    }
}

/// One model endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,

    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,

    pub base_url: String,

    pub model: String,

    /// Stored key; `TERA_API_KEY` wins when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl SourceConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    /// Key with everything but the last four characters hidden
    pub fn masked_api_key(&self) -> String {
        match &self.api_key {
            None => "(none)".to_string(),
            Some(key) => {
                let chars: Vec<char> = key.chars().collect();
                if chars.len() <= 4 {
                    "****".to_string()
                } else {
                    let tail: String = chars[chars.len() - 4..].iter().collect();
                    format!("****{}", tail)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Name of the source used for chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_source: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// A persona the assistant plays
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CharacterConfig {
    pub name: String,

    #[serde(default)]
    pub setting: String,
}

impl CharacterConfig {
    /// Persona text for the system message; empty for a setting-less character
    pub fn system_prompt(&self) -> String {
        if self.setting.trim().is_empty() {
            return String::new();
        }
        format!(
            "You are {}. Stay in character according to this setting:\n{}",
            self.name,
            self.setting.trim()
        )
    }

    /// First 30 characters of the setting, for listings
    pub fn preview(&self) -> String {
        const PREVIEW_CHARS: usize = 30;
        if self.setting.is_empty() {
            return "(no setting)".to_string();
        }
        let mut chars = self.setting.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{}…", head)
        } else {
            head
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharactersConfig {
    #[serde(default = "default_character_name")]
    pub active: String,

    #[serde(default)]
    pub entries: Vec<CharacterConfig>,
}

/// How memory text is embedded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingKind {
    /// Offline feature hashing
    #[serde(rename = "hashing")]
    Hashing,
    /// `/embeddings` endpoint of the active source
    #[serde(rename = "openai")]
    OpenAI,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Default for new sessions; each session stores its own flag
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Records kept per character before the oldest are evicted
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub metric: Metric,

    #[serde(default = "default_embedding_kind")]
    pub embedding: EmbeddingKind,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,

    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,

    /// Cap for stdout and stderr, each
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// Defaults to `<data_dir>/scratch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Interpreter for blocks tagged `bash`
    #[serde(default = "default_bash")]
    pub bash: String,

    /// Ask before running each block
    #[serde(default = "default_true")]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Ask the model for a greeting when a chat starts
    #[serde(default = "default_true")]
    pub greeting: bool,

    #[serde(default = "default_tool_output_chars")]
    pub tool_output_chars: usize,
}

// Default value functions

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.tera")
}

fn default_true() -> bool {
    true
}

fn default_provider_kind() -> ProviderKind {
    ProviderKind::OpenAI
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    4000
}

fn default_character_name() -> String {
    DEFAULT_CHARACTER.to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_memory_capacity() -> usize {
    500
}

fn default_embedding_kind() -> EmbeddingKind {
    EmbeddingKind::Hashing
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    256
}

fn default_languages() -> Vec<Language> {
    vec![Language::Shell, Language::Python]
}

fn default_sandbox_timeout_secs() -> u64 {
    10
}

fn default_max_output_bytes() -> usize {
    16 * 1024
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_bash() -> String {
    "bash".to_string()
}

fn default_max_rounds() -> u32 {
    4
}

fn default_context_tokens() -> usize {
    8000
}

fn default_tool_output_chars() -> usize {
    8000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            active_source: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            sources: Vec::new(),
        }
    }
}

impl Default for CharactersConfig {
    fn default() -> Self {
        Self {
            active: default_character_name(),
            entries: vec![CharacterConfig {
                name: DEFAULT_CHARACTER.to_string(),
                setting: String::new(),
            }],
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: default_top_k(),
            capacity: default_memory_capacity(),
            metric: Metric::default(),
            embedding: default_embedding_kind(),
            embedding_model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            timeout_secs: default_sandbox_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            scratch_dir: None,
            python: default_python(),
            shell: default_shell(),
            bash: default_bash(),
            confirm: true,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            context_tokens: default_context_tokens(),
            greeting: true,
            tool_output_chars: default_tool_output_chars(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.tera/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Same as [`Config::load_or_create`] for an explicit path
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        let mut config = Self::default_config();
        config.save(path)?;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Write the configuration back as TOML
    ///
    /// Paths are written as configured (after `~` expansion).
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get the default configuration file path (~/.tera/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".tera").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            characters: CharactersConfig::default(),
            memory: MemoryConfig::default(),
            sandbox: SandboxConfig::default(),
            chat: ChatConfig::default(),
        }
    }

    /// SQLite file holding sessions and memories
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("tera.db")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.sandbox
            .scratch_dir
            .clone()
            .unwrap_or_else(|| self.core.data_dir.join("scratch"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            initial_backoff: Duration::from_millis(self.llm.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.llm.max_backoff_ms),
            call_timeout: Duration::from_secs(self.llm.request_timeout_secs),
        }
    }

    pub fn sandbox_policy(&self) -> SandboxPolicy {
        let mut policy = SandboxPolicy::new(self.scratch_dir());
        policy.languages = self.sandbox.languages.iter().copied().collect();
        policy.timeout = Duration::from_secs(self.sandbox.timeout_secs);
        policy.max_output_bytes = self.sandbox.max_output_bytes;
        policy.python = self.sandbox.python.clone();
        policy.shell = self.sandbox.shell.clone();
        policy.bash = self.sandbox.bash.clone();
        policy
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            max_rounds: self.chat.max_rounds,
            top_k: self.memory.top_k,
            context_tokens: self.chat.context_tokens,
            tool_output_chars: self.chat.tool_output_chars,
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates levels, limits and names
    /// - Makes sure the default character exists
    /// - Expands ~ in paths
    /// - Creates the data directory if it doesn't exist
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.llm.max_attempts == 0 {
            return Err(EngineError::Config(
                "llm.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        for (i, source) in self.llm.sources.iter().enumerate() {
            registry::validate_name(&source.name)?;
            registry::validate_base_url(&source.base_url)?;
            if source.model.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "Source '{}' has no model",
                    source.name
                )));
            }
            if self.llm.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(EngineError::Config(format!(
                    "Duplicate source '{}'",
                    source.name
                )));
            }
        }
        if let Some(active) = &self.llm.active_source {
            if self.source(active).is_none() {
                return Err(EngineError::Config(format!(
                    "Active source '{}' is not defined",
                    active
                )));
            }
        }

        if self.character(DEFAULT_CHARACTER).is_none() {
            self.characters.entries.insert(
                0,
                CharacterConfig {
                    name: DEFAULT_CHARACTER.to_string(),
                    setting: String::new(),
                },
            );
        }
        for (i, character) in self.characters.entries.iter().enumerate() {
            registry::validate_name(&character.name)?;
            if self.characters.entries[..i]
                .iter()
                .any(|c| c.name == character.name)
            {
                return Err(EngineError::Config(format!(
                    "Duplicate character '{}'",
                    character.name
                )));
            }
        }
        if self.character(&self.characters.active).is_none() {
            return Err(EngineError::Config(format!(
                "Active character '{}' is not defined",
                self.characters.active
            )));
        }

        if self.memory.capacity == 0 {
            return Err(EngineError::Config(
                "memory.capacity must be at least 1".to_string(),
            ));
        }
        if self.memory.dimension == 0 {
            return Err(EngineError::Config(
                "memory.dimension must be at least 1".to_string(),
            ));
        }

        if self.sandbox.languages.is_empty() {
            return Err(EngineError::Config(
                "sandbox.languages must name at least one language".to_string(),
            ));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(EngineError::Config(
                "sandbox.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.sandbox.max_output_bytes == 0 {
            return Err(EngineError::Config(
                "sandbox.max_output_bytes must be at least 1".to_string(),
            ));
        }

        if self.chat.max_rounds == 0 {
            return Err(EngineError::Config(
                "chat.max_rounds must be at least 1".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        if let Some(scratch) = &self.sandbox.scratch_dir {
            let expanded = expand_path(scratch)?;
            if expanded == self.core.data_dir || self.core.data_dir.starts_with(&expanded) {
                return Err(EngineError::Config(
                    "sandbox.scratch_dir must not contain the data directory (it is wiped before every run)"
                        .to_string(),
                ));
            }
            self.sandbox.scratch_dir = Some(expanded);
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default_config();
        config.core.data_dir = dir.path().join("data");
        config
    }

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "warn");
        assert_eq!(config.characters.active, DEFAULT_CHARACTER);
        assert!(!config.memory.enabled);
        assert_eq!(config.chat.max_rounds, 4);
        assert_eq!(config.sandbox.timeout_secs, 10);
        assert!(config.llm.active_source.is_none());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = config_in(&dir);
        config.llm.sources.push(SourceConfig {
            name: "local".into(),
            kind: ProviderKind::Ollama,
            base_url: "http://localhost:11434".into(),
            model: "llama3.1:8b".into(),
            api_key: None,
        });
        config.llm.active_source = Some("local".into());
        config.save(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.llm.sources, config.llm.sources);
        assert_eq!(loaded.llm.active_source.as_deref(), Some("local"));
        assert!(loaded.core.data_dir.exists());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            format!("[core]\ndata_dir = {:?}\n", dir.path().join("d")),
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.memory.top_k, 5);
        assert_eq!(config.sandbox.languages, default_languages());
        assert!(config.character(DEFAULT_CHARACTER).is_some());
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.core.log_level = "loud".into();
        assert!(matches!(
            config.validate_and_process(),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_active_source_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.llm.active_source = Some("ghost".into());
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_default_character_is_restored() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.characters.entries.clear();
        config.validate_and_process().unwrap();
        assert!(config.character(DEFAULT_CHARACTER).is_some());
    }

    #[test]
    fn test_scratch_dir_must_not_hold_data() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.sandbox.scratch_dir = Some(dir.path().to_path_buf());
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.validate_and_process().unwrap();

        assert_eq!(config.scratch_dir(), dir.path().join("data").join("scratch"));
        assert_eq!(config.database_path(), dir.path().join("data").join("tera.db"));
        assert_eq!(config.retry_policy().call_timeout, Duration::from_secs(60));
        assert_eq!(config.sandbox_policy().languages.len(), 2);
        assert_eq!(config.driver_settings().max_rounds, 4);
    }

    #[test]
    fn test_character_prompt_and_preview() {
        let plain = CharacterConfig {
            name: "default".into(),
            setting: String::new(),
        };
        assert!(plain.system_prompt().is_empty());
        assert_eq!(plain.preview(), "(no setting)");

        let cat = CharacterConfig {
            name: "Mochi".into(),
            setting: "A sleepy cat who answers in short sentences and loves naps.".into(),
        };
        assert!(cat.system_prompt().starts_with("You are Mochi."));
        assert!(cat.preview().ends_with('…'));
        assert_eq!(cat.preview().chars().count(), 31);
    }

    #[test]
    fn test_masked_api_key() {
        let mut source = SourceConfig {
            name: "x".into(),
            kind: ProviderKind::OpenAI,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: Some("sk-abcdef1234".into()),
        };
        assert_eq!(source.masked_api_key(), "****1234");
        source.api_key = None;
        assert_eq!(source.masked_api_key(), "(none)");
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("OpenAI".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);
        assert!("claude".parse::<ProviderKind>().is_err());
    }
}
