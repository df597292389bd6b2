//! Source and character registry
//!
//! Edits to the `[llm]` and `[characters]` sections. Each operation mutates
//! the in-memory `Config`; the caller saves it.

use regex::Regex;
use std::sync::OnceLock;
use tera_sdk::errors::EngineError;
use tracing::info;

use super::{CharacterConfig, Config, ProviderKind, SourceConfig, DEFAULT_CHARACTER};

static NAME_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Letters (any script), digits, `_`, `-` and `.`; 1 to 64 characters
pub fn validate_name(name: &str) -> Result<(), EngineError> {
    let pattern = NAME_PATTERN.get_or_init(|| Regex::new(r"^[\w.\-]{1,64}$").ok());
    let valid = match pattern {
        Some(re) => re.is_match(name),
        None => !name.is_empty(),
    };
    if valid {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "Invalid name '{}': use letters, digits, '_', '-' or '.' (at most 64)",
            name
        )))
    }
}

pub fn validate_base_url(url: &str) -> Result<(), EngineError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "Invalid base URL '{}': must start with http:// or https://",
            url
        )))
    }
}

impl Config {
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.llm.sources.iter().find(|s| s.name == name)
    }

    pub fn active_source(&self) -> Result<&SourceConfig, EngineError> {
        let name = self.llm.active_source.as_deref().ok_or_else(|| {
            EngineError::Config(
                "No active source. Add one with `tera source add <name> --base-url <url> --model <model>`"
                    .to_string(),
            )
        })?;
        self.source(name)
            .ok_or_else(|| EngineError::Config(format!("Active source '{}' is not defined", name)))
    }

    /// Add or replace a source. The first source added becomes active.
    pub fn add_source(
        &mut self,
        name: &str,
        kind: ProviderKind,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Result<&SourceConfig, EngineError> {
        validate_name(name)?;
        validate_base_url(base_url)?;
        if model.trim().is_empty() {
            return Err(EngineError::Config("Model must not be empty".to_string()));
        }

        let source = SourceConfig {
            name: name.to_string(),
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        };

        let idx = match self.llm.sources.iter().position(|s| s.name == name) {
            Some(idx) => {
                info!("Replacing source '{}'", name);
                self.llm.sources[idx] = source;
                idx
            }
            None => {
                info!("Adding source '{}'", name);
                self.llm.sources.push(source);
                self.llm.sources.len() - 1
            }
        };
        if self.llm.active_source.is_none() {
            self.llm.active_source = Some(name.to_string());
        }
        Ok(&self.llm.sources[idx])
    }

    pub fn use_source(&mut self, name: &str) -> Result<&SourceConfig, EngineError> {
        let idx = self
            .llm
            .sources
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EngineError::Config(format!("Source '{}' not found", name)))?;
        self.llm.active_source = Some(name.to_string());
        Ok(&self.llm.sources[idx])
    }

    /// Remove a source; if it was active, the first remaining one takes over
    pub fn remove_source(&mut self, name: &str) -> Result<(), EngineError> {
        let before = self.llm.sources.len();
        self.llm.sources.retain(|s| s.name != name);
        if self.llm.sources.len() == before {
            return Err(EngineError::Config(format!("Source '{}' not found", name)));
        }
        if self.llm.active_source.as_deref() == Some(name) {
            self.llm.active_source = self.llm.sources.first().map(|s| s.name.clone());
        }
        info!("Removed source '{}'", name);
        Ok(())
    }

    pub fn character(&self, name: &str) -> Option<&CharacterConfig> {
        self.characters.entries.iter().find(|c| c.name == name)
    }

    /// The active character, or `default` if the active one is gone
    pub fn active_character(&self) -> CharacterConfig {
        self.character(&self.characters.active)
            .or_else(|| self.character(DEFAULT_CHARACTER))
            .cloned()
            .unwrap_or_else(|| CharacterConfig {
                name: DEFAULT_CHARACTER.to_string(),
                setting: String::new(),
            })
    }

    /// Add a character or update its setting
    pub fn add_character(&mut self, name: &str, setting: &str) -> Result<(), EngineError> {
        validate_name(name)?;
        match self.characters.entries.iter_mut().find(|c| c.name == name) {
            Some(existing) => {
                info!("Updating character '{}'", name);
                existing.setting = setting.to_string();
            }
            None => {
                info!("Adding character '{}'", name);
                self.characters.entries.push(CharacterConfig {
                    name: name.to_string(),
                    setting: setting.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn use_character(&mut self, name: &str) -> Result<(), EngineError> {
        if self.character(name).is_none() {
            return Err(EngineError::Config(format!("Character '{}' not found", name)));
        }
        self.characters.active = name.to_string();
        Ok(())
    }

    /// Remove a character; `default` is protected. If it was active,
    /// `default` becomes active.
    pub fn remove_character(&mut self, name: &str) -> Result<(), EngineError> {
        if name == DEFAULT_CHARACTER {
            return Err(EngineError::Config(
                "The default character cannot be removed".to_string(),
            ));
        }
        let before = self.characters.entries.len();
        self.characters.entries.retain(|c| c.name != name);
        if self.characters.entries.len() == before {
            return Err(EngineError::Config(format!("Character '{}' not found", name)));
        }
        if self.characters.active == name {
            self.characters.active = DEFAULT_CHARACTER.to_string();
        }
        info!("Removed character '{}'", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("work-gpt").is_ok());
        assert!(validate_name("猫娘").is_ok());
        assert!(validate_name("v1.2_x").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_first_source_becomes_active() {
        let mut config = Config::default_config();
        config
            .add_source("a", ProviderKind::OpenAI, "https://x.test/v1/", "m", None)
            .unwrap();
        config
            .add_source("b", ProviderKind::Ollama, "http://localhost:11434", "llama", None)
            .unwrap();
        assert_eq!(config.active_source().unwrap().name, "a");
        assert_eq!(config.source("a").unwrap().base_url, "https://x.test/v1");
    }

    #[test]
    fn test_add_source_replaces_same_name() {
        let mut config = Config::default_config();
        config
            .add_source("a", ProviderKind::OpenAI, "https://x.test", "m1", None)
            .unwrap();
        config
            .add_source("a", ProviderKind::OpenAI, "https://x.test", "m2", None)
            .unwrap();
        assert_eq!(config.llm.sources.len(), 1);
        assert_eq!(config.source("a").unwrap().model, "m2");
    }

    #[test]
    fn test_source_validation() {
        let mut config = Config::default_config();
        assert!(config
            .add_source("a", ProviderKind::OpenAI, "ftp://x", "m", None)
            .is_err());
        assert!(config
            .add_source("a", ProviderKind::OpenAI, "https://x", " ", None)
            .is_err());
        assert!(config.active_source().is_err());
    }

    #[test]
    fn test_remove_active_source_promotes_next() {
        let mut config = Config::default_config();
        config
            .add_source("a", ProviderKind::OpenAI, "https://a.test", "m", None)
            .unwrap();
        config
            .add_source("b", ProviderKind::OpenAI, "https://b.test", "m", None)
            .unwrap();
        config.remove_source("a").unwrap();
        assert_eq!(config.llm.active_source.as_deref(), Some("b"));
        config.remove_source("b").unwrap();
        assert!(config.llm.active_source.is_none());
        assert!(config.remove_source("b").is_err());
    }

    #[test]
    fn test_use_source() {
        let mut config = Config::default_config();
        config
            .add_source("a", ProviderKind::OpenAI, "https://a.test", "m", None)
            .unwrap();
        config
            .add_source("b", ProviderKind::OpenAI, "https://b.test", "m", None)
            .unwrap();
        config.use_source("b").unwrap();
        assert_eq!(config.active_source().unwrap().name, "b");
        assert!(config.use_source("c").is_err());
    }

    #[test]
    fn test_character_lifecycle() {
        let mut config = Config::default_config();
        config.add_character("mochi", "A sleepy cat").unwrap();
        config.use_character("mochi").unwrap();
        assert_eq!(config.active_character().name, "mochi");

        config.add_character("mochi", "An awake cat").unwrap();
        assert_eq!(config.active_character().setting, "An awake cat");

        config.remove_character("mochi").unwrap();
        assert_eq!(config.characters.active, DEFAULT_CHARACTER);
        assert!(config.use_character("mochi").is_err());
    }

    #[test]
    fn test_default_character_is_protected() {
        let mut config = Config::default_config();
        assert!(config.remove_character(DEFAULT_CHARACTER).is_err());
        assert!(config.character(DEFAULT_CHARACTER).is_some());
    }
}
