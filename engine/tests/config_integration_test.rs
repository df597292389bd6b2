//! Integration tests for configuration management
//!
//! These tests go through real files: parsing, defaults, validation and
//! registry edits saved and read back.

use tempfile::TempDir;
use tera_engine::config::{Config, ProviderKind, DEFAULT_CHARACTER};
use tera_engine::memory::Metric;
use tera_engine::sandbox::Language;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let data_dir = dir.path().join("data");
    let contents = format!(
        "[core]\nlog_level = \"info\"\ndata_dir = \"{}\"\n\n{}",
        data_dir.display(),
        body
    );
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_toml_parsing() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[llm]
active_source = "local"
max_attempts = 5

[[llm.sources]]
name = "local"
kind = "ollama"
base_url = "http://localhost:11434"
model = "llama3.1:8b"

[[llm.sources]]
name = "work"
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
api_key = "sk-test"

[characters]
active = "mochi"

[[characters.entries]]
name = "mochi"
setting = "A sleepy cat who answers in short sentences."

[memory]
enabled = true
top_k = 3
metric = "inner_product"

[sandbox]
languages = ["shell"]
timeout_secs = 3

[chat]
max_rounds = 6
greeting = false
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.core.log_level, "info");
    assert!(config.core.data_dir.exists(), "data dir is created on load");

    let active = config.active_source().unwrap();
    assert_eq!(active.name, "local");
    assert_eq!(active.kind, ProviderKind::Ollama);
    assert_eq!(config.source("work").unwrap().kind, ProviderKind::OpenAI);
    assert_eq!(config.retry_policy().max_attempts, 5);

    assert_eq!(config.active_character().name, "mochi");
    assert!(
        config.character(DEFAULT_CHARACTER).is_some(),
        "default character is always present"
    );

    assert!(config.memory.enabled);
    assert_eq!(config.memory.metric, Metric::InnerProduct);
    assert_eq!(config.driver_settings().top_k, 3);
    assert_eq!(config.driver_settings().max_rounds, 6);

    let policy = config.sandbox_policy();
    assert!(policy.languages.contains(&Language::Shell));
    assert!(!policy.languages.contains(&Language::Python));
    assert_eq!(policy.timeout.as_secs(), 3);
    assert_eq!(policy.scratch_dir, config.core.data_dir.join("scratch"));
    assert_eq!(config.database_path(), config.core.data_dir.join("tera.db"));
}

#[test]
fn test_minimal_config_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = Config::load_from_path(&path).unwrap();
    assert!(config.llm.sources.is_empty());
    assert!(config.active_source().is_err());
    assert_eq!(config.characters.active, DEFAULT_CHARACTER);
    assert_eq!(config.driver_settings().max_rounds, 4);
    assert_eq!(config.memory.top_k, 5);
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();

    let path = write_config(&dir, "[chat]\nmax_rounds = 0\n");
    assert!(Config::load_from_path(&path).is_err());

    let path = write_config(
        &dir,
        "[[llm.sources]]\nname = \"bad name\"\nbase_url = \"http://x\"\nmodel = \"m\"\n",
    );
    assert!(Config::load_from_path(&path).is_err());

    let path = write_config(
        &dir,
        "[[llm.sources]]\nname = \"x\"\nbase_url = \"localhost:11434\"\nmodel = \"m\"\n",
    );
    assert!(Config::load_from_path(&path).is_err());

    let path = write_config(&dir, "[characters]\nactive = \"ghost\"\n");
    assert!(Config::load_from_path(&path).is_err());
}

#[test]
fn test_unparseable_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "this is [not toml").unwrap();
    assert!(Config::load_from_path(&path).is_err());
}

#[test]
fn test_registry_edits_survive_save() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    let mut config = Config::load_from_path(&path).unwrap();

    config
        .add_source(
            "local",
            ProviderKind::Ollama,
            "http://localhost:11434/",
            "llama3.1:8b",
            None,
        )
        .unwrap();
    config
        .add_source(
            "work",
            ProviderKind::OpenAI,
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            Some("sk-test".to_string()),
        )
        .unwrap();
    config.use_source("work").unwrap();
    config.add_character("mochi", "A sleepy cat").unwrap();
    config.use_character("mochi").unwrap();
    config.save(&path).unwrap();

    let reloaded = Config::load_from_path(&path).unwrap();
    assert_eq!(reloaded.active_source().unwrap().name, "work");
    assert_eq!(
        reloaded.source("local").unwrap().base_url,
        "http://localhost:11434"
    );
    assert_eq!(reloaded.active_character().setting, "A sleepy cat");

    let mut config = reloaded;
    config.remove_source("work").unwrap();
    config.remove_character("mochi").unwrap();
    config.save(&path).unwrap();

    let reloaded = Config::load_from_path(&path).unwrap();
    assert_eq!(reloaded.active_source().unwrap().name, "local");
    assert_eq!(reloaded.characters.active, DEFAULT_CHARACTER);
}

#[test]
fn test_load_or_create_reads_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[chat]\nmax_rounds = 2\n");

    let config = Config::load_or_create_at(&path).unwrap();
    assert_eq!(config.chat.max_rounds, 2);
}
