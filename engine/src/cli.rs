//! CLI interface for Tera
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ProviderKind;

/// Tera terminal assistant
///
/// Chat with a language model in your terminal. Code blocks the model writes
/// are run locally and their output is fed back to it.
#[derive(Parser, Debug)]
#[command(name = "tera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format (listing commands)
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Defaults to `chat`
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start or resume a conversation with the active character
    Chat {
        /// Discard the stored conversation and start fresh
        #[arg(long)]
        new: bool,

        /// Disable long-term memory for this session
        #[arg(long)]
        no_memory: bool,
    },

    /// Manage model sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage characters
    Character {
        #[command(subcommand)]
        action: CharacterAction,
    },

    /// Manage long-term memory of the active character
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SourceAction {
    /// Add (or replace) a source
    Add {
        name: String,

        /// API base URL, e.g. https://api.openai.com/v1
        #[arg(long)]
        base_url: String,

        #[arg(long)]
        model: String,

        /// Stored in the config file; TERA_API_KEY overrides it
        #[arg(long)]
        api_key: Option<String>,

        #[arg(long, default_value = "openai")]
        kind: ProviderKind,
    },

    /// Make a source active
    Use { name: String },

    /// List sources
    Show,

    /// Delete a source
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum CharacterAction {
    /// Add a character, or update its setting
    Add {
        name: String,

        /// Persona description
        #[arg(long, default_value = "")]
        setting: String,
    },

    /// Make a character active
    Use { name: String },

    /// List characters, or show one in full
    Show { name: Option<String> },

    /// Delete a character (the default character is protected)
    Delete { name: String },
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum MemoryAction {
    /// Enable memory for the active character's session
    On,

    /// Disable memory for the active character's session
    Off,

    /// List stored memories
    Show,

    /// Delete all stored memories
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_chat() {
        let cli = Cli::try_parse_from(["tera"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_chat_flags() {
        let cli = Cli::try_parse_from(["tera", "chat", "--new", "--no-memory"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Chat {
                new: true,
                no_memory: true
            })
        ));
    }

    #[test]
    fn test_source_add() {
        let cli = Cli::try_parse_from([
            "tera",
            "source",
            "add",
            "local",
            "--base-url",
            "http://localhost:11434",
            "--model",
            "llama3.1:8b",
            "--kind",
            "ollama",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Source {
                action: SourceAction::Add { name, kind, api_key, .. },
            }) => {
                assert_eq!(name, "local");
                assert_eq!(kind, ProviderKind::Ollama);
                assert!(api_key.is_none());
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tera", "memory", "show", "--json", "--log", "debug"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
    }
}
