//! Code Execution Sandbox
//!
//! Runs one code block per call in a freshly spawned interpreter process.
//!
//! # Isolation
//!
//! This is resource isolation, not a security boundary:
//! - Language allow-list (shell and python by default)
//! - Fresh process per call, in its own process group
//! - Cleared environment, stdin closed
//! - Working directory is a scratch dir that is wiped before every run
//! - Wall-clock timeout and per-stream output caps
//!
//! Code is run with the user's privileges. Only trusted users should be
//! allowed to drive a session that executes code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use tera_sdk::types::{CodeBlock, ExecutionResult};

use crate::cancel::CancelToken;

pub mod process;

use process::{run_script, ScriptCommand};

/// Errors returned by a sandbox run
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Execution timed out after {limit:?}")]
    Timeout {
        limit: Duration,
        /// Output gathered before the kill
        partial: ExecutionResult,
    },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpreters the sandbox knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Shell,
    Python,
}

impl Language {
    /// Map a fence tag to a language. Tags are matched case-insensitively.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "sh" | "bash" | "shell" => Some(Language::Shell),
            "python" | "py" | "python3" => Some(Language::Python),
            _ => None,
        }
    }

    /// Guess the language of an untagged block: python when it opens with
    /// an import or defines a function, shell otherwise
    pub fn detect(source: &str) -> Self {
        if source.trim_start().starts_with("import ") || source.contains("def ") {
            Language::Python
        } else {
            Language::Shell
        }
    }

    fn script_name(&self) -> &'static str {
        match self {
            Language::Shell => "snippet.sh",
            Language::Python => "snippet.py",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Language::Shell => write!(f, "shell"),
            Language::Python => write!(f, "python"),
        }
    }
}

/// Limits and interpreters for a sandbox instance
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    pub languages: HashSet<Language>,
    pub timeout: Duration,
    /// Cap applied to stdout and stderr separately
    pub max_output_bytes: usize,
    pub scratch_dir: PathBuf,
    pub shell: String,
    /// Used for blocks tagged `bash`; missing bash falls back to `shell`
    pub bash: String,
    pub python: String,
}

impl SandboxPolicy {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            languages: [Language::Shell, Language::Python].into_iter().collect(),
            timeout: Duration::from_secs(10),
            max_output_bytes: 16 * 1024,
            scratch_dir: scratch_dir.into(),
            shell: "sh".to_string(),
            bash: "bash".to_string(),
            python: "python3".to_string(),
        }
    }

    fn interpreter(&self, language: Language, tag: &str) -> &str {
        match language {
            Language::Shell if tag.eq_ignore_ascii_case("bash") => &self.bash,
            Language::Shell => &self.shell,
            Language::Python => &self.python,
        }
    }
}

/// Anything that can execute a code block for the driver
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Names of the languages this runner accepts, for messages
    fn supported_languages(&self) -> Vec<String>;

    /// Whether a fence tag would be accepted by `run`
    fn supports(&self, tag: &str) -> bool;

    /// Run one block. Must terminate the underlying process on every path.
    async fn run(
        &self,
        block: &CodeBlock,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

/// Process-based runner
#[derive(Debug)]
pub struct Sandbox {
    policy: SandboxPolicy,
    // The scratch dir is shared, so runs on one sandbox never overlap.
    run_lock: Mutex<()>,
}

impl Sandbox {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self {
            policy,
            run_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Resolve the block's tag against the allow-list
    pub fn resolve_language(&self, block: &CodeBlock) -> Result<Language, SandboxError> {
        let tag = block.language.as_deref().unwrap_or("");
        match Language::from_tag(tag) {
            Some(lang) if self.policy.languages.contains(&lang) => Ok(lang),
            _ => Err(SandboxError::UnsupportedLanguage(tag.to_string())),
        }
    }

    async fn reset_scratch(&self) -> Result<(), SandboxError> {
        let dir = &self.policy.scratch_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SandboxError::Io(e)),
        }
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    fn environment(&self, scratch: &Path) -> BTreeMap<String, String> {
        let scratch = scratch.display().to_string();
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_string(),
            std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
        );
        env.insert("HOME".to_string(), scratch.clone());
        env.insert("TMPDIR".to_string(), scratch);
        env.insert("LANG".to_string(), "C.UTF-8".to_string());
        env.insert("PYTHONIOENCODING".to_string(), "utf-8".to_string());
        env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());
        env
    }
}

#[async_trait]
impl CodeRunner for Sandbox {
    fn supported_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policy.languages.iter().map(|l| l.to_string()).collect();
        names.sort();
        names
    }

    fn supports(&self, tag: &str) -> bool {
        Language::from_tag(tag).is_some_and(|lang| self.policy.languages.contains(&lang))
    }

    async fn run(
        &self,
        block: &CodeBlock,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let language = match self.resolve_language(block) {
            Ok(lang) => lang,
            Err(e) => {
                warn!("Rejected code block {}: {}", block.index, e);
                return Err(e);
            }
        };

        let _guard = self.run_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        self.reset_scratch().await?;
        let scratch = self.policy.scratch_dir.clone();
        let script = scratch.join(language.script_name());
        tokio::fs::write(&script, &block.source).await?;

        info!(
            "Executing {} block {} ({} bytes)",
            language,
            block.index,
            block.source.len()
        );

        let tag = block.language.as_deref().unwrap_or_default();
        let program = self.policy.interpreter(language, tag);
        let env = self.environment(&scratch);
        let command = |program: &str| ScriptCommand {
            program: program.to_string(),
            args: vec![script.display().to_string()],
            env: env.clone(),
            cwd: scratch.clone(),
            timeout: self.policy.timeout,
            max_output_bytes: self.policy.max_output_bytes,
        };

        let mut outcome = run_script(command(program), cancel).await;
        if program != self.policy.shell && language == Language::Shell {
            if let Err(SandboxError::Spawn { source, .. }) = &outcome {
                if source.kind() == std::io::ErrorKind::NotFound {
                    warn!(
                        "{} not found, running block {} with {}",
                        program, block.index, self.policy.shell
                    );
                    outcome = run_script(command(&self.policy.shell), cancel).await;
                }
            }
        }
        match &outcome {
            Ok(result) => info!(
                "Block {} finished: {} in {:?}",
                block.index, result.status, result.duration
            ),
            Err(SandboxError::Timeout { limit, .. }) => {
                warn!("Block {} killed after {:?}", block.index, limit)
            }
            Err(e) => warn!("Block {} failed: {}", block.index, e),
        }
        outcome
    }
}
