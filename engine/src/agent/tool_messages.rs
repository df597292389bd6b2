//! Rendering of tool messages
//!
//! Every fenced block the driver handles leaves exactly one tool message in
//! the transcript. The first line is a bracketed header the model can rely on:
//!
//! ```text
//! [block 1 · python · exit 0 · 12 ms]
//! [block 2 · shell · killed after 10s]
//! [block 3 · ruby · not run]
//! [block 4 · malformed]
//! ```
//!
//! Numbers in headers are 1-based; `BlockRef::block_index` stays 0-based.

use std::time::Duration;

use tera_sdk::types::{CodeBlock, ExecutionResult};

use crate::response_parser::{FenceDefect, MalformedFence};

const NO_OUTPUT: &str = "(no output)";
const TRUNCATED_NOTE: &str = "[output truncated]";

fn language_label(block: &CodeBlock) -> &str {
    block.language.as_deref().unwrap_or("text")
}

/// Output of a block that ran to completion
pub fn execution_report(block: &CodeBlock, result: &ExecutionResult, max_chars: usize) -> String {
    let header = format!(
        "[block {} · {} · {} · {} ms]",
        block.index + 1,
        language_label(block),
        result.status,
        result.duration.as_millis()
    );
    with_output(header, result, max_chars)
}

// Whole seconds read as "10s"; anything finer as milliseconds
fn limit_label(limit: Duration) -> String {
    if limit.subsec_nanos() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{} ms", limit.as_millis())
    }
}

/// Partial output of a block killed at its time limit
pub fn timeout_report(
    block: &CodeBlock,
    limit: Duration,
    partial: &ExecutionResult,
    max_chars: usize,
) -> String {
    let header = format!(
        "[block {} · {} · killed after {}]\nThe program exceeded its time limit and was stopped.",
        block.index + 1,
        language_label(block),
        limit_label(limit)
    );
    with_output(header, partial, max_chars)
}

pub fn unsupported_report(block: &CodeBlock, supported: &[&str]) -> String {
    format!(
        "[block {} · {} · not run]\nLanguage \"{}\" cannot be executed here. Supported: {}.",
        block.index + 1,
        language_label(block),
        language_label(block),
        supported.join(", ")
    )
}

pub fn declined_report(block: &CodeBlock) -> String {
    format!(
        "[block {} · {} · not run]\nThe user declined to run this block.",
        block.index + 1,
        language_label(block)
    )
}

pub fn spawn_failure_report(block: &CodeBlock, reason: &str) -> String {
    format!(
        "[block {} · {} · not run]\nThe interpreter could not be started: {}",
        block.index + 1,
        language_label(block),
        reason
    )
}

pub fn malformed_report(fence: &MalformedFence) -> String {
    let defect = match fence.defect {
        FenceDefect::Unterminated => "never closed",
        FenceDefect::Interrupted => "interrupted by another fence",
    };
    format!(
        "[block {} · malformed]\nThe code fence opened on line {} was {}, so it was not run.",
        fence.index + 1,
        fence.line,
        defect
    )
}

fn with_output(header: String, result: &ExecutionResult, max_chars: usize) -> String {
    let mut body = String::new();
    if !result.stdout.is_empty() {
        body.push_str(result.stdout.trim_end_matches('\n'));
    }
    if !result.stderr.is_empty() {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("STDERR:\n");
        body.push_str(result.stderr.trim_end_matches('\n'));
    }
    if body.is_empty() {
        body.push_str(NO_OUTPUT);
    }

    let (body, clipped) = clip_chars(&body, max_chars);
    let mut out = header;
    out.push('\n');
    out.push_str(body);
    if clipped || result.truncated {
        out.push('\n');
        out.push_str(TRUNCATED_NOTE);
    }
    out
}

/// Keep at most `max` characters, cutting on a char boundary
fn clip_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((cut, _)) => (&text[..cut], true),
        None => (text, false),
    }
}
