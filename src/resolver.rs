//! Launch-time command validation and rewriting.
//!
//! `resolve` checks the preconditions of a launch (working directory present, command
//! file present when named by path) and applies one best-effort rewrite: a batch script
//! named as the first token is replaced by its effective lines joined with `&&`, so
//! interactive `pause` prompts and script-relative paths cannot trip up the launch.

use std::path::Path;

use tracing::debug;

use crate::error::LaunchRejection;

const SCRIPT_EXTENSIONS: [&str; 2] = ["bat", "cmd"];
const SEQUENTIAL_AND: &str = " && ";

/// A command line accepted for spawning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// The command line to hand to the shell.
    pub command: String,
    /// The script token that was inlined, if any.
    pub unwrapped_from: Option<String>,
}

/// Validates `command` against `cwd` and returns the line to execute.
pub fn resolve(command: &str, cwd: &Path) -> Result<ResolvedCommand, LaunchRejection> {
    if !cwd.is_dir() {
        return Err(LaunchRejection::WorkingDirectoryMissing(cwd.to_path_buf()));
    }
    let Some(first) = first_token(command) else {
        return Err(LaunchRejection::EmptyCommand);
    };

    // Bare names are left to the shell's PATH lookup.
    if has_path_separator(first) {
        let path = cwd.join(first);
        if !path.exists() {
            return Err(LaunchRejection::CommandFileMissing(path));
        }
    }

    if is_batch_script(first) {
        if let Some(inline) = unwrap_script(&cwd.join(first)) {
            return Ok(ResolvedCommand {
                command: inline,
                unwrapped_from: Some(first.to_string()),
            });
        }
    }

    Ok(ResolvedCommand {
        command: command.to_string(),
        unwrapped_from: None,
    })
}

fn first_token(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}

fn has_path_separator(token: &str) -> bool {
    token.contains('/') || token.contains('\\')
}

fn is_batch_script(token: &str) -> bool {
    Path::new(token)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SCRIPT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

// Any read failure or an empty result falls back to the original command.
fn unwrap_script(path: &Path) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "script not readable, running as-is");
            return None;
        }
    };
    let content = String::from_utf8_lossy(&bytes);
    let inline = inline_script(&content);
    if inline.is_empty() {
        None
    } else {
        Some(inline)
    }
}

/// Joins the effective lines of a batch script into a single command line.
pub fn inline_script(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| is_effective_line(line))
        .collect::<Vec<_>>()
        .join(SEQUENTIAL_AND)
}

fn is_effective_line(line: &str) -> bool {
    if line.is_empty() || line.starts_with("::") {
        return false;
    }
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("pause") || lower.starts_with("@echo off") {
        return false;
    }
    !is_rem_comment(line)
}

fn is_rem_comment(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("rem").or_else(|| line.strip_prefix("REM")) else {
        return false;
    };
    rest.is_empty() || rest.starts_with(char::is_whitespace)
}
