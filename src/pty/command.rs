//! Command-line handling for spawned children.
//!
//! The native agent takes an executable path plus a single command-line
//! string, so argument vectors are flattened with the Windows CRT quoting
//! rules and split back with the matching parser where an argv is needed.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::SpawnError;

/// The command to run, either pre-split or as one command-line string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Line(String),
    Argv(Vec<String>),
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        Command::Line(line.to_string())
    }
}

impl From<String> for Command {
    fn from(line: String) -> Self {
        Command::Line(line)
    }
}

impl From<Vec<String>> for Command {
    fn from(argv: Vec<String>) -> Self {
        Command::Argv(argv)
    }
}

impl From<&[&str]> for Command {
    fn from(argv: &[&str]) -> Self {
        Command::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

/// A command resolved against the search path, ready for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: PathBuf,
    /// Arguments after the program; `None` for a bare program.
    pub command_line: Option<String>,
}

impl Command {
    /// Validate, tokenize and resolve the command.
    ///
    /// `path_var` is the `PATH` of the child's environment. Relative program
    /// paths are resolved against `cwd`, the current directory when unset.
    pub fn prepare(
        &self,
        path_var: Option<&OsStr>,
        cwd: Option<&Path>,
    ) -> Result<PreparedCommand, SpawnError> {
        let (first, rest) = match self {
            Command::Line(line) => {
                let tokens = split_command(line)?;
                let Some((first, rest)) = tokens.split_first() else {
                    return Err(SpawnError::EmptyCommand);
                };
                let rest: Vec<&str> = rest.iter().map(|token| unquote(token)).collect();
                let command_line = (!rest.is_empty()).then(|| list2cmdline(&rest));
                (unquote(first).to_string(), command_line)
            }
            Command::Argv(argv) => {
                let Some((first, rest)) = argv.split_first() else {
                    return Err(SpawnError::EmptyCommand);
                };
                let command_line = (!rest.is_empty()).then(|| list2cmdline(rest));
                (first.clone(), command_line)
            }
        };

        if first.trim().is_empty() {
            return Err(SpawnError::EmptyCommand);
        }

        let cwd = cwd.unwrap_or_else(|| Path::new("."));
        let program = which::which_in(&first, path_var, cwd).map_err(|e| {
            tracing::debug!(command = %first, "Executable lookup failed: {}", e);
            SpawnError::NotFound {
                command: first.clone(),
            }
        })?;

        Ok(PreparedCommand {
            program,
            command_line: rest,
        })
    }
}

#[derive(Clone, Copy)]
enum TokenState {
    Idle,
    Word,
    Quoted(char),
}

fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Split a command string into tokens, keeping quotes in place.
///
/// A quote only opens a quoted section at the start of a token, and the
/// closing quote ends that token. Backslashes are literal.
pub fn split_command(line: &str) -> Result<Vec<String>, SpawnError> {
    let mut tokens = Vec::new();
    let mut token = String::new();
    let mut state = TokenState::Idle;

    for c in line.chars() {
        match state {
            TokenState::Idle => {
                if is_separator(c) {
                    continue;
                }
                token.push(c);
                state = if c == '"' || c == '\'' {
                    TokenState::Quoted(c)
                } else {
                    TokenState::Word
                };
            }
            TokenState::Word => {
                if is_separator(c) {
                    tokens.push(std::mem::take(&mut token));
                    state = TokenState::Idle;
                } else {
                    token.push(c);
                }
            }
            TokenState::Quoted(quote) => {
                token.push(c);
                if c == quote {
                    tokens.push(std::mem::take(&mut token));
                    state = TokenState::Idle;
                }
            }
        }
    }

    match state {
        TokenState::Idle => {}
        TokenState::Word => tokens.push(token),
        TokenState::Quoted(_) => {
            return Err(SpawnError::Tokenize {
                reason: "No closing quotation".to_string(),
            })
        }
    }
    Ok(tokens)
}

/// Remove one pair of matching outer quotes.
pub fn unquote(token: &str) -> &str {
    for quote in ['"', '\''] {
        if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
            return &token[1..token.len() - 1];
        }
    }
    token
}

/// Join arguments into one command line using the MS C runtime rules.
pub fn list2cmdline<S: AsRef<str>>(args: &[S]) -> String {
    let mut result = String::new();
    for arg in args {
        let arg = arg.as_ref();
        if !result.is_empty() {
            result.push(' ');
        }

        let needs_quotes = arg.is_empty() || arg.contains(' ') || arg.contains('\t');
        if needs_quotes {
            result.push('"');
        }

        let mut backslashes = 0usize;
        for c in arg.chars() {
            match c {
                '\\' => backslashes += 1,
                '"' => {
                    result.push_str(&"\\".repeat(backslashes * 2));
                    backslashes = 0;
                    result.push_str("\\\"");
                }
                _ => {
                    result.push_str(&"\\".repeat(backslashes));
                    backslashes = 0;
                    result.push(c);
                }
            }
        }
        result.push_str(&"\\".repeat(backslashes));

        if needs_quotes {
            // Doubled so the closing quote is not escaped.
            result.push_str(&"\\".repeat(backslashes));
            result.push('"');
        }
    }
    result
}

/// Split a command line back into arguments (the inverse of [`list2cmdline`]).
pub fn split_command_line(line: &str) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let run = chars[i..].iter().take_while(|&&ch| ch == '\\').count();
                let followed_by_quote = chars.get(i + run) == Some(&'"');
                if followed_by_quote {
                    current.push_str(&"\\".repeat(run / 2));
                    if run % 2 == 1 {
                        current.push('"');
                        i += run + 1;
                    } else {
                        i += run;
                    }
                } else {
                    current.push_str(&"\\".repeat(run));
                    i += run;
                }
                in_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
                i += 1;
            }
            ' ' | '\t' if !in_quotes => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
                i += 1;
            }
            _ => {
                current.push(c);
                in_token = true;
                i += 1;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}

/// Serialize an environment as `KEY=VALUE` entries, each NUL-terminated.
///
/// An empty environment becomes a single NUL byte.
pub fn environment_block<K, V>(vars: &[(K, V)]) -> Vec<u8>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if vars.is_empty() {
        return vec![0];
    }
    let mut block = Vec::new();
    for (key, value) in vars {
        block.extend_from_slice(key.as_ref().as_bytes());
        block.push(b'=');
        block.extend_from_slice(value.as_ref().as_bytes());
        block.push(0);
    }
    block
}

/// Parse an environment block produced by [`environment_block`].
///
/// Entries without `=` are skipped.
pub fn parse_environment_block(block: &[u8]) -> Vec<(String, String)> {
    block
        .split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
