//! Error types for the pty controller.
//!
//! `PtyError` is what every public controller operation returns.
//! `SpawnError` and `AgentError` classify failures coming from command
//! resolution and from the native agent respectively.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::pty::decoder::DecodeError;
use crate::pty::signal::Signal;

pub type Result<T> = std::result::Result<T, PtyError>;

/// Errors surfaced by [`PtyProcess`](crate::PtyProcess) operations.
#[derive(Debug, Error)]
pub enum PtyError {
    /// The child could not be started
    #[error("Spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// The stream is closed or exhausted
    #[error("Pty is closed")]
    EndOfStream,

    /// The native layer rejected a write
    #[error("Write failed: {source}")]
    Write {
        #[source]
        source: io::Error,
    },

    /// The native layer accepted fewer bytes than requested
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    /// The escalated kill sequence did not bring the process down
    #[error("Could not terminate the child (pid {pid:?})")]
    TerminateFailure { pid: Option<u32> },

    /// An unterminated multi-byte sequence was pending at close
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The native layer rejected new window dimensions
    #[error("Resize to {rows}x{cols} rejected: {reason}")]
    Resize { rows: u16, cols: u16, reason: String },

    /// Delivering a signal to the child failed
    #[error("Failed to send {signal:?}: {source}")]
    Signal {
        signal: Signal,
        #[source]
        source: io::Error,
    },

    /// Loopback channel setup or I/O failed
    #[error("Stream bridge error: {0}")]
    Bridge(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while resolving and launching the child command.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("Command is empty")]
    EmptyCommand,

    #[error("Could not split command line: {reason}")]
    Tokenize { reason: String },

    #[error("The command was not found or was not executable: {command}")]
    NotFound { command: String },

    #[error("Could not create pty agent: {0}")]
    AgentCreate(#[source] AgentError),

    #[error("Native spawn rejected: {0}")]
    Rejected(#[source] AgentError),
}

/// Errors reported by a [`NativeAgent`](crate::NativeAgent) implementation.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent creation failed: {0}")]
    Create(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("invalid dimensions {cols}x{rows}: {reason}")]
    Resize { cols: u16, rows: u16, reason: String },

    #[error("agent is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PtyError {
    /// True for the end-of-stream condition, which `readline` absorbs.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, PtyError::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_command() {
        let err = PtyError::from(SpawnError::NotFound {
            command: "nosuchcmd".to_string(),
        });
        assert!(err.to_string().contains("nosuchcmd"));
        assert!(!err.is_end_of_stream());
    }

    #[test]
    fn test_end_of_stream_detection() {
        assert!(PtyError::EndOfStream.is_end_of_stream());
        assert_eq!(PtyError::EndOfStream.to_string(), "Pty is closed");
    }

    #[test]
    fn test_resize_error_reports_dimensions() {
        let err = PtyError::Resize {
            rows: 0,
            cols: 80,
            reason: "invalid dimensions".to_string(),
        };
        assert!(err.to_string().contains("0x80"));
    }
}
