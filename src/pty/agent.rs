//! The capability surface the controller needs from a native pty agent.
//!
//! An agent owns one pseudo-terminal session and the process running in it.
//! The controller never touches OS pty primitives directly; everything goes
//! through [`NativeAgent`], which keeps the core testable with scripted
//! agents and leaves room for other platform backends.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::AgentError;
use crate::pty::signal::{self, Signal};

/// Options applied when an agent is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentOptions {
    /// Let the child emit cursor-movement sequences.
    pub emit_cursor_hints: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            emit_cursor_hints: true,
        }
    }
}

/// Everything the agent needs to launch the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub cwd: Option<PathBuf>,
    /// `KEY=VALUE\0...` block; `None` inherits the agent's environment.
    pub env_block: Option<Vec<u8>>,
    /// Arguments after the program, as one command line.
    pub command_line: Option<String>,
}

/// How the child finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    code: u32,
    signal: Option<String>,
}

impl ExitStatus {
    pub fn with_exit_code(code: u32) -> Self {
        Self { code, signal: None }
    }

    pub fn with_signal(signal: &str) -> Self {
        Self {
            code: 1,
            signal: Some(signal.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.signal.is_none() && self.code == 0
    }

    pub fn exit_code(&self) -> u32 {
        self.code
    }

    /// Description of the fatal signal, if the child was signalled.
    pub fn signal(&self) -> Option<&str> {
        self.signal.as_deref()
    }
}

impl From<portable_pty::ExitStatus> for ExitStatus {
    fn from(status: portable_pty::ExitStatus) -> Self {
        match status.signal() {
            Some(signal) => Self::with_signal(signal),
            None => Self::with_exit_code(status.exit_code()),
        }
    }
}

/// One pseudo-terminal session.
///
/// The controller calls `read` from its pump thread only, and every other
/// mutating method from the owning thread only. `close` is called at most
/// once, after which no other method is called except the read-only
/// queries from a pump that has not yet observed the close.
pub trait NativeAgent: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> Result<(), AgentError>;

    /// Read up to `max` bytes. An empty result means no data right now.
    fn read(&self, max: usize, blocking: bool) -> io::Result<Vec<u8>>;

    /// Write `data`, returning how many bytes were accepted.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    fn resize(&self, cols: u16, rows: u16) -> Result<(), AgentError>;

    fn is_alive(&self) -> bool;

    /// True once the output side has been fully drained.
    fn is_eof(&self) -> bool;

    fn exit_status(&self) -> Option<ExitStatus>;

    fn pid(&self) -> Option<u32>;

    /// Deliver a signal to the child's process id.
    fn kill(&self, signal: Signal) -> io::Result<()> {
        let pid = self
            .pid()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "child has no pid"))?;
        signal::send_signal(pid, signal)
    }

    fn close(&self);
}

/// Factory for agents, sized at creation.
pub trait AgentBackend {
    fn create(
        &self,
        cols: u16,
        rows: u16,
        options: &AgentOptions,
    ) -> Result<Arc<dyn NativeAgent>, AgentError>;
}
