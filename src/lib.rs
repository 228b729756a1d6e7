//! Stream-oriented control of a child process running in a pseudo-terminal.
//!
//! [`PtyProcess`] spawns a command on a native pty agent and exposes it as
//! a text stream with process lifecycle operations: bounded-wait reads that
//! never split a character, writes, resizing, signals, waiting, and an
//! escalating terminate/close.

pub mod config;
pub mod error;
pub mod logging;
pub mod pty;

pub use config::PtyConfig;
pub use error::{AgentError, PtyError, Result, SpawnError};
pub use pty::{
    AgentBackend, AgentOptions, Command, ExitStatus, NativeAgent, PortablePtyBackend, PtyProcess,
    Signal, SpawnOptions, SpawnRequest,
};
