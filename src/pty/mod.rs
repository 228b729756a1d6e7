pub mod agent;
pub mod bridge;
pub mod command;
pub mod control;
pub mod decoder;
pub mod native;
mod process;
mod resize;
pub mod signal;

pub use agent::{AgentBackend, AgentOptions, ExitStatus, NativeAgent, SpawnRequest};
pub use bridge::StreamBridge;
pub use command::Command;
pub use decoder::{DecodeError, IncrementalDecoder};
pub use native::{PortablePtyAgent, PortablePtyBackend};
pub use process::{PtyProcess, SpawnOptions, DEFAULT_READ_SIZE};
pub use resize::ResizeWatcher;
pub use signal::Signal;
