//! The process controller: one agent, one bridge, one decoder.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scopeguard::ScopeGuard;

use crate::config::PtyConfig;
use crate::error::{PtyError, Result, SpawnError};
use crate::pty::agent::{AgentBackend, AgentOptions, ExitStatus, NativeAgent, SpawnRequest};
use crate::pty::bridge::{BridgeSettings, StreamBridge};
use crate::pty::command::{environment_block, Command};
use crate::pty::control;
use crate::pty::decoder::IncrementalDecoder;
use crate::pty::native::PortablePtyBackend;
use crate::pty::signal::Signal;

/// Default `max_bytes` for [`PtyProcess::read_default`].
pub const DEFAULT_READ_SIZE: usize = 1024;

/// What to run and how to set up its terminal.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub command: Command,
    /// Working directory; the current directory when unset.
    pub cwd: Option<PathBuf>,
    /// Full child environment; inherited when unset.
    pub env: Option<Vec<(String, String)>>,
    /// `(rows, cols)`; taken from the config when unset.
    pub dimensions: Option<(u16, u16)>,
    pub emit_cursor_hints: bool,
    /// Tunables; defaults plus environment overrides when unset.
    pub config: Option<PtyConfig>,
}

impl SpawnOptions {
    pub fn new(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            env: None,
            dimensions: None,
            emit_cursor_hints: true,
            config: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    pub fn dimensions(mut self, rows: u16, cols: u16) -> Self {
        self.dimensions = Some((rows, cols));
        self
    }

    pub fn emit_cursor_hints(mut self, emit: bool) -> Self {
        self.emit_cursor_hints = emit;
        self
    }

    pub fn config(mut self, config: PtyConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// `PATH` the child will search: its own environment first, then ours.
    fn search_path(&self) -> Option<OsString> {
        self.env
            .as_ref()
            .and_then(|vars| vars.iter().find(|(key, _)| key == "PATH"))
            .map(|(_, value)| OsString::from(value))
            .or_else(|| std::env::var_os("PATH"))
    }
}

/// A child process attached to a pseudo-terminal, read as a text stream.
///
/// Output is pumped off the agent by a background thread, so [`read`]
/// never blocks longer than one poll interval. Dropping the controller
/// closes it with `force = true`.
///
/// [`read`]: PtyProcess::read
pub struct PtyProcess {
    agent: Option<Arc<dyn NativeAgent>>,
    bridge: Option<StreamBridge>,
    decoder: IncrementalDecoder,
    closed: bool,
    flag_eof: bool,
    window_size: (u16, u16),
    read_blocking: bool,
    delay_after_terminate: Duration,
    delay_after_close: Duration,
    poll_interval: Duration,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("closed", &self.closed)
            .field("flag_eof", &self.flag_eof)
            .field("window_size", &self.window_size)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Spawn through the platform pty backend.
    pub fn spawn(options: SpawnOptions) -> Result<Self> {
        Self::spawn_with(&PortablePtyBackend, options)
    }

    /// Spawn through a caller-provided backend.
    pub fn spawn_with(backend: &dyn AgentBackend, options: SpawnOptions) -> Result<Self> {
        let config = match options.config.clone() {
            Some(config) => config,
            None => {
                let mut config = PtyConfig::default();
                config.apply_env_overrides();
                config
            }
        };
        config.validate()?;

        let (rows, cols) = options.dimensions.unwrap_or_else(|| config.dimensions());
        let path_var = options.search_path();
        let prepared = options
            .command
            .prepare(path_var.as_deref(), options.cwd.as_deref())?;
        let env_block = options.env.as_deref().map(|vars| environment_block(vars));

        let agent_options = AgentOptions {
            emit_cursor_hints: options.emit_cursor_hints,
        };
        let agent = backend
            .create(cols, rows, &agent_options)
            .map_err(SpawnError::AgentCreate)?;
        // Until the controller exists, any early return must release the agent.
        let agent = scopeguard::guard(agent, |agent| {
            tracing::debug!("Releasing pty agent after failed spawn");
            agent.close();
        });

        let request = SpawnRequest {
            program: prepared.program,
            cwd: options.cwd,
            env_block,
            command_line: prepared.command_line,
        };
        agent.spawn(&request).map_err(SpawnError::Rejected)?;

        let bridge = StreamBridge::start(Arc::clone(&*agent), &BridgeSettings::from(&config))?;
        let agent = ScopeGuard::into_inner(agent);

        let pid = agent.pid();
        let local_addr = bridge.local_addr();
        tracing::info!(
            program = %request.program.display(),
            ?pid,
            rows,
            cols,
            "Spawned pty process"
        );

        Ok(Self {
            agent: Some(agent),
            bridge: Some(bridge),
            decoder: IncrementalDecoder::new(),
            closed: false,
            flag_eof: false,
            window_size: (rows, cols),
            read_blocking: config.read_blocking,
            delay_after_terminate: config.delay_after_terminate(),
            delay_after_close: config.delay_after_close(),
            poll_interval: config.poll_interval(),
            pid,
            exit_status: None,
            local_addr,
        })
    }

    /// Read at most `max_bytes` of output as text.
    ///
    /// Returns an empty string if nothing arrived within one poll interval.
    /// A multi-byte character split across chunks is held back until it is
    /// complete.
    pub fn read(&mut self, max_bytes: usize) -> Result<String> {
        if self.flag_eof || self.closed {
            return Err(PtyError::EndOfStream);
        }
        if max_bytes == 0 {
            return Ok(String::new());
        }
        let bridge = self.bridge.as_mut().ok_or(PtyError::EndOfStream)?;
        match bridge.recv(max_bytes)? {
            None => Ok(String::new()),
            Some(data) if data.is_empty() => {
                self.flag_eof = true;
                tracing::debug!(pid = ?self.pid, "Pty output reached end of stream");
                Err(PtyError::EndOfStream)
            }
            Some(data) => Ok(self.decoder.decode(&data)),
        }
    }

    pub fn read_default(&mut self) -> Result<String> {
        self.read(DEFAULT_READ_SIZE)
    }

    /// Read until a newline or the end of the stream.
    ///
    /// The end of the stream returns whatever was accumulated, so a call on
    /// an exhausted stream returns an empty string; check [`is_eof`].
    ///
    /// [`is_eof`]: PtyProcess::is_eof
    pub fn readline(&mut self) -> Result<String> {
        let mut line = String::new();
        loop {
            match self.read(1) {
                Ok(chunk) => {
                    line.push_str(&chunk);
                    if chunk.contains('\n') {
                        return Ok(line);
                    }
                }
                Err(PtyError::EndOfStream) => return Ok(line),
                Err(e) => return Err(e),
            }
        }
    }

    pub fn write(&mut self, text: &str) -> Result<usize> {
        self.write_bytes(text.as_bytes())
    }

    /// Write raw bytes to the child's terminal input.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<usize> {
        let agent = self.live_agent()?;
        let written = agent
            .write(data)
            .map_err(|source| PtyError::Write { source })?;
        if written != data.len() {
            return Err(PtyError::ShortWrite {
                expected: data.len(),
                written,
            });
        }
        Ok(written)
    }

    /// No-op; writes go straight to the agent.
    pub fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Interrupt the child, escalating to a kill when `force` is set.
    ///
    /// Returns whether the child is dead afterwards.
    pub fn terminate(&mut self, force: bool) -> Result<bool> {
        if !self.isalive() {
            return Ok(true);
        }
        self.signal_if_alive(Signal::Interrupt)?;
        thread::sleep(self.delay_after_terminate);
        if !self.isalive() {
            return Ok(true);
        }
        if !force {
            return Ok(false);
        }
        self.signal_if_alive(Signal::Kill)?;
        thread::sleep(self.delay_after_terminate);
        Ok(!self.isalive())
    }

    /// Send `signal` to the child without waiting.
    pub fn kill(&self, signal: Signal) -> Result<()> {
        let agent = self.agent.as_ref().ok_or(PtyError::EndOfStream)?;
        agent
            .kill(signal)
            .map_err(|source| PtyError::Signal { signal, source })
    }

    /// A child that exits between the liveness check and the signal is fine.
    fn signal_if_alive(&self, signal: Signal) -> Result<()> {
        match self.kill(signal) {
            Err(_) if !self.isalive() => Ok(()),
            other => other,
        }
    }

    /// Block until the child exits and return how it exited.
    pub fn wait(&self) -> Result<ExitStatus> {
        let Some(agent) = self.agent.as_ref() else {
            return self.exit_status.clone().ok_or(PtyError::EndOfStream);
        };
        while agent.is_alive() {
            thread::sleep(self.poll_interval);
        }
        agent.exit_status().ok_or(PtyError::EndOfStream)
    }

    pub fn isalive(&self) -> bool {
        self.agent.as_ref().is_some_and(|agent| agent.is_alive())
    }

    pub fn isatty(&self) -> bool {
        self.isalive()
    }

    /// Tear everything down. Safe to call more than once.
    ///
    /// The controller always ends closed; a child that survived termination
    /// or a truncated trailing character is reported afterwards.
    ///
    /// `force` only decides whether termination escalates past an
    /// interrupt. Releasing the agent kills and reaps any survivor either
    /// way, so after [`PtyError::TerminateFailure`] the child is already
    /// gone; the error says the polite shutdown was ignored.
    pub fn close(&mut self, force: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        tracing::debug!(pid = ?self.pid, force, "Closing pty process");

        if let Some(bridge) = self.bridge.as_mut() {
            bridge.shutdown();
        }
        thread::sleep(self.delay_after_close);

        let terminated = if self.isalive() {
            self.terminate(force)
        } else {
            Ok(true)
        };

        if let Some(agent) = self.agent.take() {
            agent.close();
            self.exit_status = agent.exit_status();
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.join();
        }
        let finished = self.decoder.finish();

        self.closed = true;
        self.flag_eof = true;
        tracing::info!(pid = ?self.pid, status = ?self.exit_status, "Pty process closed");

        if !terminated? {
            return Err(PtyError::TerminateFailure { pid: self.pid });
        }
        finished?;
        Ok(())
    }

    /// Write the control character for `letter` (`'c'` sends `^C`).
    ///
    /// Returns 0 without writing when `letter` has no control code.
    pub fn sendcontrol(&mut self, letter: char) -> Result<usize> {
        match control::control_byte(letter) {
            Some(byte) => self.write_bytes(&[byte]),
            None => Ok(0),
        }
    }

    pub fn sendeof(&mut self) -> Result<usize> {
        self.write_bytes(&[control::EOF])
    }

    pub fn sendintr(&mut self) -> Result<usize> {
        self.write_bytes(&[control::INTR])
    }

    /// `(rows, cols)` as last set.
    pub fn getwinsize(&self) -> (u16, u16) {
        self.window_size
    }

    pub fn setwinsize(&mut self, rows: u16, cols: u16) -> Result<()> {
        let agent = self.agent.as_ref().ok_or(PtyError::EndOfStream)?;
        agent.resize(cols, rows).map_err(|e| PtyError::Resize {
            rows,
            cols,
            reason: e.to_string(),
        })?;
        self.window_size = (rows, cols);
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status once the child has finished.
    pub fn exitstatus(&self) -> Option<ExitStatus> {
        match self.agent.as_ref() {
            Some(agent) => agent.exit_status(),
            None => self.exit_status.clone(),
        }
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// True once a read has observed the end of the output stream.
    pub fn is_eof(&self) -> bool {
        self.flag_eof
    }

    /// Loopback address of the bridge carrying the child's output.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn delay_after_terminate(&self) -> Duration {
        self.delay_after_terminate
    }

    pub fn set_delay_after_terminate(&mut self, delay: Duration) {
        self.delay_after_terminate = delay;
    }

    pub fn delay_after_close(&self) -> Duration {
        self.delay_after_close
    }

    pub fn set_delay_after_close(&mut self, delay: Duration) {
        self.delay_after_close = delay;
    }

    pub fn read_blocking(&self) -> bool {
        self.read_blocking
    }

    pub fn set_read_blocking(&mut self, blocking: bool) {
        self.read_blocking = blocking;
        if let Some(bridge) = self.bridge.as_ref() {
            bridge.set_read_blocking(blocking);
        }
    }

    fn live_agent(&self) -> Result<&Arc<dyn NativeAgent>> {
        match self.agent.as_ref() {
            Some(agent) if agent.is_alive() => Ok(agent),
            _ => Err(PtyError::EndOfStream),
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            tracing::warn!("Error while dropping pty process: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Agent that refuses every spawn and counts closes.
    #[derive(Default)]
    struct RefusingAgent {
        closes: AtomicUsize,
    }

    impl NativeAgent for RefusingAgent {
        fn spawn(&self, _request: &SpawnRequest) -> std::result::Result<(), AgentError> {
            Err(AgentError::Spawn("refused".to_string()))
        }

        fn read(&self, _max: usize, _blocking: bool) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn write(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn resize(&self, _cols: u16, _rows: u16) -> std::result::Result<(), AgentError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            false
        }

        fn is_eof(&self) -> bool {
            true
        }

        fn exit_status(&self) -> Option<ExitStatus> {
            None
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct RefusingBackend(Arc<RefusingAgent>);

    impl AgentBackend for RefusingBackend {
        fn create(
            &self,
            _cols: u16,
            _rows: u16,
            _options: &AgentOptions,
        ) -> std::result::Result<Arc<dyn NativeAgent>, AgentError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenBackend;

    impl AgentBackend for BrokenBackend {
        fn create(
            &self,
            _cols: u16,
            _rows: u16,
            _options: &AgentOptions,
        ) -> std::result::Result<Arc<dyn NativeAgent>, AgentError> {
            Err(AgentError::Create("no pty available".to_string()))
        }
    }

    #[test]
    fn test_spawn_options_defaults() {
        let options = SpawnOptions::new("sh");
        assert_eq!(options.command, Command::Line("sh".to_string()));
        assert!(options.emit_cursor_hints);
        assert!(options.dimensions.is_none());
        assert!(options.env.is_none());
    }

    #[test]
    fn test_search_path_prefers_child_env() {
        let options = SpawnOptions::new("sh").env([("PATH", "/opt/bin"), ("HOME", "/root")]);
        assert_eq!(options.search_path(), Some(OsString::from("/opt/bin")));
    }

    #[test]
    fn test_empty_command_never_reaches_backend() {
        let err = PtyProcess::spawn_with(&BrokenBackend, SpawnOptions::new("   ")).unwrap_err();
        assert!(matches!(err, PtyError::Spawn(SpawnError::EmptyCommand)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PtyConfig {
            poll_interval_ms: 0,
            ..PtyConfig::default()
        };
        let err = PtyProcess::spawn_with(&BrokenBackend, SpawnOptions::new("sh").config(config))
            .unwrap_err();
        assert!(matches!(err, PtyError::Config(_)));
    }

    fn this_binary() -> SpawnOptions {
        let exe = std::env::current_exe().unwrap();
        SpawnOptions::new(vec![exe.to_string_lossy().into_owned()])
    }

    #[test]
    fn test_agent_create_failure() {
        let err = PtyProcess::spawn_with(&BrokenBackend, this_binary()).unwrap_err();
        assert!(matches!(err, PtyError::Spawn(SpawnError::AgentCreate(_))));
    }

    #[test]
    fn test_rejected_spawn_closes_agent_once() {
        let agent = Arc::new(RefusingAgent::default());
        let backend = RefusingBackend(agent.clone());
        let err = PtyProcess::spawn_with(&backend, this_binary()).unwrap_err();
        assert!(matches!(err, PtyError::Spawn(SpawnError::Rejected(_))));
        assert_eq!(agent.closes.load(Ordering::SeqCst), 1);
    }
}
