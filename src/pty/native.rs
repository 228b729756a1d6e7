//! [`NativeAgent`] backed by `portable-pty`.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use crate::error::AgentError;
use crate::pty::agent::{AgentBackend, AgentOptions, ExitStatus, NativeAgent, SpawnRequest};
use crate::pty::command::{parse_environment_block, split_command_line};
#[cfg(not(unix))]
use crate::pty::{control, signal::Signal};

/// Slice used by blocking reads so a close is noticed promptly.
#[cfg(unix)]
const BLOCKING_POLL_MS: libc::c_int = 50;

/// Creates agents on the platform's native pty system.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortablePtyBackend;

impl AgentBackend for PortablePtyBackend {
    fn create(
        &self,
        cols: u16,
        rows: u16,
        options: &AgentOptions,
    ) -> Result<Arc<dyn NativeAgent>, AgentError> {
        if cols == 0 || rows == 0 {
            return Err(AgentError::Create(format!(
                "invalid size {}x{}",
                cols, rows
            )));
        }
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentError::Create(format!("{e:#}")))?;
        let agent = PortablePtyAgent::new(pair.master, pair.slave, *options)?;
        Ok(Arc::new(agent))
    }
}

pub struct PortablePtyAgent {
    options: AgentOptions,
    /// Released on close; dropping it ends the reader's stream.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// Held until the child is spawned.
    slave: Mutex<Option<Box<dyn SlavePty + Send>>>,
    reader: Mutex<Box<dyn Read + Send>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    exit_status: Mutex<Option<ExitStatus>>,
    eof: AtomicBool,
    closed: AtomicBool,
}

impl PortablePtyAgent {
    fn new(
        master: Box<dyn MasterPty + Send>,
        slave: Box<dyn SlavePty + Send>,
        options: AgentOptions,
    ) -> Result<Self, AgentError> {
        let reader = master
            .try_clone_reader()
            .map_err(|e| AgentError::Create(format!("{e:#}")))?;
        let writer = master
            .take_writer()
            .map_err(|e| AgentError::Create(format!("{e:#}")))?;

        Ok(Self {
            options,
            master: Mutex::new(Some(master)),
            slave: Mutex::new(Some(slave)),
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(None),
            exit_status: Mutex::new(None),
            eof: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn build_command(&self, request: &SpawnRequest) -> io::Result<CommandBuilder> {
        let mut cmd = CommandBuilder::new(&request.program);
        if let Some(line) = &request.command_line {
            cmd.args(split_command_line(line));
        }

        match &request.cwd {
            Some(cwd) => cmd.cwd(cwd),
            None => cmd.cwd(std::env::current_dir()?),
        }

        let has_term = match &request.env_block {
            Some(block) => {
                cmd.env_clear();
                let vars = parse_environment_block(block);
                let has_term = vars.iter().any(|(key, _)| key == "TERM");
                for (key, value) in vars {
                    cmd.env(key, value);
                }
                has_term
            }
            None => std::env::var_os("TERM").is_some(),
        };

        if !self.options.emit_cursor_hints {
            cmd.env("TERM", "dumb");
        } else if !has_term {
            cmd.env("TERM", "xterm-256color");
        }
        Ok(cmd)
    }

    /// Wait until a read would not block. Returns false if nothing arrived.
    #[cfg(unix)]
    fn wait_readable(&self, blocking: bool) -> io::Result<bool> {
        let fd = match self.master.lock().as_ref() {
            Some(master) => master.as_raw_fd(),
            None => return Ok(false),
        };
        let Some(fd) = fd else {
            return Ok(true);
        };
        loop {
            if self.is_closed() {
                return Ok(false);
            }
            let timeout = if blocking { BLOCKING_POLL_MS } else { 0 };
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `pfd` is a valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if rc > 0 {
                return Ok(true);
            }
            if !blocking {
                return Ok(false);
            }
        }
    }

    // No readiness query here; every read is a blocking read that ends once
    // close releases the master.
    #[cfg(not(unix))]
    fn wait_readable(&self, _blocking: bool) -> io::Result<bool> {
        Ok(!self.is_closed())
    }
}

impl NativeAgent for PortablePtyAgent {
    fn spawn(&self, request: &SpawnRequest) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        let slave = self
            .slave
            .lock()
            .take()
            .ok_or_else(|| AgentError::Spawn("a child was already spawned".to_string()))?;

        let cmd = self.build_command(request)?;
        let child = slave
            .spawn_command(cmd)
            .map_err(|e| AgentError::Spawn(format!("{e:#}")))?;
        // The child owns its end now; keeping ours open would hide EOF.
        drop(slave);

        tracing::debug!(
            program = %request.program.display(),
            pid = ?child.process_id(),
            "Child spawned in pty"
        );
        *self.child.lock() = Some(child);
        Ok(())
    }

    fn read(&self, max: usize, blocking: bool) -> io::Result<Vec<u8>> {
        if self.is_eof() {
            return Ok(Vec::new());
        }
        if !self.wait_readable(blocking)? {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; max.max(1)];
        let result = self.reader.lock().read(&mut buf);
        match result {
            Ok(0) => {
                self.eof.store(true, Ordering::SeqCst);
                Ok(Vec::new())
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted || e.kind() == io::ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => {
                self.eof.store(true, Ordering::SeqCst);
                if is_hangup(&e) {
                    Ok(Vec::new())
                } else {
                    Err(e)
                }
            }
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "agent is closed"));
        }
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pty writer is closed"));
        };
        writer.write_all(data)?;
        writer.flush()?;
        Ok(data.len())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::Closed);
        }
        if cols == 0 || rows == 0 {
            return Err(AgentError::Resize {
                cols,
                rows,
                reason: "dimensions must be positive".to_string(),
            });
        }
        let master = self.master.lock();
        let Some(master) = master.as_ref() else {
            return Err(AgentError::Closed);
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentError::Resize {
                cols,
                rows,
                reason: format!("{e:#}"),
            })
    }

    fn is_alive(&self) -> bool {
        if self.is_closed() || self.exit_status.lock().is_some() {
            return false;
        }
        let mut child = self.child.lock();
        let Some(child) = child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                *self.exit_status.lock() = Some(ExitStatus::from(status));
                false
            }
            Err(e) => {
                tracing::debug!("try_wait failed, treating child as dead: {}", e);
                false
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.is_closed() || self.eof.load(Ordering::SeqCst)
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status.lock().clone()
    }

    fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().and_then(|child| child.process_id())
    }

    // Console children have no pid signals: interrupt through the input
    // stream and stop through the child handle.
    #[cfg(not(unix))]
    fn kill(&self, signal: Signal) -> io::Result<()> {
        match signal {
            Signal::Interrupt => self.write(&[control::INTR]).map(drop),
            Signal::Terminate | Signal::Kill => {
                let mut child = self.child.lock();
                let child = child
                    .as_mut()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no child spawned"))?;
                child.kill()
            }
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{:?} has no console equivalent", other),
            )),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.writer.lock().take();

        let mut child = self.child.lock();
        if let Some(child) = child.as_mut() {
            if self.exit_status.lock().is_none() {
                if let Ok(None) = child.try_wait() {
                    let _ = child.kill();
                }
                match child.wait() {
                    Ok(status) => *self.exit_status.lock() = Some(ExitStatus::from(status)),
                    Err(e) => tracing::warn!("Failed to reap pty child: {}", e),
                }
            }
        }
        drop(child);
        // Unblocks a pump parked in a native read.
        self.master.lock().take();
        tracing::debug!("Pty agent closed");
    }
}

/// Linux reports EIO on the master once the slave side is gone.
#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

#[cfg(not(unix))]
fn is_hangup(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

impl Drop for PortablePtyAgent {
    fn drop(&mut self) {
        self.close();
    }
}
