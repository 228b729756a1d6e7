//! Scripted native agent for driving the controller without a real pty.

#![allow(dead_code)]

use parking_lot::Mutex;
use ptystream::{
    AgentBackend, AgentError, AgentOptions, ExitStatus, NativeAgent, Signal, SpawnRequest,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How the scripted child reacts to an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnInterrupt {
    Die,
    Ignore,
}

pub struct MockAgent {
    output: Mutex<VecDeque<Vec<u8>>>,
    alive: AtomicBool,
    exit_status: Mutex<Option<ExitStatus>>,
    on_interrupt: OnInterrupt,
    reject_resize: AtomicBool,
    pub spawned: Mutex<Option<SpawnRequest>>,
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub resizes: Mutex<Vec<(u16, u16)>>,
    pub signals: Mutex<Vec<Signal>>,
    pub closes: AtomicUsize,
    /// `blocking` argument of the most recent read.
    pub last_read_blocking: Mutex<Option<bool>>,
}

impl MockAgent {
    pub fn new(on_interrupt: OnInterrupt) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(VecDeque::new()),
            alive: AtomicBool::new(true),
            exit_status: Mutex::new(None),
            on_interrupt,
            reject_resize: AtomicBool::new(false),
            spawned: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            last_read_blocking: Mutex::new(None),
        })
    }

    /// Queue one chunk of child output.
    pub fn push_output(&self, chunk: &[u8]) {
        self.output.lock().push_back(chunk.to_vec());
    }

    /// Let the child exit with `code`; queued output is still delivered.
    pub fn exit(&self, code: u32) {
        self.finish(ExitStatus::with_exit_code(code));
    }

    pub fn reject_resizes(&self) {
        self.reject_resize.store(true, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    /// Wait until the pump reads with the given policy.
    pub fn wait_for_read_policy(&self, blocking: bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if *self.last_read_blocking.lock() == Some(blocking) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn finish(&self, status: ExitStatus) {
        let mut exit_status = self.exit_status.lock();
        if exit_status.is_none() {
            *exit_status = Some(status);
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl NativeAgent for MockAgent {
    fn spawn(&self, request: &SpawnRequest) -> Result<(), AgentError> {
        *self.spawned.lock() = Some(request.clone());
        Ok(())
    }

    fn read(&self, max: usize, blocking: bool) -> io::Result<Vec<u8>> {
        *self.last_read_blocking.lock() = Some(blocking);
        let mut output = self.output.lock();
        match output.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max {
                    let rest = chunk.split_off(max);
                    output.push_front(rest);
                }
                Ok(chunk)
            }
            None => {
                drop(output);
                if blocking && self.is_alive() {
                    thread::sleep(Duration::from_millis(5));
                }
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.writes.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn resize(&self, cols: u16, rows: u16) -> Result<(), AgentError> {
        if self.reject_resize.load(Ordering::SeqCst) {
            return Err(AgentError::Resize {
                cols,
                rows,
                reason: "scripted rejection".to_string(),
            });
        }
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_eof(&self) -> bool {
        !self.is_alive() && self.output.lock().is_empty()
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status.lock().clone()
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn kill(&self, signal: Signal) -> io::Result<()> {
        self.signals.lock().push(signal);
        match (signal, self.on_interrupt) {
            (Signal::Interrupt, OnInterrupt::Ignore) => {}
            (Signal::Interrupt, OnInterrupt::Die) => self.finish(ExitStatus::with_signal("Interrupt")),
            _ => self.finish(ExitStatus::with_signal("Killed")),
        }
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.output.lock().clear();
        self.finish(ExitStatus::with_signal("Killed"));
    }
}

/// Hands out one pre-built agent and records the creation size.
pub struct MockBackend {
    pub agent: Arc<MockAgent>,
    pub created: Mutex<Option<(u16, u16, AgentOptions)>>,
}

impl MockBackend {
    pub fn new(agent: Arc<MockAgent>) -> Self {
        Self {
            agent,
            created: Mutex::new(None),
        }
    }
}

impl AgentBackend for MockBackend {
    fn create(
        &self,
        cols: u16,
        rows: u16,
        options: &AgentOptions,
    ) -> Result<Arc<dyn NativeAgent>, AgentError> {
        *self.created.lock() = Some((cols, rows, *options));
        Ok(self.agent.clone())
    }
}
