//! Blocking-read to pollable-stream bridge.
//!
//! A pump thread is the only caller of the agent's read primitive. It
//! republishes every chunk over a loopback TCP pair, whose consumer end
//! supports read timeouts, so the controller can wait for output with a
//! bounded poll instead of an unbounded native block.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::PtyConfig;
use crate::pty::agent::NativeAgent;

/// Lowest port the search wraps around to.
const LOWEST_PORT: u16 = 1024;

/// Pause between reads while the child is alive but silent.
const PUMP_YIELD: Duration = Duration::from_millis(10);

/// Pump and consumer parameters.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub start_port: u16,
    pub read_blocking: bool,
    pub read_chunk: usize,
    pub poll_interval: Duration,
}

impl From<&PtyConfig> for BridgeSettings {
    fn from(config: &PtyConfig) -> Self {
        Self {
            start_port: config.bridge_port,
            read_blocking: config.read_blocking,
            read_chunk: config.read_chunk,
            poll_interval: config.poll_interval(),
        }
    }
}

pub struct StreamBridge {
    addr: SocketAddr,
    consumer: Option<TcpStream>,
    pump: Option<JoinHandle<()>>,
    read_blocking: Arc<AtomicBool>,
}

impl StreamBridge {
    /// Bind the loopback pair and start pumping `agent` output into it.
    pub fn start(agent: Arc<dyn NativeAgent>, settings: &BridgeSettings) -> io::Result<Self> {
        let listener = bind_loopback(settings.start_port)?;
        let addr = listener.local_addr()?;

        // The connection completes through the backlog, so accepting on this
        // thread right after connecting cannot deadlock.
        let producer = TcpStream::connect(addr)?;
        let consumer = accept_peer(&listener, producer.local_addr()?)?;
        drop(listener);

        consumer.set_read_timeout(Some(settings.poll_interval))?;
        producer.set_nodelay(true)?;

        let read_blocking = Arc::new(AtomicBool::new(settings.read_blocking));
        let pump_blocking = read_blocking.clone();
        let pump_settings = settings.clone();
        let pump = thread::Builder::new()
            .name("pty-bridge-pump".to_string())
            .spawn(move || pump(agent, producer, &pump_settings, &pump_blocking))?;

        tracing::debug!("Stream bridge bound to {}", addr);
        Ok(Self {
            addr,
            consumer: Some(consumer),
            pump: Some(pump),
            read_blocking,
        })
    }

    /// Switch the pump's read policy; applies from its next read.
    pub fn set_read_blocking(&self, blocking: bool) {
        self.read_blocking.store(blocking, Ordering::Relaxed);
    }

    /// The loopback address the bridge bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait up to one poll interval for at most `max` bytes.
    ///
    /// `Ok(None)` means the wait timed out; `Ok(Some(empty))` means the
    /// stream has ended (or the consumer side was already shut down).
    pub fn recv(&mut self, max: usize) -> io::Result<Option<Vec<u8>>> {
        let Some(consumer) = self.consumer.as_mut() else {
            return Ok(Some(Vec::new()));
        };
        let mut buf = vec![0u8; max.max(1)];
        match consumer.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the consumer endpoint; the pump fails its next send and exits.
    pub fn shutdown(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.shutdown(Shutdown::Both);
        }
    }

    /// Wait for the pump thread to finish.
    pub fn join(&mut self) {
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                tracing::warn!("Stream bridge pump panicked");
            }
        }
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind `127.0.0.1`, starting at `start_port` and moving up on conflicts.
///
/// There is no retry limit; the search wraps from 65535 back to 1024.
pub fn bind_loopback(start_port: u16) -> io::Result<TcpListener> {
    let mut port = start_port;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(listener) => return Ok(listener),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::AddrInUse | io::ErrorKind::PermissionDenied
                ) =>
            {
                tracing::debug!("Port {} busy: {}", port, e);
                port = if port == u16::MAX { LOWEST_PORT } else { port + 1 };
            }
            Err(e) => return Err(e),
        }
    }
}

/// Accept connections until the one from `peer` arrives.
fn accept_peer(listener: &TcpListener, peer: SocketAddr) -> io::Result<TcpStream> {
    loop {
        let (stream, from) = listener.accept()?;
        if from == peer {
            return Ok(stream);
        }
        tracing::warn!("Dropping unexpected bridge connection from {}", from);
    }
}

fn pump(
    agent: Arc<dyn NativeAgent>,
    mut producer: TcpStream,
    settings: &BridgeSettings,
    read_blocking: &AtomicBool,
) {
    tracing::trace!("Bridge pump started");
    loop {
        let blocking = read_blocking.load(Ordering::Relaxed);
        let mut data = read_or_empty(agent.as_ref(), settings.read_chunk, blocking);

        if data.is_empty() {
            if agent.is_alive() {
                thread::sleep(PUMP_YIELD);
                continue;
            }
            data = drain(agent.as_ref(), settings);
            if data.is_empty() {
                // Zero-length end marker.
                let _ = producer.shutdown(Shutdown::Write);
                tracing::debug!("Bridge pump reached end of stream");
                break;
            }
        }

        if let Err(e) = producer.write_all(&data) {
            tracing::debug!("Bridge consumer gone, stopping pump: {}", e);
            break;
        }
    }
}

/// Poll for trailing output of a dead child until the agent reports eof.
fn drain(agent: &dyn NativeAgent, settings: &BridgeSettings) -> Vec<u8> {
    let mut data = Vec::new();
    while data.is_empty() && !agent.is_eof() {
        thread::sleep(settings.poll_interval);
        data = read_or_empty(agent, settings.read_chunk, false);
    }
    data
}

fn read_or_empty(agent: &dyn NativeAgent, max: usize, blocking: bool) -> Vec<u8> {
    match agent.read(max, blocking) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!("Native read failed: {}", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::pty::agent::{ExitStatus, SpawnRequest};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Instant;

    #[derive(Clone, Copy, PartialEq)]
    enum Script {
        /// Replay queued chunks, then die.
        Chunks,
        /// Produce `x` forever.
        Endless,
        /// Stay alive and quiet until closed.
        Silent,
    }

    struct ReplayAgent {
        script: Script,
        chunks: Mutex<VecDeque<Vec<u8>>>,
        closed: AtomicBool,
    }

    impl ReplayAgent {
        fn new(script: Script, chunks: &[&[u8]]) -> Arc<Self> {
            Arc::new(Self {
                script,
                chunks: Mutex::new(chunks.iter().map(|c| c.to_vec()).collect()),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl NativeAgent for ReplayAgent {
        fn spawn(&self, _request: &SpawnRequest) -> Result<(), AgentError> {
            Ok(())
        }

        fn read(&self, _max: usize, _blocking: bool) -> io::Result<Vec<u8>> {
            match self.script {
                Script::Endless => Ok(b"x".to_vec()),
                Script::Silent => Ok(Vec::new()),
                Script::Chunks => Ok(self.chunks.lock().pop_front().unwrap_or_default()),
            }
        }

        fn write(&self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn resize(&self, _cols: u16, _rows: u16) -> Result<(), AgentError> {
            Ok(())
        }

        fn is_alive(&self) -> bool {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            self.script != Script::Chunks || !self.chunks.lock().is_empty()
        }

        fn is_eof(&self) -> bool {
            !self.is_alive()
        }

        fn exit_status(&self) -> Option<ExitStatus> {
            None
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn settings() -> BridgeSettings {
        BridgeSettings {
            start_port: 20128,
            read_blocking: true,
            read_chunk: 4096,
            poll_interval: Duration::from_millis(20),
        }
    }

    fn collect_until_eof(bridge: &mut StreamBridge) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        while Instant::now() < deadline {
            match bridge.recv(1024).unwrap() {
                Some(chunk) if chunk.is_empty() => return out,
                Some(chunk) => out.extend_from_slice(&chunk),
                None => {}
            }
        }
        panic!("bridge never reached end of stream");
    }

    #[test]
    fn test_bind_skips_busy_port() {
        let busy = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let busy_port = busy.local_addr().unwrap().port();
        let listener = bind_loopback(busy_port).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), busy_port);
    }

    #[test]
    fn test_chunks_arrive_in_order_then_eof() {
        let agent = ReplayAgent::new(Script::Chunks, &[b"hello ", b"bridged ", b"world"]);
        let mut bridge = StreamBridge::start(agent, &settings()).unwrap();
        assert_eq!(collect_until_eof(&mut bridge), b"hello bridged world".to_vec());
        assert_eq!(bridge.recv(16).unwrap(), Some(Vec::new()));
        bridge.join();
    }

    #[test]
    fn test_recv_times_out_without_data() {
        let agent = ReplayAgent::new(Script::Silent, &[]);
        let mut bridge = StreamBridge::start(agent.clone(), &settings()).unwrap();
        let started = Instant::now();
        assert_eq!(bridge.recv(16).unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(2));

        agent.close();
        assert_eq!(collect_until_eof(&mut bridge), Vec::<u8>::new());
        bridge.join();
    }

    #[test]
    fn test_consumer_shutdown_stops_pump() {
        let agent = ReplayAgent::new(Script::Endless, &[]);
        let mut bridge = StreamBridge::start(agent.clone(), &settings()).unwrap();
        assert!(matches!(bridge.recv(1).unwrap(), Some(chunk) if chunk == b"x"));
        bridge.shutdown();
        bridge.join();
        assert!(agent.is_alive());
        assert_eq!(bridge.recv(16).unwrap(), Some(Vec::new()));
    }
}
