use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`PtyProcess`](crate::PtyProcess) and its stream bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtyConfig {
    /// Settle time after a signal before liveness is re-checked (default: 100).
    #[serde(default = "default_delay_after_terminate_ms")]
    pub delay_after_terminate_ms: u64,
    /// Settle time after the stream is closed (default: 100).
    #[serde(default = "default_delay_after_close_ms")]
    pub delay_after_close_ms: u64,
    /// Upper bound for a single wait on the bridge channel (default: 100).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Whether the pump's native reads wait for data (default: true).
    #[serde(default = "default_read_blocking")]
    pub read_blocking: bool,
    /// First loopback port tried by the bridge (default: 20128).
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,
    /// Maximum bytes requested per native read (default: 4096).
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Default terminal rows (default: 24).
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Default terminal columns (default: 80).
    #[serde(default = "default_cols")]
    pub cols: u16,
}

fn default_delay_after_terminate_ms() -> u64 {
    100
}

fn default_delay_after_close_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_read_blocking() -> bool {
    true
}

fn default_bridge_port() -> u16 {
    20128
}

fn default_read_chunk() -> usize {
    4096
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            delay_after_terminate_ms: default_delay_after_terminate_ms(),
            delay_after_close_ms: default_delay_after_close_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            read_blocking: default_read_blocking(),
            bridge_port: default_bridge_port(),
            read_chunk: default_read_chunk(),
            rows: default_rows(),
            cols: default_cols(),
        }
    }
}

impl PtyConfig {
    pub fn delay_after_terminate(&self) -> Duration {
        Duration::from_millis(self.delay_after_terminate_ms)
    }

    pub fn delay_after_close(&self) -> Duration {
        Duration::from_millis(self.delay_after_close_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Dimensions as `(rows, cols)`.
    pub fn dimensions(&self) -> (u16, u16) {
        (self.rows, self.cols)
    }
}
