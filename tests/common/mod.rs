//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_agent;

use ptystream::{PtyConfig, PtyError, PtyProcess};
use std::time::{Duration, Instant};

/// Config with short settle delays so lifecycle tests stay fast.
pub fn fast_config() -> PtyConfig {
    PtyConfig {
        delay_after_terminate_ms: 20,
        delay_after_close_ms: 10,
        poll_interval_ms: 20,
        ..PtyConfig::default()
    }
}

/// Absolute path of the running test binary; always resolvable.
pub fn resolvable_program() -> String {
    std::env::current_exe()
        .expect("current_exe")
        .to_string_lossy()
        .into_owned()
}

/// Read until end of stream, failing the test after `timeout`.
pub fn read_until_eof(process: &mut PtyProcess, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut output = String::new();
    while Instant::now() < deadline {
        match process.read(1024) {
            Ok(text) => output.push_str(&text),
            Err(PtyError::EndOfStream) => return output,
            Err(e) => panic!("read failed: {e}"),
        }
    }
    panic!("no end of stream within {timeout:?}; got {output:?}");
}

/// Read until `needle` shows up, failing the test after `timeout`.
pub fn read_until_contains(process: &mut PtyProcess, needle: &str, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut output = String::new();
    while Instant::now() < deadline {
        match process.read(1024) {
            Ok(text) => output.push_str(&text),
            Err(e) => panic!("read failed before {needle:?} arrived: {e}; got {output:?}"),
        }
        if output.contains(needle) {
            return output;
        }
    }
    panic!("{needle:?} not seen within {timeout:?}; got {output:?}");
}
