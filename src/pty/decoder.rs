//! Incremental UTF-8 decoding for pty output.
//!
//! Native reads cut the byte stream at arbitrary points, so a multi-byte
//! character can straddle two chunks. The decoder keeps the incomplete tail
//! and prefixes it to the next chunk.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("stream ended inside a multi-byte sequence ({} pending bytes)", pending.len())]
pub struct DecodeError {
    pub pending: Vec<u8>,
}

/// Stateful byte-to-text decoder.
#[derive(Debug, Default)]
pub struct IncrementalDecoder {
    pending: Vec<u8>,
}

impl IncrementalDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back from the previous call.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Decode as many complete characters as possible.
    ///
    /// An incomplete sequence at the end of the input is retained. Invalid
    /// bytes in the middle of the stream become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete trailing sequence.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Flush the decoder at end of stream.
    ///
    /// Fails if a partial sequence is still pending. The state is cleared
    /// either way.
    pub fn finish(&mut self) -> Result<String, DecodeError> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }
        Err(DecodeError {
            pending: std::mem::take(&mut self.pending),
        })
    }
}
