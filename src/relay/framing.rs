//! Inbound message framing

use bytes::{Bytes, BytesMut};

use crate::config::FramingMode;
use crate::protocol::constants::LINE_DELIMITER;

/// Cuts a connection's inbound byte stream into relayable messages.
#[derive(Debug)]
pub struct MessageFramer {
    mode: FramingMode,
    max_len: usize,
    pending: BytesMut,
}

impl MessageFramer {
    /// `max_len` bounds the size of one line in [`FramingMode::Line`]
    pub fn new(mode: FramingMode, max_len: usize) -> Self {
        Self {
            mode,
            max_len: max_len.max(1),
            pending: BytesMut::new(),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Feed one read's worth of bytes, returning the messages it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if chunk.is_empty() {
            return Vec::new();
        }

        match self.mode {
            FramingMode::Chunk => vec![Bytes::copy_from_slice(chunk)],
            FramingMode::Line => {
                self.pending.extend_from_slice(chunk);
                let mut messages = Vec::new();

                loop {
                    let window = self.pending.len().min(self.max_len);
                    let cut = match self.pending[..window].iter().position(|&b| b == LINE_DELIMITER) {
                        Some(pos) => pos + 1,
                        // An over-long line goes out in fragments
                        None if self.pending.len() >= self.max_len => self.max_len,
                        None => break,
                    };
                    messages.push(self.pending.split_to(cut).freeze());
                }

                messages
            }
        }
    }

    /// Flush an unterminated trailing line, if any
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }
}
