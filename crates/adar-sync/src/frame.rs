//! Sentinel framing for the control channel stream.

use bytes::{Bytes, BytesMut};

use crate::error::{Result, SyncError};
use crate::messages::{MAX_FRAME, SENTINEL};

/// Accumulates stream reads and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spare capacity to read into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        if self.buf.capacity() - self.buf.len() < 4096 {
            self.buf.reserve(4096);
        }
        &mut self.buf
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// The next complete frame without its sentinel.
    ///
    /// Errors once more than [`MAX_FRAME`] bytes are pending without a
    /// sentinel; the pending bytes are discarded.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        match self.buf.iter().position(|b| *b == SENTINEL) {
            Some(end) => {
                let mut frame = self.buf.split_to(end + 1);
                frame.truncate(end);
                Ok(Some(frame.freeze()))
            }
            None if self.buf.len() > MAX_FRAME => {
                let size = self.buf.len();
                self.buf.clear();
                Err(SyncError::FrameTooLarge {
                    size,
                    limit: MAX_FRAME,
                })
            }
            None => Ok(None),
        }
    }

    /// True if unterminated bytes are pending.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
