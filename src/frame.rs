//! Frame decoder for the device's line protocol.
//!
//! The keyboard firmware writes one command per physical write, terminated by
//! `\r\n`.  Serial delivery does not respect those writes: a single command
//! may arrive in several chunks, and the terminator itself may be split
//! between two chunks.  [`FrameDecoder`] accumulates text across
//! [`feed`](FrameDecoder::feed) calls and yields a [`Frame`] once the buffer
//! ends with the terminator.
//!
//! Only the *end* of the buffer is checked.  Two commands concatenated in one
//! chunk are therefore delivered as a single frame with an embedded `\r\n`,
//! which the dispatcher later rejects.

use std::fmt;

/// The two-character frame terminator (`CR LF`).
pub const TERMINATOR: &str = "\r\n";

/// A complete command line with the terminator stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The frame as it appears on the wire, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.0.len() + TERMINATOR.len());
        bytes.extend_from_slice(self.0.as_bytes());
        bytes.extend_from_slice(TERMINATOR.as_bytes());
        bytes
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A chunk that is not valid UTF-8.
///
/// The chunk is dropped and the receive buffer is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("received data is not valid UTF-8 ({len} bytes dropped): {reason}")]
pub struct DecodeError {
    pub len: usize,
    pub reason: String,
}

/// Accumulates incoming bytes into [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    /// Trailing bytes of an incomplete multi-byte character, completed by
    /// the next chunk.
    partial: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return the frames completed by them.
    ///
    /// The returned iterator is lazy: each call to `next` checks whether the
    /// buffer ends with [`TERMINATOR`].  Anything not yet terminated stays
    /// buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Frames<'_>, DecodeError> {
        let mut pending = std::mem::take(&mut self.partial);
        pending.extend_from_slice(bytes);

        match std::str::from_utf8(&pending) {
            Ok(text) => self.buffer.push_str(text),
            Err(e) if e.error_len().is_none() => {
                // The chunk ends inside a character.
                let valid = e.valid_up_to();
                let (head, tail) = pending.split_at(valid);
                self.buffer
                    .push_str(std::str::from_utf8(head).unwrap_or_default());
                self.partial = tail.to_vec();
            }
            Err(e) => {
                return Err(DecodeError {
                    len: bytes.len(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(Frames { decoder: self })
    }

    /// Text received since the last emitted frame.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Discard everything buffered.  Called when a connection epoch ends.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.partial.clear();
    }

    fn take_frame(&mut self) -> Option<Frame> {
        if !self.buffer.ends_with(TERMINATOR) {
            return None;
        }
        self.buffer.truncate(self.buffer.len() - TERMINATOR.len());
        Some(Frame(std::mem::take(&mut self.buffer)))
    }
}

/// Frames completed by a single [`FrameDecoder::feed`] call.
#[derive(Debug)]
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.decoder.take_frame()
    }
}

//  Tests
