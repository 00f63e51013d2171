//! Streaming frame parser
//!
//! Rebuilds typed messages from the child's stdout. Input arrives in
//! arbitrary chunks, so the parser keeps raw bytes until a whole frame is
//! present. Lengths are byte counts, which also means a chunk boundary in
//! the middle of a multi-byte character is harmless.

use thiserror::Error;

use super::wire::{is_error_kind, is_prompt_kind, FINAL_PROMPT};

/// Largest body length accepted from a frame header (64 MiB).
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame header: {header:?}")]
    Malformed { header: String },

    #[error("Frame length {length} exceeds maximum {max} bytes", max = MAX_BODY_SIZE)]
    Oversized { length: usize },
}

/// One decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol tag, e.g. `prompt1` or `error`
    pub kind: String,
    /// Payload text
    pub body: String,
}

impl Message {
    pub fn new(kind: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: body.into(),
        }
    }

    pub fn is_prompt(&self) -> bool {
        is_prompt_kind(&self.kind)
    }

    pub fn is_error(&self) -> bool {
        is_error_kind(&self.kind)
    }

    pub fn is_final_prompt(&self) -> bool {
        self.kind == FINAL_PROMPT
    }
}

/// How a parse pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The buffer holds no further complete frame
    Awaiting,
    /// Stopped right after a final prompt. Frames behind it stay buffered
    /// until `resume` or the next `feed`.
    Prompted,
}

/// Frame parser state machine
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and emit every complete frame, in order.
    ///
    /// Parsing stops after a `prompt1` frame even when more frames are
    /// already buffered: AMPL sends one round of output per command, and
    /// the caller paces the next round with `resume`.
    ///
    /// On a malformed header the whole buffer is discarded. Messages emitted
    /// earlier in the same call have already been delivered.
    pub fn feed<F>(&mut self, chunk: &[u8], emit: F) -> Result<Progress, FrameError>
    where
        F: FnMut(Message),
    {
        self.buffer.extend_from_slice(chunk);
        self.parse(emit)
    }

    /// Continue parsing buffered bytes without new input.
    pub fn resume<F>(&mut self, emit: F) -> Result<Progress, FrameError>
    where
        F: FnMut(Message),
    {
        self.parse(emit)
    }

    /// Number of buffered bytes not yet consumed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered
    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn parse<F>(&mut self, mut emit: F) -> Result<Progress, FrameError>
    where
        F: FnMut(Message),
    {
        loop {
            let Some(space) = find_byte(&self.buffer, b' ', 0) else {
                return Ok(Progress::Awaiting);
            };

            let length = match parse_length(&self.buffer[..space]) {
                Ok(length) => length,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            };

            let Some(newline) = find_byte(&self.buffer, b'\n', space + 1) else {
                return Ok(Progress::Awaiting);
            };

            let frame_end = newline + 1 + length;
            if self.buffer.len() < frame_end {
                return Ok(Progress::Awaiting);
            }

            let kind = String::from_utf8_lossy(&self.buffer[space + 1..newline]).into_owned();
            let body = String::from_utf8_lossy(&self.buffer[newline + 1..frame_end]).into_owned();
            self.buffer.drain(..frame_end);

            tracing::trace!("Frame: kind={:?}, {} bytes", kind, length);

            let message = Message { kind, body };
            let stop = message.is_final_prompt();
            emit(message);

            if stop {
                return Ok(Progress::Prompted);
            }
        }
    }
}

fn find_byte(buffer: &[u8], needle: u8, from: usize) -> Option<usize> {
    buffer[from..]
        .iter()
        .position(|&b| b == needle)
        .map(|pos| pos + from)
}

fn parse_length(header: &[u8]) -> Result<usize, FrameError> {
    let malformed = || FrameError::Malformed {
        header: String::from_utf8_lossy(header).into_owned(),
    };

    if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
        return Err(malformed());
    }

    // All ASCII digits, so the only possible failure is overflow
    let length: usize = std::str::from_utf8(header)
        .map_err(|_| malformed())?
        .parse()
        .map_err(|_| malformed())?;

    if length > MAX_BODY_SIZE {
        return Err(FrameError::Oversized { length });
    }
    Ok(length)
}
