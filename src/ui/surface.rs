//! Rendering surfaces
//!
//! A surface is a write-only text sink. Text is shown verbatim, including
//! cursor movement and color escapes.

use std::io::{self, Write};

use tracing::error;

pub trait Surface {
    fn write(&mut self, text: &str);
}

/// In-memory surface, useful for capturing output
impl Surface for String {
    fn write(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// The real terminal (stdout in raw mode)
pub struct StdoutSurface {
    out: io::Stdout,
}

impl StdoutSurface {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for StdoutSurface {
    fn write(&mut self, text: &str) {
        let mut lock = self.out.lock();
        if let Err(e) = lock.write_all(text.as_bytes()).and_then(|()| lock.flush()) {
            error!("Failed to write to terminal: {}", e);
        }
    }
}
