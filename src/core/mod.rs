//! Core AMPL process plumbing.
//!
//! - **channel**: child process spawning and stdio pipe reader threads
//! - **session**: protocol session combining a channel with frame parsing
//! - **term**: line-editing console that renders session output
//!
//! # Architecture
//!
//! ```text
//! ProtocolSession
//! ├── Channel (stdin writer, stdout/stderr reader threads)
//! └── FrameParser (stdout bytes -> messages)
//!
//! TerminalEmulator
//! ├── edit buffer + CommandHistory
//! └── Surface (rendered output)
//! ```

pub mod channel;
pub mod session;
pub mod term;
