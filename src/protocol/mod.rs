//! AMPL batch-protocol framing.
//!
//! The AMPL binary started with `-b` speaks a length-prefixed protocol on
//! its stdio pipes:
//!
//! - **wire**: reserved kind tags and outbound command encoding
//! - **frame**: streaming parser that rebuilds messages from stdout bytes
//!
//! # Wire Format
//!
//! ```text
//! <byte-length> <kind>\n
//! <body of exactly byte-length bytes>
//! ```
//!
//! Commands sent to the child use the same length prefix without a kind:
//!
//! ```text
//! <byte-length> <command>
//! ```

pub mod frame;
pub mod wire;

pub use frame::{FrameError, FrameParser, Message, Progress};
pub use wire::encode_command;
