//! User interface input and output.
//!
//! - **keymapper**: crossterm key events to keystroke units
//! - **surface**: text sinks the console renders onto

pub mod keymapper;
pub mod surface;

pub use keymapper::KeyMapper;
pub use surface::{StdoutSurface, Surface};
