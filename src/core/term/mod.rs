//! Console emulation: edit state, history navigation and output rendering

pub mod emulator;
pub mod render;

pub use emulator::{keys, TerminalEmulator};
pub use render::Palette;
