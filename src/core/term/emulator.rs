//! Line-editing console emulator
//!
//! Sits between keystrokes and the protocol session. Keeps the edit
//! buffer and history, renders messages by kind, and queues everything
//! that arrives before a surface is attached.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use super::render::{
    colorize, normalize_line_endings, Palette, CLEAR_LINE, CURSOR_BACK, DELETE_CHAR, NEWLINE,
};
use crate::core::session::{CommandSink, SessionEvent};
use crate::history::CommandHistory;
use crate::protocol::{FrameError, Message};
use crate::ui::Surface;

/// Keystroke units understood by the emulator
pub mod keys {
    pub const ENTER: &str = "\r";
    pub const BACKSPACE: &str = "\x7f";
    pub const ARROW_UP: &str = "\x1b[A";
    pub const ARROW_DOWN: &str = "\x1b[B";
}

/// Output held back until a surface is attached
#[derive(Debug, Clone, PartialEq)]
enum Pending {
    Message(Message),
    Notice(String),
}

/// Interactive console state
pub struct TerminalEmulator<S: Surface> {
    surface: Option<S>,
    queue: VecDeque<Pending>,
    /// Last prompt text, redrawn during history navigation
    prompt: String,
    /// Edit buffer
    line: String,
    history: CommandHistory,
    palette: Palette,
}

impl<S: Surface> TerminalEmulator<S> {
    pub fn new(history: CommandHistory, palette: Palette) -> Self {
        Self {
            surface: None,
            queue: VecDeque::new(),
            prompt: String::new(),
            line: String::new(),
            history,
            palette,
        }
    }

    /// Attach the visible surface and flush queued output in arrival order.
    ///
    /// Readiness never reverts; a second attach is ignored.
    pub fn attach(&mut self, surface: S) -> bool {
        if self.surface.is_some() {
            warn!("Surface already attached, ignoring");
            return false;
        }
        self.surface = Some(surface);

        let queued = std::mem::take(&mut self.queue);
        debug!("Surface attached, flushing {} queued items", queued.len());
        for pending in queued {
            match pending {
                Pending::Message(message) => self.render_message(&message),
                Pending::Notice(text) => self.render_notice(&text),
            }
        }
        true
    }

    pub fn is_ready(&self) -> bool {
        self.surface.is_some()
    }

    #[allow(dead_code)]
    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    #[allow(dead_code)]
    pub fn surface_mut(&mut self) -> Option<&mut S> {
        self.surface.as_mut()
    }

    #[allow(dead_code)]
    pub fn current_line(&self) -> &str {
        &self.line
    }

    #[allow(dead_code)]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[allow(dead_code)]
    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// Route one session event to the surface
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => self.handle_message(message),
            // The prompt message itself was already rendered
            SessionEvent::PromptReady(_) => {}
            SessionEvent::Diagnostic(text) => self.handle_diagnostic(&text),
            SessionEvent::ProtocolError(e) => self.handle_protocol_error(&e),
            SessionEvent::Unresponsive(elapsed) => self.handle_unresponsive(elapsed),
            SessionEvent::Closed(code) => self.handle_closed(code),
        }
    }

    pub fn handle_diagnostic(&mut self, text: &str) {
        self.notice(format!("Error from AMPL: {}", text));
    }

    pub fn handle_protocol_error(&mut self, error: &FrameError) {
        self.notice(format!("Protocol error: {}\n", error));
    }

    pub fn handle_unresponsive(&mut self, elapsed: Duration) {
        self.notice(format!("No reply from AMPL for {}s\n", elapsed.as_secs()));
    }

    pub fn handle_closed(&mut self, code: Option<i32>) {
        let text = match code {
            Some(code) => format!("AMPL exited with code {}\n", code),
            None => "AMPL exited\n".to_string(),
        };
        self.notice(text);
    }

    pub fn handle_message(&mut self, message: Message) {
        if self.is_ready() {
            self.render_message(&message);
        } else {
            self.queue.push_back(Pending::Message(message));
        }
    }

    /// Render process/protocol trouble in the error color
    pub fn notice(&mut self, text: String) {
        if self.is_ready() {
            self.render_notice(&text);
        } else {
            self.queue.push_back(Pending::Notice(text));
        }
    }

    /// Handle one keystroke unit.
    ///
    /// Send failures are rendered, never returned: the keystroke path must
    /// keep accepting input.
    pub fn handle_input(&mut self, input: &str, sink: &mut dyn CommandSink) {
        match input {
            keys::ENTER => self.commit(sink),
            keys::BACKSPACE => {
                if self.line.pop().is_some() {
                    self.write(&format!("{}{}", CURSOR_BACK, DELETE_CHAR));
                }
            }
            keys::ARROW_UP => {
                if let Some(entry) = self.history.older() {
                    self.line = entry.to_string();
                    self.redraw();
                }
            }
            keys::ARROW_DOWN => {
                match self.history.newer() {
                    Some(entry) => self.line = entry.to_string(),
                    None => self.line.clear(),
                }
                self.redraw();
            }
            _ => {
                self.line.push_str(input);
                self.write(input);
            }
        }
    }

    /// Submit `command` as if typed. Replaces any partially typed line.
    pub fn run_command(&mut self, command: &str, sink: &mut dyn CommandSink) {
        self.line = command.to_string();
        self.redraw();
        self.commit(sink);
    }

    fn commit(&mut self, sink: &mut dyn CommandSink) {
        let command = self.line.trim().to_string();
        self.line.clear();

        if command.is_empty() {
            self.write(NEWLINE);
            return;
        }

        match sink.send(&command) {
            Ok(()) => {
                self.history.push(command);
                self.write(NEWLINE);
            }
            Err(e) => {
                warn!("Failed to send {:?}: {}", command, e);
                self.write(NEWLINE);
                self.notice(format!("{}\n", e));
            }
        }
    }

    fn redraw(&mut self) {
        let text = format!("{}{}{}", CLEAR_LINE, self.prompt, self.line);
        self.write(&text);
    }

    fn render_message(&mut self, message: &Message) {
        if message.is_prompt() {
            self.prompt = message.body.clone();
            let text = colorize(&message.body, self.palette.prompt);
            self.write(&text);
        } else {
            let text = normalize_line_endings(&message.body);
            if message.is_error() {
                let text = colorize(&text, self.palette.error);
                self.write(&text);
            } else {
                self.write(&text);
            }
        }
    }

    fn render_notice(&mut self, text: &str) {
        let text = colorize(&normalize_line_endings(text), self.palette.error);
        self.write(&text);
    }

    /// Output written before attach has nowhere to go and is dropped
    fn write(&mut self, text: &str) {
        if let Some(surface) = self.surface.as_mut() {
            surface.write(text);
        }
    }
}
