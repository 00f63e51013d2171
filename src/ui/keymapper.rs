//! Key mapping for console input
//!
//! Converts crossterm key events to the keystroke units the emulator
//! consumes: one visible character or one recognized control sequence.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::term::keys;

/// Key mapper for converting key events to keystroke units
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to a keystroke unit.
    ///
    /// Control and Alt chords are not editing keys and map to `None`; the
    /// main loop handles the ones it cares about (Ctrl+C, Ctrl+D).
    pub fn map(event: &KeyEvent) -> Option<String> {
        let chord = event.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT);

        match event.code {
            KeyCode::Char(ch) if !chord => Some(ch.to_string()),
            KeyCode::Enter => Some(keys::ENTER.to_string()),
            KeyCode::Backspace => Some(keys::BACKSPACE.to_string()),
            KeyCode::Up if !chord => Some(keys::ARROW_UP.to_string()),
            KeyCode::Down if !chord => Some(keys::ARROW_DOWN.to_string()),
            _ => None,
        }
    }

    /// Split pasted text into keystroke units.
    ///
    /// Every line break (`\r`, `\n` or `\r\n`) becomes Enter, so a pasted
    /// block is submitted line by line. Tabs become single spaces.
    pub fn map_paste(text: &str) -> Vec<String> {
        let mut units = Vec::with_capacity(text.len());
        let mut chars = text.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    units.push(keys::ENTER.to_string());
                }
                '\n' => units.push(keys::ENTER.to_string()),
                '\t' => units.push(" ".to_string()),
                _ => units.push(ch.to_string()),
            }
        }
        units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some("a".to_string()));

        let event = key_event(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event), Some("A".to_string()));

        let event = key_event(KeyCode::Char('é'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some("é".to_string()));

        // Ctrl+C / Alt+x are left to the main loop
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), None);
        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_editing_keys() {
        let event = key_event(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event).as_deref(), Some(keys::ENTER));

        let event = key_event(KeyCode::Backspace, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event).as_deref(), Some(keys::BACKSPACE));

        // Tab is not an editing key
        let event = key_event(KeyCode::Tab, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_arrow_keys() {
        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some("\x1b[A".to_string()));

        let event = key_event(KeyCode::Down, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some("\x1b[B".to_string()));

        // No line editing for horizontal movement or modified arrows
        let event = key_event(KeyCode::Left, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), None);
        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_paste_line_breaks() {
        assert_eq!(
            KeyMapper::map_paste("ab\r\nc\nd\r"),
            vec!["a", "b", "\r", "c", "\r", "d", "\r"]
        );
        assert_eq!(KeyMapper::map_paste("a\tb"), vec!["a", " ", "b"]);
    }
}
