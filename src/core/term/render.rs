//! Output formatting for the console surface

/// Move the cursor one column left
pub const CURSOR_BACK: &str = "\x1b[D";
/// Delete the character under the cursor
pub const DELETE_CHAR: &str = "\x1b[P";
/// Move to column 0 and erase the whole line
pub const CLEAR_LINE: &str = "\x1b[0G\x1b[2K";
/// Line break written after a committed command
pub const NEWLINE: &str = "\r\n";

/// ANSI colors (30 + n) used for highlighted output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub prompt: u8,
    pub error: u8,
}

impl Default for Palette {
    fn default() -> Self {
        // white prompt, red errors
        Self { prompt: 7, error: 1 }
    }
}

/// Wrap text in a foreground color and reset afterwards
pub fn colorize(text: &str, color: u8) -> String {
    format!("\x1b[3{}m{}\x1b[0m", color.min(7), text)
}

/// Re-anchor every line at column 0.
///
/// AMPL output uses bare `\n` or `\r\n`; in raw mode a bare line feed
/// would leave the cursor mid-row. Each separator becomes `\r<sep>\r` and
/// the whole text is framed by carriage returns.
pub fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    out.push('\r');

    let mut rest = text;
    while let Some(pos) = rest.find('\n') {
        let (line, sep) = match rest[..pos].strip_suffix('\r') {
            Some(line) => (line, "\r\n"),
            None => (&rest[..pos], "\n"),
        };
        out.push_str(line);
        out.push('\r');
        out.push_str(sep);
        out.push('\r');
        rest = &rest[pos + 1..];
    }

    out.push_str(rest);
    out.push('\r');
    out
}
