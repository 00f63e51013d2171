//! Reserved kinds and outbound encoding

/// Kind sent when AMPL is idle and waiting for the next command.
pub const FINAL_PROMPT: &str = "prompt1";

/// Prefix shared by every prompt kind (`prompt1`, `prompt2`, ...).
const PROMPT_FAMILY: &str = "prompt";

/// Prefix shared by every error kind.
const ERROR_FAMILY: &str = "error";

pub fn is_prompt_kind(kind: &str) -> bool {
    kind.starts_with(PROMPT_FAMILY)
}

pub fn is_error_kind(kind: &str) -> bool {
    kind.starts_with(ERROR_FAMILY)
}

/// Encode a command for the child's stdin.
///
/// The prefix counts UTF-8 bytes, not characters. No newline is appended.
pub fn encode_command(command: &str) -> Vec<u8> {
    let body = command.as_bytes();
    let mut out = format!("{} ", body.len()).into_bytes();
    out.extend_from_slice(body);
    out
}
