//! Byte-level content cleaning
//!
//! Two directions:
//! - Ingress: [`clean_content`] reduces uploaded bytes to printable ASCII,
//!   newlines and tabs, with line endings normalized to LF
//! - Egress: [`strip_control_sequences`] removes terminal escape sequences
//!   from command output before it is handed back to a client

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`) and two-byte escapes
static ESCAPE_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("escape sequence pattern is valid")
});

/// Check whether a byte survives [`clean_content`]
#[inline]
#[must_use]
pub fn is_permitted_byte(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\t' | 0x20..=0x7e)
}

/// Normalize line endings and strip everything outside the whitelist
///
/// CRLF and lone CR both become LF before filtering, so a CR is never
/// silently dropped from the middle of a line. The result contains only
/// printable ASCII, `\n` and `\t`, which makes the function idempotent.
#[must_use]
pub fn clean_content(raw: &[u8]) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    let mut bytes = raw.iter().copied().peekable();

    while let Some(byte) = bytes.next() {
        if byte == b'\r' {
            if bytes.peek() == Some(&b'\n') {
                bytes.next();
            }
            cleaned.push('\n');
        } else if is_permitted_byte(byte) {
            cleaned.push(char::from(byte));
        }
    }

    cleaned
}

/// Remove terminal control sequences from command output
///
/// ANSI escape sequences are removed whole; remaining C0 control characters
/// other than `\n` and `\t` are dropped, and CRLF collapses to LF.
#[must_use]
pub fn strip_control_sequences(text: &str) -> String {
    let without_escapes = ESCAPE_SEQUENCE.replace_all(text, "");
    without_escapes
        .replace("\r\n", "\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}
