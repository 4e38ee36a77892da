//! Control protocol framing.
//!
//! Commands are single ASCII lines terminated by CRLF. Replies are one or
//! more lines of the form `NNN<sep><text>` where `<sep>` is:
//!
//! - `-` for a mid-reply line,
//! - `+` for a line that opens a data block, continued by raw lines up to a
//!   lone `.`,
//! - ` ` for the final line of the reply.
//!
//! [`ReplyParser`] is fed one line at a time and hands back a [`Reply`] once
//! the final line arrives, so framing can be tested without a socket.

use crate::error::{Error, Result};

/// Status code for a successful reply.
pub const CODE_OK: u16 = 250;

/// One logical line of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// Status code of the line.
    pub code: u16,
    /// Text after the separator. For data lines this is the text on the
    /// opening line only (usually `key=`).
    pub text: String,
    /// Contents of a `+` data block, lines joined with `\n`.
    pub data: Option<String>,
}

/// A complete control-port reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code of the final line.
    pub code: u16,
    /// All lines, final line last.
    pub lines: Vec<ReplyLine>,
}

impl Reply {
    /// Whether the reply reports success.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    /// Text of the final line, e.g. `OK` or an error message.
    pub fn message(&self) -> &str {
        self.lines.last().map(|l| l.text.as_str()).unwrap_or_default()
    }

    /// Value of `key=value` from any line form.
    ///
    /// Data-block values are returned whole; quoted single-line values are
    /// returned verbatim.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let rest = line.text.strip_prefix(key)?.strip_prefix('=')?;
            match &line.data {
                Some(data) => Some(data.as_str()),
                None => Some(rest),
            }
        })
    }

    /// First line as `CODE text`, for error messages.
    pub fn summary(&self) -> String {
        match self.lines.first() {
            Some(first) => format!("{} {}", first.code, first.text),
            None => self.code.to_string(),
        }
    }
}

/// Encode a command as a CRLF-terminated line.
///
/// Embedded line breaks would let one command smuggle a second one onto the
/// connection, so they are rejected.
pub fn encode_command(cmd: &str) -> Result<Vec<u8>> {
    if cmd.contains(['\r', '\n']) {
        return Err(Error::Protocol(
            "control command must not contain line breaks".into(),
        ));
    }
    let mut line = Vec::with_capacity(cmd.len() + 2);
    line.extend_from_slice(cmd.as_bytes());
    line.extend_from_slice(b"\r\n");
    Ok(line)
}

/// Quote a string for use as a control-protocol QuotedString.
pub fn quote_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Incremental reply decoder.
#[derive(Debug, Default)]
pub struct ReplyParser {
    lines: Vec<ReplyLine>,
    /// Data block being collected for the last `+` line.
    data: Option<Vec<String>>,
}

impl ReplyParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a data block is currently open.
    pub fn in_data_block(&self) -> bool {
        self.data.is_some()
    }

    /// Feed one line without its CRLF.
    ///
    /// Returns the full reply when `line` was the final line.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Reply>> {
        if let Some(block) = self.data.as_mut() {
            if line == "." {
                let joined = block.join("\n");
                self.data = None;
                if let Some(last) = self.lines.last_mut() {
                    last.data = Some(joined);
                }
            } else {
                // Dot-stuffing: a data line starting with '.' is sent as "..".
                let unescaped = line.strip_prefix('.').filter(|r| r.starts_with('.'));
                block.push(unescaped.unwrap_or(line).to_string());
            }
            return Ok(None);
        }

        let (code, sep, text) = split_status_line(line)?;
        if let Some(first) = self.lines.first() {
            if first.code != code {
                return Err(Error::Protocol(format!(
                    "protocol violation: mismatched status codes {} and {}",
                    first.code, code
                )));
            }
        }

        self.lines.push(ReplyLine {
            code,
            text: text.to_string(),
            data: None,
        });

        match sep {
            b'-' => Ok(None),
            b'+' => {
                self.data = Some(Vec::new());
                Ok(None)
            }
            _ => {
                let lines = std::mem::take(&mut self.lines);
                Ok(Some(Reply { code, lines }))
            }
        }
    }
}

/// Split `NNN<sep>text` into its parts.
fn split_status_line(line: &str) -> Result<(u16, u8, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(Error::Protocol(format!(
            "protocol violation: malformed reply line {:?}",
            line
        )));
    }
    let sep = bytes[3];
    if !matches!(sep, b'-' | b'+' | b' ') {
        return Err(Error::Protocol(format!(
            "protocol violation: bad separator in {:?}",
            line
        )));
    }
    // The first three bytes are ASCII digits, so this cannot fail.
    let code = line[..3]
        .parse()
        .map_err(|_| Error::Protocol(format!("protocol violation: bad code in {:?}", line)))?;
    Ok((code, sep, &line[4..]))
}

/// Tokenize a line into space separated words, keeping `"quoted strings"`
/// (with backslash escapes) together.
pub fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
