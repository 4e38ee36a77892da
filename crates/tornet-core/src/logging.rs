//! Logging helpers that keep credentials and destinations out of log output.
//!
//! The client logs through `tracing`; anything that may identify the user
//! (control passwords, auth cookies, onion addresses) is wrapped in one of
//! these types before it reaches a log field.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a target host.
///
/// Onion addresses keep their first 4 characters and the `.onion` suffix;
/// other hosts are shown as-is.
pub struct RedactedHost<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedHost<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        match s.strip_suffix(".onion") {
            Some(label) if label.len() > 8 => match label.get(..4) {
                Some(prefix) => write!(f, "{}...onion", prefix),
                None => write!(f, "[REDACTED ONION]"),
            },
            Some(_) => write!(f, "[REDACTED ONION]"),
            None => write!(f, "{}", s),
        }
    }
}

impl<'a> fmt::Debug for RedactedHost<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Control commands whose arguments are credentials.
const SENSITIVE_COMMANDS: &[&str] = &["AUTHENTICATE", "AUTHCHALLENGE"];

/// Sanitize a control command line for logging.
///
/// Arguments of credential-carrying commands are replaced; other commands
/// are returned unchanged (minus the trailing CRLF).
pub fn sanitize_command(cmd: &str) -> String {
    let cmd = cmd.trim_end_matches(['\r', '\n']);
    let keyword = cmd.split(' ').next().unwrap_or_default();
    if SENSITIVE_COMMANDS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(keyword))
        && cmd.len() > keyword.len()
    {
        format!("{} [REDACTED]", keyword)
    } else {
        cmd.to_string()
    }
}
