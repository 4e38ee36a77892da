//! Circuit and stream records reported by the control port.
//!
//! Parsing follows the `circuit-status` / `stream-status` line formats:
//!
//! ```text
//! CircuitID SP CircStatus [SP Path] [SP KEY=VALUE ...]
//! StreamID SP StreamStatus SP CircuitID SP Target [SP KEY=VALUE ...]
//! ```
//!
//! State tokens this client does not know map to `Unknown` so that a newer
//! Tor does not break the whole listing.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Circuit state as reported by Tor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Token not recognized.
    Unknown,
    /// Circuit ID assigned, nothing built yet.
    Launched,
    /// All hops built, usable for streams.
    Built,
    /// One more hop completed.
    Extended,
    /// Circuit closed before it was built.
    Failed,
    /// Circuit closed.
    Closed,
}

impl CircuitState {
    /// Map a control-port token to a state.
    pub fn from_token(token: &str) -> Self {
        match token {
            "LAUNCHED" => CircuitState::Launched,
            "BUILT" => CircuitState::Built,
            "EXTENDED" => CircuitState::Extended,
            "FAILED" => CircuitState::Failed,
            "CLOSED" => CircuitState::Closed,
            _ => CircuitState::Unknown,
        }
    }

    /// Whether the circuit still counts against the live-circuit budget.
    pub fn is_live(&self) -> bool {
        !matches!(self, CircuitState::Failed | CircuitState::Closed)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Unknown => "UNKNOWN",
            CircuitState::Launched => "LAUNCHED",
            CircuitState::Built => "BUILT",
            CircuitState::Extended => "EXTENDED",
            CircuitState::Failed => "FAILED",
            CircuitState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Stream state as reported by Tor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Token not recognized.
    Unknown,
    /// New request to connect.
    New,
    /// New request to resolve an address.
    NewResolve,
    /// Address re-mapped to another.
    Remap,
    /// Sent a connect cell along a circuit.
    SentConnect,
    /// Sent a resolve cell along a circuit.
    SentResolve,
    /// Received a reply; stream established.
    Succeeded,
    /// Stream failed and is not retriable.
    Failed,
    /// Stream closed.
    Closed,
}

impl StreamState {
    /// Map a control-port token to a state.
    pub fn from_token(token: &str) -> Self {
        match token {
            "NEW" => StreamState::New,
            "NEWRESOLVE" | "NEWRESOLV" => StreamState::NewResolve,
            "REMAP" => StreamState::Remap,
            "SENTCONNECT" => StreamState::SentConnect,
            "SENTRESOLVE" => StreamState::SentResolve,
            "SUCCEEDED" => StreamState::Succeeded,
            "FAILED" => StreamState::Failed,
            "CLOSED" => StreamState::Closed,
            _ => StreamState::Unknown,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamState::Unknown => "UNKNOWN",
            StreamState::New => "NEW",
            StreamState::NewResolve => "NEWRESOLVE",
            StreamState::Remap => "REMAP",
            StreamState::SentConnect => "SENTCONNECT",
            StreamState::SentResolve => "SENTRESOLVE",
            StreamState::Succeeded => "SUCCEEDED",
            StreamState::Failed => "FAILED",
            StreamState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// A circuit known to the Tor daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitInfo {
    /// Circuit ID, unique within one control session.
    pub circuit_id: u32,
    /// Current state.
    pub state: CircuitState,
    /// Relay fingerprints, entry first. Empty if not reported.
    pub path: Vec<String>,
    /// Circuit purpose (e.g. `GENERAL`).
    pub purpose: String,
    /// When Tor created the circuit, or when it was first seen.
    pub created_at: DateTime<Utc>,
    /// Bytes read on this circuit.
    pub bytes_read: u64,
    /// Bytes written on this circuit.
    pub bytes_written: u64,
}

impl CircuitInfo {
    /// Create a record with no path and default purpose.
    pub fn new(circuit_id: u32, state: CircuitState) -> Self {
        Self {
            circuit_id,
            state,
            path: Vec::new(),
            purpose: "GENERAL".to_string(),
            created_at: Utc::now(),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Parse one `circuit-status` line. Returns `None` if the line has no
    /// numeric circuit ID.
    pub fn parse_status_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().peekable();
        let circuit_id = words.next()?.parse().ok()?;
        let state = words
            .next()
            .map(CircuitState::from_token)
            .unwrap_or(CircuitState::Unknown);

        let mut info = Self::new(circuit_id, state);
        // The path is positional and hops may be written `$FP=nick`, so it
        // has to be taken before the KEY=VALUE pairs.
        if let Some(path) = words.next_if(|word| word.starts_with('$')) {
            info.path = parse_path(path);
        }
        for word in words {
            match word.split_once('=') {
                Some(("PURPOSE", purpose)) => info.purpose = purpose.to_string(),
                Some(("TIME_CREATED", ts)) => {
                    if let Some(created) = parse_time(ts) {
                        info.created_at = created;
                    }
                }
                Some(_) => {}
                None if info.path.is_empty() => info.path = parse_path(word),
                None => {}
            }
        }
        Some(info)
    }
}

/// A stream known to the Tor daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Stream ID.
    pub stream_id: u32,
    /// Circuit carrying the stream; 0 if not yet attached.
    pub circuit_id: u32,
    /// Current state.
    pub state: StreamState,
    /// Destination host.
    pub target_host: String,
    /// Destination port; 0 if not reported.
    pub target_port: u16,
    /// When the stream was first seen.
    pub created_at: DateTime<Utc>,
    /// Bytes read on this stream.
    pub bytes_read: u64,
    /// Bytes written on this stream.
    pub bytes_written: u64,
}

impl StreamInfo {
    /// Parse one `stream-status` line. Returns `None` if the IDs are not
    /// numeric.
    pub fn parse_status_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let stream_id = words.next()?.parse().ok()?;
        let state = StreamState::from_token(words.next()?);
        let circuit_id = words.next()?.parse().ok()?;
        let target = words.next().unwrap_or_default();

        let (target_host, target_port) = match target.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(0)),
            None => (target.to_string(), 0),
        };

        Some(Self {
            stream_id,
            circuit_id,
            state,
            target_host,
            target_port,
            created_at: Utc::now(),
            bytes_read: 0,
            bytes_written: 0,
        })
    }
}

/// Parse every line of a `circuit-status` value.
pub fn parse_circuit_status(value: &str) -> Vec<CircuitInfo> {
    parse_lines(value, CircuitInfo::parse_status_line)
}

/// Parse every line of a `stream-status` value.
pub fn parse_stream_status(value: &str) -> Vec<StreamInfo> {
    parse_lines(value, StreamInfo::parse_status_line)
}

fn parse_lines<T>(value: &str, parse: fn(&str) -> Option<T>) -> Vec<T> {
    value
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            let parsed = parse(line);
            if parsed.is_none() {
                tracing::debug!(line, "Skipping unparsable status line");
            }
            parsed
        })
        .collect()
}

/// `$FP~nick,$FP=nick,...` to a list of fingerprints.
fn parse_path(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|hop| !hop.is_empty())
        .map(|hop| {
            let hop = hop.trim_start_matches('$');
            hop.split(['~', '=']).next().unwrap_or(hop).to_string()
        })
        .collect()
}

fn parse_time(ts: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_circuit_line_round_trips_id() {
        let line = "16 BUILT $AAAA~alpha,$BBBB=beta,$CCCC PURPOSE=GENERAL \
                    TIME_CREATED=2024-03-01T12:30:45.123456";
        let info = CircuitInfo::parse_status_line(line).unwrap();
        assert_eq!(info.circuit_id, 16);
        assert_eq!(info.state, CircuitState::Built);
        assert_eq!(info.path, vec!["AAAA", "BBBB", "CCCC"]);
        assert_eq!(info.purpose, "GENERAL");
        assert_eq!(info.created_at.year(), 2024);
        assert_eq!(info.created_at.minute(), 30);
    }

    #[test]
    fn test_path_with_equals_nickname_separator() {
        let line = "7 EXTENDED $1111=guard,$2222=middle PURPOSE=GENERAL";
        let info = CircuitInfo::parse_status_line(line).unwrap();
        assert_eq!(info.path, vec!["1111", "2222"]);
        assert_eq!(info.purpose, "GENERAL");

        let info = CircuitInfo::parse_status_line("8 BUILT $3333=exit").unwrap();
        assert_eq!(info.path, vec!["3333"]);
    }

    #[test]
    fn test_unknown_circuit_state_maps_to_unknown() {
        let info = CircuitInfo::parse_status_line("3 GUARD_WAIT").unwrap();
        assert_eq!(info.circuit_id, 3);
        assert_eq!(info.state, CircuitState::Unknown);
        assert!(info.path.is_empty());

        let info = CircuitInfo::parse_status_line("4").unwrap();
        assert_eq!(info.state, CircuitState::Unknown);
    }

    #[test]
    fn test_launched_circuit_without_path() {
        let info =
            CircuitInfo::parse_status_line("5 LAUNCHED BUILD_FLAGS=NEED_CAPACITY PURPOSE=CONFLUX_LINKED")
                .unwrap();
        assert_eq!(info.state, CircuitState::Launched);
        assert!(info.path.is_empty());
        assert_eq!(info.purpose, "CONFLUX_LINKED");
    }

    #[test]
    fn test_bad_circuit_line() {
        assert!(CircuitInfo::parse_status_line("abc BUILT").is_none());
        assert!(CircuitInfo::parse_status_line("").is_none());
    }

    #[test]
    fn test_parse_circuit_status_skips_garbage() {
        let circuits = parse_circuit_status("1 BUILT $AAAA~a\nnot a circuit\n\n2 CLOSED\n");
        assert_eq!(circuits.len(), 2);
        assert_eq!(circuits[1].state, CircuitState::Closed);
        assert!(!circuits[1].state.is_live());
    }

    #[test]
    fn test_stream_line() {
        let info = StreamInfo::parse_status_line("42 SUCCEEDED 7 example.com:443").unwrap();
        assert_eq!(info.stream_id, 42);
        assert_eq!(info.circuit_id, 7);
        assert_eq!(info.state, StreamState::Succeeded);
        assert_eq!(info.target_host, "example.com");
        assert_eq!(info.target_port, 443);
    }

    #[test]
    fn test_stream_states() {
        assert_eq!(StreamState::from_token("NEWRESOLVE"), StreamState::NewResolve);
        assert_eq!(StreamState::from_token("NEWRESOLV"), StreamState::NewResolve);
        assert_eq!(StreamState::from_token("DETACHED"), StreamState::Unknown);

        let info = StreamInfo::parse_status_line("9 DETACHED 0 10.0.0.1").unwrap();
        assert_eq!(info.state, StreamState::Unknown);
        assert_eq!(info.target_host, "10.0.0.1");
        assert_eq!(info.target_port, 0);
    }

    #[test]
    fn test_display_tokens() {
        assert_eq!(CircuitState::Built.to_string(), "BUILT");
        assert_eq!(StreamState::SentConnect.to_string(), "SENTCONNECT");
    }
}
