//! Talking to a local Tor daemon.
//!
//! ## Layers
//!
//! - `protocol`: control-port command encoding and reply framing
//! - `status`: circuit and stream records parsed from GETINFO values
//! - `controller`: an authenticated control-port session
//! - `socks`: SOCKS5 CONNECT tunnels through the proxy port
//! - `client`: the lifecycle state machine tying the above together
//!
//! Nothing here ever falls back to a direct connection. If Tor is not
//! reachable, operations fail.

mod client;
mod controller;
mod protocol;
mod socks;
mod status;

pub use client::{
    CircuitAvailability, ConnectFailure, ConnectionState, HealthStatus, Method, Snapshot,
    TorNetworkClient,
};
pub use controller::{ControlSession, ProtocolInfo, TorAuth};
pub use protocol::{encode_command, quote_string, split_words, Reply, ReplyLine, ReplyParser, CODE_OK};
pub use socks::{encode_connect_request, negotiate, reply_reason, Socks5Connector};
pub use status::{
    parse_circuit_status, parse_stream_status, CircuitInfo, CircuitState, StreamInfo, StreamState,
};
