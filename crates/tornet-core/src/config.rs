//! Client configuration.
//!
//! [`TorConfig`] is built once at startup, either from [`Default`] with field
//! overrides or from `TOR_*` environment variables, and is read-only
//! afterwards.

use crate::error::{Error, Result};
use crate::logging::{Redacted, RedactedBytes};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default SOCKS5 proxy port for Tor.
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Default control port for Tor.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Default cookie location used when neither the config nor PROTOCOLINFO
/// names one.
pub const DEFAULT_COOKIE_PATH: &str = "~/.tor/control_auth_cookie";

/// Connection policy for the Tor client.
#[derive(Clone)]
pub struct TorConfig {
    /// SOCKS5 proxy host.
    pub socks_host: String,
    /// SOCKS5 proxy port.
    pub socks_port: u16,
    /// Control port host.
    pub control_host: String,
    /// Control port port.
    pub control_port: u16,
    /// Password for `AUTHENTICATE "<password>"`.
    pub control_password: Option<String>,
    /// Raw cookie bytes, used instead of reading a cookie file.
    pub control_cookie: Option<Vec<u8>>,
    /// Cookie file to read when no password or cookie bytes are set.
    pub control_cookie_path: Option<PathBuf>,
    /// Timeout for every socket operation.
    pub timeout: Duration,
    /// Attempts for opening transport connections.
    pub retry_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// How long to wait for a freshly requested circuit to be built.
    pub circuit_build_timeout: Duration,
    /// Default timeout for tunneled connections and HTTP requests.
    pub stream_timeout: Duration,
    /// Upper bound on live circuits before the client stops requesting more.
    pub max_circuits: usize,
    /// Advisory limit on streams sharing one circuit.
    pub max_streams_per_circuit: usize,
    /// Resolve hostnames through Tor (`socks5h`) instead of locally.
    pub enforce_tor_only: bool,
    /// Verify TLS certificates on HTTP requests.
    pub verify_certificates: bool,
    /// Exit relays to pin via `SETCONF ExitNodes`.
    pub custom_exit_nodes: Option<Vec<String>>,
    /// Only ever use the listed exit relays.
    pub strict_exit_nodes: bool,
    /// Host used for SOCKS liveness probes.
    pub probe_host: String,
    /// Port used for SOCKS liveness probes.
    pub probe_port: u16,
    /// URL fetched by [`test_connection`](crate::tor::TorNetworkClient::test_connection).
    pub probe_url: String,
    /// Interval between background health checks.
    pub health_check_interval: Duration,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_host: "127.0.0.1".to_string(),
            socks_port: DEFAULT_SOCKS_PORT,
            control_host: "127.0.0.1".to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            control_password: None,
            control_cookie: None,
            control_cookie_path: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            circuit_build_timeout: Duration::from_secs(10),
            stream_timeout: Duration::from_secs(60),
            max_circuits: 10,
            max_streams_per_circuit: 100,
            enforce_tor_only: true,
            verify_certificates: true,
            custom_exit_nodes: None,
            strict_exit_nodes: false,
            probe_host: "httpbin.org".to_string(),
            probe_port: 80,
            probe_url: "https://httpbin.org/ip".to_string(),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for TorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorConfig")
            .field("socks_host", &self.socks_host)
            .field("socks_port", &self.socks_port)
            .field("control_host", &self.control_host)
            .field("control_port", &self.control_port)
            .field("control_password", &self.control_password.as_ref().map(Redacted))
            .field(
                "control_cookie",
                &self.control_cookie.as_deref().map(RedactedBytes),
            )
            .field("control_cookie_path", &self.control_cookie_path)
            .field("timeout", &self.timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("circuit_build_timeout", &self.circuit_build_timeout)
            .field("stream_timeout", &self.stream_timeout)
            .field("max_circuits", &self.max_circuits)
            .field("max_streams_per_circuit", &self.max_streams_per_circuit)
            .field("enforce_tor_only", &self.enforce_tor_only)
            .field("verify_certificates", &self.verify_certificates)
            .field("custom_exit_nodes", &self.custom_exit_nodes)
            .field("strict_exit_nodes", &self.strict_exit_nodes)
            .field("probe_host", &self.probe_host)
            .field("probe_port", &self.probe_port)
            .field("probe_url", &self.probe_url)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}

impl TorConfig {
    /// Build a config from `TOR_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup over the defaults.
    ///
    /// Unset keys keep their default; set but unparsable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("TOR_SOCKS_HOST") {
            config.socks_host = v;
        }
        if let Some(v) = parse_var(&lookup, "TOR_SOCKS_PORT")? {
            config.socks_port = v;
        }
        if let Some(v) = lookup("TOR_CONTROL_HOST") {
            config.control_host = v;
        }
        if let Some(v) = parse_var(&lookup, "TOR_CONTROL_PORT")? {
            config.control_port = v;
        }
        config.control_password = lookup("TOR_CONTROL_PASSWORD").filter(|v| !v.is_empty());
        config.control_cookie_path = lookup("TOR_CONTROL_COOKIE_PATH")
            .filter(|v| !v.is_empty())
            .map(|v| PathBuf::from(shellexpand::tilde(&v).as_ref()));
        if let Some(v) = parse_var(&lookup, "TOR_TIMEOUT")? {
            config.timeout = secs(v);
        }
        if let Some(v) = parse_var(&lookup, "TOR_RETRY_ATTEMPTS")? {
            config.retry_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "TOR_RETRY_DELAY")? {
            config.retry_delay = secs(v);
        }
        if let Some(v) = parse_var(&lookup, "TOR_CIRCUIT_BUILD_TIMEOUT")? {
            config.circuit_build_timeout = secs(v);
        }
        if let Some(v) = parse_var(&lookup, "TOR_STREAM_TIMEOUT")? {
            config.stream_timeout = secs(v);
        }
        if let Some(v) = parse_var(&lookup, "TOR_MAX_CIRCUITS")? {
            config.max_circuits = v;
        }
        if let Some(v) = parse_var(&lookup, "TOR_MAX_STREAMS_PER_CIRCUIT")? {
            config.max_streams_per_circuit = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "TOR_ENFORCE_TOR_ONLY")? {
            config.enforce_tor_only = v;
        }
        if let Some(v) = parse_bool_var(&lookup, "TOR_VERIFY_CERTIFICATES")? {
            config.verify_certificates = v;
        }
        if let Some(v) = lookup("TOR_EXIT_NODES") {
            let nodes = parse_node_list(&v);
            config.custom_exit_nodes = (!nodes.is_empty()).then_some(nodes);
        }
        if let Some(v) = parse_bool_var(&lookup, "TOR_STRICT_EXIT_NODES")? {
            config.strict_exit_nodes = v;
        }
        if let Some(v) = parse_var(&lookup, "TOR_HEALTH_CHECK_INTERVAL")? {
            config.health_check_interval = secs(v);
        }
        if let Some(v) = lookup("TOR_PROBE_URL") {
            config.probe_url = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.socks_port == 0 {
            return Err(Error::Config("socks_port must be non-zero".into()));
        }
        if self.control_port == 0 {
            return Err(Error::Config("control_port must be non-zero".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".into()));
        }
        if self.stream_timeout.is_zero() {
            return Err(Error::Config("stream_timeout must be non-zero".into()));
        }
        if self.max_circuits == 0 {
            return Err(Error::Config("max_circuits must be at least 1".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(Error::Config("health_check_interval must be non-zero".into()));
        }
        if let Some(nodes) = &self.custom_exit_nodes {
            if let Some(bad) = nodes.iter().find(|n| n.is_empty() || n.contains([' ', ','])) {
                return Err(Error::Config(format!("invalid exit node entry: {:?}", bad)));
            }
        }
        Ok(())
    }

    /// `host:port` of the control port.
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.control_host, self.control_port)
    }

    /// `host:port` of the SOCKS proxy.
    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.socks_host, self.socks_port)
    }

    /// Proxy URL handed to the HTTP client.
    ///
    /// `socks5h` makes Tor resolve hostnames, so no DNS query leaves the
    /// machine outside the tunnel.
    pub fn proxy_url(&self) -> String {
        let scheme = if self.enforce_tor_only { "socks5h" } else { "socks5" };
        format!("{}://{}", scheme, self.socks_addr())
    }

    /// Cookie file to try when the daemon does not advertise one.
    pub fn default_cookie_path() -> PathBuf {
        PathBuf::from(shellexpand::tilde(DEFAULT_COOKIE_PATH).as_ref())
    }
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, raw))),
    }
}

fn parse_bool_var<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Config(format!("{} has invalid value {:?}", key, raw))),
        },
    }
}

/// Split a comma separated relay list, dropping empty entries.
pub fn parse_node_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
