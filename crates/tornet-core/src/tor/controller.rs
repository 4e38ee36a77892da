//! Tor ControlPort session.
//!
//! Communicates with Tor via the control protocol (control-spec.txt). One
//! [`ControlSession`] owns one connection; every method takes `&mut self`,
//! so request/reply pairs can never interleave on the wire.

use super::protocol::{encode_command, quote_string, split_words, Reply, ReplyParser};
use super::status::{parse_circuit_status, parse_stream_status, CircuitInfo, StreamInfo};
use crate::config::TorConfig;
use crate::error::{Error, Result};
use crate::logging::{sanitize_command, RedactedBytes};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Upper bound on one reply line; Tor's longest lines are descriptors.
const MAX_LINE_LEN: usize = 1 << 20;

/// Credential used for `AUTHENTICATE`.
#[derive(Clone)]
pub enum TorAuth {
    /// Password authentication.
    Password(String),
    /// Cookie bytes already in memory.
    Cookie(Vec<u8>),
    /// Cookie authentication (reads from file).
    CookieFile(PathBuf),
}

impl std::fmt::Debug for TorAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TorAuth::Password(_) => f.write_str("Password([REDACTED])"),
            TorAuth::Cookie(c) => write!(f, "Cookie({})", RedactedBytes(c)),
            TorAuth::CookieFile(p) => f.debug_tuple("CookieFile").field(p).finish(),
        }
    }
}

impl TorAuth {
    /// Pick the credential the config asks for: password first, then cookie
    /// bytes, then the configured cookie file.
    ///
    /// Returns `None` when the config names no credential; the session then
    /// falls back to the cookie file advertised by PROTOCOLINFO.
    pub fn from_config(config: &TorConfig) -> Option<Self> {
        if let Some(password) = &config.control_password {
            return Some(TorAuth::Password(password.clone()));
        }
        if let Some(cookie) = &config.control_cookie {
            return Some(TorAuth::Cookie(cookie.clone()));
        }
        config.control_cookie_path.clone().map(TorAuth::CookieFile)
    }
}

/// Information from PROTOCOLINFO response.
#[derive(Debug, Clone, Default)]
pub struct ProtocolInfo {
    /// Available authentication methods.
    pub auth_methods: Vec<String>,
    /// Path to control port cookie file for authentication.
    pub cookie_file: Option<PathBuf>,
    /// Version of the Tor daemon.
    pub tor_version: Option<String>,
}

impl ProtocolInfo {
    /// Extract auth methods, cookie file and version from a reply.
    pub fn from_reply(reply: &Reply) -> Self {
        let mut info = Self::default();
        for line in &reply.lines {
            let words = split_words(&line.text);
            match words.first().map(String::as_str) {
                Some("AUTH") => {
                    for word in &words[1..] {
                        if let Some(methods) = word.strip_prefix("METHODS=") {
                            info.auth_methods = methods.split(',').map(String::from).collect();
                        } else if let Some(path) = word.strip_prefix("COOKIEFILE=") {
                            info.cookie_file = Some(PathBuf::from(path));
                        }
                    }
                }
                Some("VERSION") => {
                    info.tor_version = words[1..]
                        .iter()
                        .find_map(|w| w.strip_prefix("Tor="))
                        .map(String::from);
                }
                _ => {}
            }
        }
        info
    }
}

/// Tor ControlPort session.
pub struct ControlSession {
    reader: Option<BoxedReader>,
    writer: Option<BoxedWriter>,
    authenticated: bool,
    io_timeout: Duration,
    protocol_info: ProtocolInfo,
}

impl ControlSession {
    /// Connect to the control port and perform the PROTOCOLINFO exchange.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self> {
        let stream = with_timeout(io_timeout, TcpStream::connect((host, port)))
            .await?
            .map_err(|e| Error::Connection(format!("failed to connect to control port: {}", e)))?;
        Self::handshake(stream, io_timeout).await
    }

    /// Run the opening exchange over an already-connected stream.
    ///
    /// Tor sends nothing on its own when a controller connects; the first
    /// reply we can demand without credentials is PROTOCOLINFO, so its `250`
    /// serves as the banner.
    pub async fn handshake<S>(stream: S, io_timeout: Duration) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut session = Self {
            reader: Some(BufReader::new(Box::new(read_half))),
            writer: Some(Box::new(write_half)),
            authenticated: false,
            io_timeout,
            protocol_info: ProtocolInfo::default(),
        };

        let reply = session.exchange("PROTOCOLINFO 1").await?;
        if !reply.is_ok() {
            session.close().await;
            return Err(Error::Connection(format!(
                "unexpected control response: {}",
                reply.summary()
            )));
        }
        session.protocol_info = ProtocolInfo::from_reply(&reply);

        tracing::debug!(
            methods = ?session.protocol_info.auth_methods,
            cookie_file = ?session.protocol_info.cookie_file,
            version = ?session.protocol_info.tor_version,
            "Control port handshake complete"
        );
        Ok(session)
    }

    /// Details reported during the handshake.
    pub fn protocol_info(&self) -> &ProtocolInfo {
        &self.protocol_info
    }

    /// Whether authentication has succeeded on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Authenticate with the control port.
    ///
    /// With `None`, the cookie file from PROTOCOLINFO is used, then
    /// [`TorConfig::default_cookie_path`]. Calling this again after success
    /// does nothing.
    pub async fn authenticate(&mut self, auth: Option<&TorAuth>) -> Result<()> {
        if self.authenticated {
            return Ok(());
        }

        let cmd = match auth {
            Some(TorAuth::Password(password)) => {
                if password.contains(['\r', '\n']) {
                    return Err(Error::Authentication(
                        "password must not contain line breaks".into(),
                    ));
                }
                format!("AUTHENTICATE {}", quote_string(password))
            }
            Some(TorAuth::Cookie(cookie)) => format!("AUTHENTICATE {}", hex::encode(cookie)),
            Some(TorAuth::CookieFile(path)) => {
                let cookie = read_cookie(path).await?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
            None => {
                let path = self
                    .protocol_info
                    .cookie_file
                    .clone()
                    .filter(|p| p.exists())
                    .unwrap_or_else(TorConfig::default_cookie_path);
                if !path.exists() {
                    return Err(Error::Authentication(
                        "no password, cookie or cookie file available".into(),
                    ));
                }
                let cookie = read_cookie(&path).await?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
        };

        let reply = self.exchange(&cmd).await?;
        if !reply.is_ok() {
            return Err(Error::Authentication(format!(
                "control port rejected credentials: {}",
                reply.summary()
            )));
        }

        self.authenticated = true;
        tracing::info!("Authenticated with Tor control port");
        Ok(())
    }

    /// Send a command and read its reply.
    ///
    /// The reply is returned whatever its status code; callers decide what
    /// a non-`250` means for them.
    pub async fn send_command(&mut self, cmd: &str) -> Result<Reply> {
        if !self.is_open() {
            return Err(Error::Connection("control connection is closed".into()));
        }
        if !self.authenticated {
            return Err(Error::Authentication("not authenticated".into()));
        }
        self.exchange(cmd).await
    }

    /// `GETINFO <key>`. Returns an empty string when Tor does not report the
    /// key.
    pub async fn get_info(&mut self, key: &str) -> Result<String> {
        let reply = self.send_command(&format!("GETINFO {}", key)).await?;
        if !reply.is_ok() {
            tracing::debug!(key, reply = %reply.summary(), "GETINFO returned an error");
            return Ok(String::new());
        }
        Ok(reply.value(key).unwrap_or_default().to_string())
    }

    /// Get Tor version.
    pub async fn get_version(&mut self) -> Result<String> {
        self.get_info("version").await
    }

    /// Check if Tor has established circuits (is ready for connections).
    pub async fn is_circuit_established(&mut self) -> Result<bool> {
        Ok(self.get_info("status/circuit-established").await? == "1")
    }

    /// All circuits Tor currently knows about.
    pub async fn get_circuits(&mut self) -> Result<Vec<CircuitInfo>> {
        let value = self.get_info("circuit-status").await?;
        Ok(parse_circuit_status(&value))
    }

    /// All streams Tor currently knows about.
    pub async fn get_streams(&mut self) -> Result<Vec<StreamInfo>> {
        let value = self.get_info("stream-status").await?;
        Ok(parse_stream_status(&value))
    }

    /// Ask Tor to build a new circuit with a path of its choosing.
    pub async fn new_circuit(&mut self) -> Result<u32> {
        let reply = self.send_command("EXTENDCIRCUIT 0").await?;
        if !reply.is_ok() {
            return Err(Error::Circuit(format!(
                "EXTENDCIRCUIT rejected: {}",
                reply.summary()
            )));
        }

        // "250 EXTENDED <id>"
        let message = reply.message();
        message
            .strip_prefix("EXTENDED ")
            .unwrap_or(message)
            .split_whitespace()
            .next()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| Error::Circuit(format!("no circuit ID in reply: {}", reply.summary())))
    }

    /// Close a circuit. Best-effort: failure is reported as `false`.
    pub async fn close_circuit(&mut self, circuit_id: u32) -> bool {
        match self.send_command(&format!("CLOSECIRCUIT {}", circuit_id)).await {
            Ok(reply) if reply.is_ok() => true,
            Ok(reply) => {
                tracing::debug!(circuit_id, reply = %reply.summary(), "CLOSECIRCUIT refused");
                false
            }
            Err(e) => {
                tracing::debug!(circuit_id, error = %e, "CLOSECIRCUIT failed");
                false
            }
        }
    }

    /// `SETCONF key=value ...`.
    pub async fn set_conf(&mut self, settings: &[(&str, String)]) -> Result<()> {
        let mut cmd = String::from("SETCONF");
        for (key, value) in settings {
            cmd.push(' ');
            cmd.push_str(key);
            cmd.push('=');
            cmd.push_str(&quote_string(value));
        }

        let reply = self.send_command(&cmd).await?;
        if !reply.is_ok() {
            return Err(Error::Connection(format!(
                "SETCONF rejected: {}",
                reply.summary()
            )));
        }
        Ok(())
    }

    /// Signal Tor (e.g., NEWNYM for new circuit).
    pub async fn signal(&mut self, signal: &str) -> Result<()> {
        let reply = self.send_command(&format!("SIGNAL {}", signal)).await?;
        if !reply.is_ok() {
            return Err(Error::Connection(format!(
                "SIGNAL {} rejected: {}",
                signal,
                reply.summary()
            )));
        }
        Ok(())
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = tokio::time::timeout(self.io_timeout, writer.shutdown()).await;
        }
        self.reader = None;
        self.authenticated = false;
    }

    /// Write one command and read one reply, with no auth check.
    ///
    /// Any failure after the command is written leaves the reply stream in
    /// an unknown position, so the connection is dropped.
    async fn exchange(&mut self, cmd: &str) -> Result<Reply> {
        let line = encode_command(cmd)?;
        tracing::trace!(command = %sanitize_command(cmd), "Sending control command");

        let result = self.round_trip(&line).await;
        if let Err(e) = &result {
            if self.is_open() {
                tracing::warn!(error = %e, "Control connection out of sync, closing it");
            }
            self.reader = None;
            self.writer = None;
            self.authenticated = false;
        }
        result
    }

    async fn round_trip(&mut self, line: &[u8]) -> Result<Reply> {
        let io_timeout = self.io_timeout;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Connection("control connection is closed".into()))?;

        with_timeout(io_timeout, writer.write_all(line))
            .await?
            .map_err(|e| Error::Connection(format!("failed to send command: {}", e)))?;
        with_timeout(io_timeout, writer.flush())
            .await?
            .map_err(|e| Error::Connection(format!("failed to flush: {}", e)))?;

        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let io_timeout = self.io_timeout;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::Connection("control connection is closed".into()))?;

        let mut parser = ReplyParser::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let mut limited = (&mut *reader).take(MAX_LINE_LEN as u64);
            let n = with_timeout(io_timeout, limited.read_until(b'\n', &mut buf))
                .await?
                .map_err(|e| Error::Connection(format!("failed to read response: {}", e)))?;
            if n == 0 {
                return Err(Error::Connection("control port closed the connection".into()));
            }
            if !buf.ends_with(b"\n") {
                if buf.len() >= MAX_LINE_LEN {
                    return Err(Error::Protocol("control reply line too long".into()));
                }
                return Err(Error::Connection("control port closed the connection".into()));
            }

            let line = std::str::from_utf8(&buf)
                .map_err(|_| Error::Protocol("control reply is not valid UTF-8".into()))?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() && !parser.in_data_block() {
                continue;
            }
            if let Some(reply) = parser.push_line(trimmed)? {
                return Ok(reply);
            }
        }
    }
}

async fn read_cookie(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        Error::Authentication(format!(
            "failed to read cookie file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Run `fut` under `limit`, mapping expiry to [`Error::Timeout`].
pub(crate) async fn with_timeout<F: Future>(limit: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tor::status::CircuitState;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    const PROTOCOLINFO_REPLY: &str = "250-PROTOCOLINFO 1\r\n\
        250-AUTH METHODS=COOKIE,SAFECOOKIE,HASHEDPASSWORD COOKIEFILE=\"/nonexistent/tornet/cookie\"\r\n\
        250-VERSION Tor=\"0.4.8.9\"\r\n\
        250 OK\r\n";

    /// Scripted control port: for each expected command, reply with the
    /// given text. Returns every command line it received.
    fn spawn_fake(server: DuplexStream, script: Vec<(&'static str, &'static str)>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut reader = BufReader::new(read_half);
            let mut seen = Vec::new();
            for (expect_prefix, reply) in script {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                assert!(
                    line.starts_with(expect_prefix),
                    "expected {:?}, got {:?}",
                    expect_prefix,
                    line
                );
                seen.push(line);
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            seen
        })
    }

    async fn session_with(script: Vec<(&'static str, &'static str)>) -> (ControlSession, tokio::task::JoinHandle<Vec<String>>) {
        let (client, server) = duplex(8192);
        let mut full = vec![("PROTOCOLINFO 1", PROTOCOLINFO_REPLY)];
        full.extend(script);
        let fake = spawn_fake(server, full);
        let session = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .unwrap();
        (session, fake)
    }

    #[tokio::test]
    async fn test_handshake_reads_protocol_info() {
        let (session, _fake) = session_with(vec![]).await;
        let info = session.protocol_info();
        assert!(info.auth_methods.contains(&"COOKIE".to_string()));
        assert_eq!(info.cookie_file, Some(PathBuf::from("/nonexistent/tornet/cookie")));
        assert_eq!(info.tor_version.as_deref(), Some("0.4.8.9"));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_handshake_rejects_error_banner() {
        let (client, server) = duplex(1024);
        let _fake = spawn_fake(server, vec![("PROTOCOLINFO", "514 Authentication required.\r\n")]);
        let err = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_handshake_times_out_on_silent_peer() {
        let (client, _server) = duplex(1024);
        let err = ControlSession::handshake(client, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn test_password_auth() {
        let (mut session, fake) =
            session_with(vec![("AUTHENTICATE \"pa\\\"ss\"", "250 OK\r\n")]).await;
        session
            .authenticate(Some(&TorAuth::Password("pa\"ss".into())))
            .await
            .unwrap();
        assert!(session.is_authenticated());

        // Second call is a no-op and sends nothing.
        session
            .authenticate(Some(&TorAuth::Password("pa\"ss".into())))
            .await
            .unwrap();
        drop(session);
        assert_eq!(fake.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cookie_auth_sends_hex() {
        let (mut session, fake) =
            session_with(vec![("AUTHENTICATE 00ff10", "250 OK\r\n")]).await;
        session
            .authenticate(Some(&TorAuth::Cookie(vec![0x00, 0xff, 0x10])))
            .await
            .unwrap();
        assert!(session.is_authenticated());
        drop(session);
        assert_eq!(fake.await.unwrap()[1], "AUTHENTICATE 00ff10");
    }

    #[tokio::test]
    async fn test_cookie_file_auth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_auth_cookie");
        std::fs::write(&path, [0xab, 0xcd]).unwrap();

        let (mut session, _fake) = session_with(vec![("AUTHENTICATE abcd", "250 OK\r\n")]).await;
        session
            .authenticate(Some(&TorAuth::CookieFile(path)))
            .await
            .unwrap();
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_rejected_auth_keeps_flag_false() {
        for reply in [
            "515 Authentication failed: Password did not match HashedControlPassword\r\n",
            "251 Strange\r\n",
            "550 Unrecognized\r\n",
        ] {
            let (mut session, _fake) = session_with(vec![("AUTHENTICATE", reply)]).await;
            let err = session
                .authenticate(Some(&TorAuth::Password("wrong".into())))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Authentication(_)));
            assert!(!session.is_authenticated());
        }
    }

    #[tokio::test]
    async fn test_missing_cookie_file_fails_auth() {
        let (mut session, _fake) = session_with(vec![]).await;
        let err = session
            .authenticate(Some(&TorAuth::CookieFile(PathBuf::from(
                "/nonexistent/tornet/other_cookie",
            ))))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_send_command_requires_auth() {
        let (mut session, _fake) = session_with(vec![]).await;
        let err = session.send_command("GETINFO version").await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        let err = session.get_circuits().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_get_info_forms() {
        let (mut session, _fake) = session_with(vec![
            ("AUTHENTICATE", "250 OK\r\n"),
            ("GETINFO version", "250-version=0.4.8.9 (git-abc)\r\n250 OK\r\n"),
            ("GETINFO status/circuit-established", "250 status/circuit-established=1\r\n"),
            ("GETINFO nope", "552 Unrecognized key \"nope\"\r\n"),
        ])
        .await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();

        assert_eq!(session.get_version().await.unwrap(), "0.4.8.9 (git-abc)");
        assert!(session.is_circuit_established().await.unwrap());
        assert_eq!(session.get_info("nope").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_get_circuits_and_streams() {
        let (mut session, _fake) = session_with(vec![
            ("AUTHENTICATE", "250 OK\r\n"),
            (
                "GETINFO circuit-status",
                "250+circuit-status=\r\n\
                 1 BUILT $AAAA~a,$BBBB~b,$CCCC~c PURPOSE=GENERAL\r\n\
                 2 LAUNCHED\r\n\
                 3 SOMETHING_NEW\r\n\
                 .\r\n\
                 250 OK\r\n",
            ),
            (
                "GETINFO stream-status",
                "250-stream-status=\r\n250 OK\r\n",
            ),
        ])
        .await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();

        let circuits = session.get_circuits().await.unwrap();
        assert_eq!(circuits.len(), 3);
        assert_eq!(circuits[0].path.len(), 3);
        assert_eq!(circuits[2].state, CircuitState::Unknown);

        assert!(session.get_streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_and_close_circuit() {
        let (mut session, _fake) = session_with(vec![
            ("AUTHENTICATE", "250 OK\r\n"),
            ("EXTENDCIRCUIT 0", "250 EXTENDED 17\r\n"),
            ("EXTENDCIRCUIT 0", "551 Couldn't start circuit\r\n"),
            ("CLOSECIRCUIT 17", "250 OK\r\n"),
            ("CLOSECIRCUIT 99", "552 Unknown circuit \"99\"\r\n"),
        ])
        .await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();

        assert_eq!(session.new_circuit().await.unwrap(), 17);
        assert!(matches!(session.new_circuit().await, Err(Error::Circuit(_))));
        assert!(session.close_circuit(17).await);
        assert!(!session.close_circuit(99).await);
    }

    #[tokio::test]
    async fn test_set_conf_quotes_values() {
        let (mut session, fake) = session_with(vec![
            ("AUTHENTICATE", "250 OK\r\n"),
            ("SETCONF", "250 OK\r\n"),
        ])
        .await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();
        session
            .set_conf(&[("ExitNodes", "$AAAA,$BBBB".into()), ("StrictNodes", "1".into())])
            .await
            .unwrap();
        drop(session);
        assert_eq!(
            fake.await.unwrap()[2],
            "SETCONF ExitNodes=\"$AAAA,$BBBB\" StrictNodes=\"1\""
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut session, _fake) = session_with(vec![("AUTHENTICATE", "250 OK\r\n")]).await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();
        session.close().await;
        session.close().await;
        assert!(!session.is_authenticated());
        assert!(!session.is_open());
        assert!(session.send_command("GETINFO version").await.is_err());
    }

    #[tokio::test]
    async fn test_peer_hangup_is_connection_error() {
        let (client, mut server) = duplex(1024);
        let fake = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let _ = server.read(&mut buf).await;
            drop(server);
        });
        let err = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        fake.await.unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_timed_out_reply_closes_session() {
        let (client, server) = duplex(8192);
        let fake = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            for reply in [PROTOCOLINFO_REPLY, "250 OK\r\n"] {
                line.clear();
                reader.read_line(&mut line).await.unwrap();
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            line.clear();
            reader.read_line(&mut line).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            // Late answer to GETINFO version, followed by one for the next command.
            let _ = write_half
                .write_all(b"250-version=0.4.8.9\r\n250 OK\r\n250+circuit-status=\r\n.\r\n250 OK\r\n")
                .await;
        });

        let mut session = ControlSession::handshake(client, Duration::from_millis(150))
            .await
            .unwrap();
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();

        let err = session.get_version().await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(!session.is_open());
        assert!(!session.is_authenticated());

        // The stale reply must never be read as the answer to a later command.
        let err = session.get_circuits().await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_reply_closes_session() {
        let (mut session, _fake) = session_with(vec![
            ("AUTHENTICATE", "250 OK\r\n"),
            ("GETINFO version", "hello there\r\n"),
        ])
        .await;
        session
            .authenticate(Some(&TorAuth::Password("x".into())))
            .await
            .unwrap();

        assert!(session.get_version().await.is_err());
        assert!(!session.is_open());
        assert!(matches!(
            session.send_command("GETINFO version").await,
            Err(Error::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let (client, server) = duplex(64 * 1024);
        let fake = tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let chunk = vec![b'a'; 64 * 1024];
            let mut sent = 0;
            write_half.write_all(b"250-").await.unwrap();
            // Never send a newline; stop once the client hangs up.
            while sent <= MAX_LINE_LEN {
                if write_half.write_all(&chunk).await.is_err() {
                    break;
                }
                sent += chunk.len();
            }
        });

        let err = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Protocol(_)));
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_password_with_line_break_is_not_sent() {
        let (mut session, fake) = session_with(vec![]).await;
        for password in ["x\r\nSIGNAL HALT", "x\nGETINFO version", "x\r"] {
            let err = session
                .authenticate(Some(&TorAuth::Password(password.into())))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Authentication(_)));
            assert!(session.is_open());
        }
        drop(session);
        assert_eq!(fake.await.unwrap(), vec!["PROTOCOLINFO 1".to_string()]);
    }

    #[tokio::test]
    async fn test_reported_cookie_file_is_used_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_auth_cookie");
        std::fs::write(&path, [0x01, 0x02, 0x03]).unwrap();
        let banner: &'static str = Box::leak(
            format!(
                "250-PROTOCOLINFO 1\r\n\
                 250-AUTH METHODS=COOKIE COOKIEFILE=\"{}\"\r\n\
                 250 OK\r\n",
                path.display()
            )
            .into_boxed_str(),
        );

        let (client, server) = duplex(8192);
        let fake = spawn_fake(
            server,
            vec![("PROTOCOLINFO 1", banner), ("AUTHENTICATE", "250 OK\r\n")],
        );
        let mut session = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .unwrap();
        session.authenticate(None).await.unwrap();
        assert!(session.is_authenticated());
        drop(session);
        assert_eq!(fake.await.unwrap()[1], "AUTHENTICATE 010203");
    }

    #[tokio::test]
    async fn test_default_cookie_path_is_tried_last() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", home.path());

        // No COOKIEFILE in PROTOCOLINFO and nothing under ~/.tor yet.
        let (client, server) = duplex(8192);
        let fake = spawn_fake(
            server,
            vec![
                ("PROTOCOLINFO 1", "250-PROTOCOLINFO 1\r\n250-AUTH METHODS=COOKIE\r\n250 OK\r\n"),
                ("AUTHENTICATE", "250 OK\r\n"),
            ],
        );
        let mut session = ControlSession::handshake(client, Duration::from_secs(5))
            .await
            .unwrap();
        let err = session.authenticate(None).await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(session.is_open());

        std::fs::create_dir_all(home.path().join(".tor")).unwrap();
        std::fs::write(home.path().join(".tor/control_auth_cookie"), [0xbe, 0xef]).unwrap();
        session.authenticate(None).await.unwrap();
        assert!(session.is_authenticated());
        drop(session);
        assert_eq!(
            fake.await.unwrap(),
            vec!["PROTOCOLINFO 1".to_string(), "AUTHENTICATE beef".to_string()]
        );
    }

    #[test]
    fn test_auth_from_config_priority() {
        let mut config = TorConfig {
            control_cookie: Some(vec![1, 2]),
            control_cookie_path: Some(PathBuf::from("/tmp/c")),
            ..Default::default()
        };
        assert!(matches!(TorAuth::from_config(&config), Some(TorAuth::Cookie(_))));
        config.control_password = Some("pw".into());
        assert!(matches!(TorAuth::from_config(&config), Some(TorAuth::Password(_))));
        assert!(TorAuth::from_config(&TorConfig::default()).is_none());
        assert!(!format!("{:?}", TorAuth::Password("pw".into())).contains("pw\""));
    }
}
