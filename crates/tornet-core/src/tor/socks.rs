//! SOCKS5 tunnels through Tor.
//!
//! Each call opens its own socket to the proxy and runs the RFC 1928
//! "no authentication" + CONNECT exchange. On success the socket is handed
//! to the caller, who owns it from then on.

use super::controller::with_timeout;
use crate::error::{Error, Result};
use crate::logging::RedactedHost;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;

/// Builds SOCKS5 tunnels to arbitrary destinations.
#[derive(Debug, Clone)]
pub struct Socks5Connector {
    host: String,
    port: u16,
}

impl Socks5Connector {
    /// Connector for the proxy at `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Proxy address as `host:port`.
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a tunnel to `target_host:target_port`.
    ///
    /// The whole exchange, including the TCP connect to the proxy, must
    /// finish within `timeout`.
    pub async fn connect(
        &self,
        target_host: &str,
        target_port: u16,
        timeout: Duration,
    ) -> Result<TcpStream> {
        with_timeout(timeout, self.connect_inner(target_host, target_port)).await?
    }

    async fn connect_inner(&self, target_host: &str, target_port: u16) -> Result<TcpStream> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to SOCKS proxy: {}", e)))?;

        match negotiate(&mut stream, target_host, target_port).await {
            Ok(()) => {
                tracing::debug!(
                    target = %RedactedHost(target_host),
                    port = target_port,
                    "SOCKS5 tunnel established"
                );
                Ok(stream)
            }
            Err(e) => {
                let _ = stream.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Run the SOCKS5 greeting and CONNECT request over `stream`.
pub async fn negotiate<S>(stream: &mut S, target_host: &str, target_port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Build the request first so a bad hostname fails before any I/O.
    let request = encode_connect_request(target_host, target_port)?;

    stream
        .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
        .await
        .map_err(|e| Error::Connection(format!("SOCKS5 greeting failed: {}", e)))?;

    let mut response = [0u8; 2];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| Error::Connection(format!("SOCKS5 greeting response failed: {}", e)))?;

    if response[0] != SOCKS_VERSION {
        return Err(Error::Protocol(format!(
            "invalid SOCKS5 handshake response version {:#04x}",
            response[0]
        )));
    }
    if response[1] != METHOD_NO_AUTH {
        return Err(Error::Protocol(format!(
            "SOCKS5 authentication method not supported: {:#04x}",
            response[1]
        )));
    }

    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::Connection(format!("SOCKS5 connect failed: {}", e)))?;

    // VER, REP first: a refusal is reported even if the proxy hangs up
    // before sending the bound address.
    let mut head = [0u8; 2];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| Error::Connection(format!("SOCKS5 connect response failed: {}", e)))?;

    if head[0] != SOCKS_VERSION {
        return Err(Error::Protocol(format!(
            "invalid SOCKS5 version in response: {:#04x}",
            head[0]
        )));
    }
    if head[1] != REPLY_SUCCEEDED {
        return Err(Error::Socks {
            status: head[1],
            reason: reply_reason(head[1]).to_string(),
        });
    }

    // RSV, ATYP, then the bound address (we ignore it but must consume it)
    let mut tail = [0u8; 2];
    stream
        .read_exact(&mut tail)
        .await
        .map_err(|e| Error::Connection(format!("truncated SOCKS5 reply: {}", e)))?;

    let addr_len = match tail[1] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| Error::Connection(format!("truncated SOCKS5 reply: {}", e)))?;
            len[0] as usize
        }
        other => {
            return Err(Error::Protocol(format!(
                "invalid SOCKS5 address type {:#04x}",
                other
            )));
        }
    };

    let mut bound = vec![0u8; addr_len + 2];
    stream
        .read_exact(&mut bound)
        .await
        .map_err(|e| Error::Connection(format!("truncated SOCKS5 reply: {}", e)))?;

    Ok(())
}

/// Encode a CONNECT request.
///
/// A dotted-quad IPv4 literal is sent as ATYP `0x01`; anything else is sent
/// as a domain name (ATYP `0x03`) for Tor to resolve.
pub fn encode_connect_request(target_host: &str, target_port: u16) -> Result<Vec<u8>> {
    let mut request = Vec::with_capacity(7 + target_host.len());
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, 0x00]);

    if let Ok(ip) = target_host.parse::<Ipv4Addr>() {
        request.push(ATYP_IPV4);
        request.extend_from_slice(&ip.octets());
    } else {
        let hostname = target_host.as_bytes();
        if hostname.is_empty() {
            return Err(Error::Protocol("empty target hostname".into()));
        }
        if hostname.len() > 255 {
            return Err(Error::Protocol("hostname too long".into()));
        }
        if !target_host.is_ascii() {
            return Err(Error::Protocol("hostname must be ASCII".into()));
        }
        request.push(ATYP_DOMAIN);
        request.push(hostname.len() as u8);
        request.extend_from_slice(hostname);
    }

    request.extend_from_slice(&target_port.to_be_bytes());
    Ok(request)
}

/// RFC 1928 meaning of a reply status.
pub fn reply_reason(status: u8) -> &'static str {
    match status {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        // Tor extensions for onion services
        0xf0 => "onion service descriptor can not be found",
        0xf1 => "onion service descriptor is invalid",
        0xf2 => "onion service introduction failed",
        0xf3 => "onion service rendezvous failed",
        0xf4 => "onion service missing client authorization",
        0xf5 => "onion service wrong client authorization",
        0xf6 => "onion service invalid address",
        0xf7 => "onion service introduction timed out",
        _ => "unknown error",
    }
}
