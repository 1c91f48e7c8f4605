//! SOCKS5 front-end for the engine's local proxy.
//!
//! Implements the server side of RFC 1928 as far as a local onion-routing proxy
//! needs it: the no-authentication method and the CONNECT command, with IPv4,
//! domain-name and IPv6 targets. Once the upstream stream is open the two sides
//! are spliced together until either closes.
//!
//! # Exchange
//!
//! ```text
//!   client                                server
//!     │ VER=5 NMETHODS METHODS...           │
//!     │────────────────────────────────────▶│
//!     │                    VER=5 METHOD=00  │   (FF if 00 not offered)
//!     │◀────────────────────────────────────│
//!     │ VER=5 CMD=01 RSV ATYP ADDR PORT     │
//!     │────────────────────────────────────▶│──▶ connect(target)
//!     │          VER=5 REP RSV ATYP=1 0..0  │
//!     │◀────────────────────────────────────│
//!     │◀═══════════ spliced data ══════════▶│
//! ```
//!
//! # Replies
//!
//! | Code | Sent when |
//! |------|-----------|
//! | `0x00` | upstream connected |
//! | `0x01` | malformed request |
//! | `0x05` | upstream connect failed |
//! | `0x07` | command other than CONNECT |
//! | `0x08` | unknown address type |
//!
//! The module is transport-agnostic: [`serve`] works on any tokio
//! `AsyncRead + AsyncWrite` pair, and the upstream is produced by a caller-given
//! connect function.

use std::fmt;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes sent in the REP field.
pub mod reply {
    /// Request granted.
    pub const SUCCEEDED: u8 = 0x00;
    /// General failure, used for malformed requests.
    pub const GENERAL_FAILURE: u8 = 0x01;
    /// The upstream connection could not be opened.
    pub const CONNECTION_REFUSED: u8 = 0x05;
    /// Only CONNECT is supported.
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    /// The address type is unknown.
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Errors ending a SOCKS session.
#[derive(Debug, Error)]
pub enum SocksError {
    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client spoke a different protocol version.
    #[error("unsupported SOCKS version {0}")]
    Version(u8),

    /// The client did not offer the no-authentication method.
    #[error("no acceptable authentication method")]
    NoAcceptableMethod,

    /// The client asked for something other than CONNECT.
    #[error("unsupported command {0:#04x}")]
    Command(u8),

    /// The client used an unknown address type.
    #[error("unsupported address type {0:#04x}")]
    AddressType(u8),

    /// The request could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(&'static str),

    /// The upstream connection failed.
    #[error("connect to {target} failed: {reason}")]
    Connect {
        /// Requested destination.
        target: TargetAddr,
        /// Reason reported by the connector.
        reason: String,
    },
}

/// Destination requested by a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4 or IPv6 address.
    Ip(SocketAddr),
    /// Hostname to be resolved by the upstream.
    Domain(String, u16),
}

impl TargetAddr {
    /// Host part, without brackets for IPv6.
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(name, _) => name.clone(),
        }
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

/// Writes a reply with the given code and an all-zero IPv4 bind address.
pub async fn send_reply<S>(stream: &mut S, code: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    stream.flush().await
}

async fn reject<S>(stream: &mut S, code: u8, err: SocksError) -> Result<TargetAddr, SocksError>
where
    S: AsyncWrite + Unpin,
{
    send_reply(stream, code).await?;
    Err(err)
}

/// Runs the method negotiation and reads the CONNECT request.
///
/// Failures that have a reply code are answered before the error is returned.
pub async fn negotiate<S>(stream: &mut S) -> Result<TargetAddr, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != SOCKS_VERSION {
        return Err(SocksError::Version(greeting[0]));
    }
    let mut methods = vec![0u8; usize::from(greeting[1])];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_NONE_ACCEPTABLE])
            .await?;
        stream.flush().await?;
        return Err(SocksError::NoAcceptableMethod);
    }
    stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
    stream.flush().await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, atyp] = header;
    if version != SOCKS_VERSION {
        return reject(stream, reply::GENERAL_FAILURE, SocksError::Version(version)).await;
    }
    if command != CMD_CONNECT {
        return reject(
            stream,
            reply::COMMAND_NOT_SUPPORTED,
            SocksError::Command(command),
        )
        .await;
    }

    match atyp {
        ATYP_IPV4 => {
            let mut raw = [0u8; 4];
            stream.read_exact(&mut raw).await?;
            let port = stream.read_u16().await?;
            Ok(TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(raw).into(), port)))
        }
        ATYP_IPV6 => {
            let mut raw = [0u8; 16];
            stream.read_exact(&mut raw).await?;
            let port = stream.read_u16().await?;
            Ok(TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(raw).into(), port)))
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await?;
            let mut raw = vec![0u8; usize::from(len)];
            stream.read_exact(&mut raw).await?;
            let port = stream.read_u16().await?;
            if raw.is_empty() {
                return reject(
                    stream,
                    reply::GENERAL_FAILURE,
                    SocksError::Malformed("empty domain name"),
                )
                .await;
            }
            match String::from_utf8(raw) {
                Ok(name) => Ok(TargetAddr::Domain(name, port)),
                Err(_) => {
                    reject(
                        stream,
                        reply::GENERAL_FAILURE,
                        SocksError::Malformed("domain name is not UTF-8"),
                    )
                    .await
                }
            }
        }
        other => {
            reject(
                stream,
                reply::ADDRESS_TYPE_NOT_SUPPORTED,
                SocksError::AddressType(other),
            )
            .await
        }
    }
}

/// Serves one SOCKS session: negotiate, connect upstream, splice.
///
/// Returns the byte counts copied client→upstream and upstream→client.
pub async fn serve<S, U, F, Fut, E>(mut stream: S, connect: F) -> Result<(u64, u64), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
    F: FnOnce(TargetAddr) -> Fut,
    Fut: Future<Output = Result<U, E>>,
    E: fmt::Display,
{
    let target = negotiate(&mut stream).await?;
    let mut upstream = match connect(target.clone()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            send_reply(&mut stream, reply::CONNECTION_REFUSED).await?;
            return Err(SocksError::Connect {
                target,
                reason: e.to_string(),
            });
        }
    };
    send_reply(&mut stream, reply::SUCCEEDED).await?;

    let copied = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
    Ok(copied)
}
