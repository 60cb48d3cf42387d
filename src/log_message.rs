//! Unsolicited log lines that game servers push over UDP once `logaddress`
//! points at us.
//!
//! Datagram layout: `FF FF FF FF | flag | text | '\n' | NUL`, where the flag
//! is `R` for a plain line and `S` when the server signs lines with a
//! log password.

use std::{net::SocketAddr, sync::OnceLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tokio::{
    net::{ToSocketAddrs, UdpSocket},
    task::JoinHandle,
};

use crate::error::{Error, Result};
use crate::text;

const HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const PASSWORD_FLAG: u8 = 0x53;
const MIN_DATAGRAM_LEN: usize = 7;
const TEXT_OFFSET: usize = 5;
/// `L MM/DD/YYYY - HH:MM:SS: `
const TIMESTAMP_PREFIX_LEN: usize = 25;
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %H:%M:%S";
const MAX_DATAGRAM_LEN: usize = 65_535;

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^L (\d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}):").expect("timestamp pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// When the server wrote the line, or the Unix epoch if it could not be read.
    pub timestamp: DateTime<Utc>,
    /// The line was signed with a log password. Not verified.
    pub has_password: bool,
    pub body: String,
}

impl LogMessage {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < MIN_DATAGRAM_LEN {
            return Err(Error::MalformedPacket("log datagram is too short"));
        }
        if raw[..4] != HEADER {
            return Err(Error::MalformedPacket("log datagram is missing its header"));
        }

        let has_password = raw[4] == PASSWORD_FLAG;
        let line = match std::str::from_utf8(&raw[TEXT_OFFSET..raw.len() - 2]) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("log line is not valid UTF-8: {err}");
                return Ok(LogMessage {
                    timestamp: DateTime::<Utc>::UNIX_EPOCH,
                    has_password,
                    body: String::new(),
                });
            }
        };

        Ok(LogMessage {
            timestamp: parse_timestamp(line),
            has_password,
            body: line
                .char_indices()
                .nth(TIMESTAMP_PREFIX_LEN)
                .map(|(start, _)| text::normalize(&line[start..]))
                .unwrap_or_default(),
        })
    }
}

fn parse_timestamp(line: &str) -> DateTime<Utc> {
    timestamp_pattern()
        .captures(line)
        .and_then(|captures| captures.get(1))
        .and_then(|stamp| NaiveDateTime::parse_from_str(stamp.as_str(), TIMESTAMP_FORMAT).ok())
        .map(|stamp| stamp.and_utc())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Receives log datagrams on a bound UDP socket.
#[derive(Debug)]
pub struct LogListener {
    socket: UdpSocket,
}

impl LogListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!("listening for server logs on {}", socket.local_addr()?);
        Ok(LogListener { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Waits for the next datagram. A malformed one is returned as
    /// [`Error::MalformedPacket`]; the socket stays usable.
    pub async fn recv(&self) -> Result<(LogMessage, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        Ok((LogMessage::decode(&buf[..len])?, from))
    }

    /// Hands every decoded message to `handler` on a background task until
    /// the socket itself fails or the task is aborted. Malformed datagrams
    /// are logged and dropped.
    pub fn spawn<F>(self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(LogMessage) + Send + 'static,
    {
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok((message, from)) => {
                        tracing::trace!("log line from {from}");
                        handler(message);
                    }
                    Err(Error::MalformedPacket(reason)) => {
                        tracing::warn!("dropping log datagram: {reason}");
                    }
                    Err(err) => {
                        tracing::error!("log listener stopped: {err}");
                        break;
                    }
                }
            }
        })
    }
}

/// Binds `addr` and forwards every decoded log line to `handler`.
pub async fn start_log_listener<F>(addr: impl ToSocketAddrs, handler: F) -> Result<JoinHandle<()>>
where
    F: FnMut(LogMessage) + Send + 'static,
{
    Ok(LogListener::bind(addr).await?.spawn(handler))
}
