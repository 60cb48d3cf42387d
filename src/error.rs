use std::time::Duration;

use thiserror::Error;

use crate::query::QueryPhase;
use crate::resolve_address::ResolverError;

/// Every fallible operation in this crate returns this error.
#[derive(Error, Debug)]
pub enum Error {
    /// A console frame or log datagram failed structural validation. When a
    /// server sends such a frame mid-session, the session ends and every
    /// outstanding command fails with this.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// The server rejected the password (auth reply id was -1).
    #[error("authentication failure, make sure you typed your password correctly")]
    AuthenticationFailed,

    /// The auth reply echoed an id we never sent.
    #[error("received a strange packet from server (expected id {expected}, got {actual}). Are you sure this is an RCON server?")]
    UnexpectedPacket { expected: i32, actual: i32 },

    /// Every connect attempt failed at the transport level, or the login
    /// did not finish within the connect deadline.
    #[error("could not connect after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// The session ended while the request was outstanding, or it was already closed.
    #[error("connection to the server was lost")]
    ConnectionLost,

    /// No response for a single command within its deadline. The connection stays up.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("query timed out while {0}")]
    QueryTimeout(QueryPhase),

    #[error("malformed query response: {0}")]
    MalformedResponse(String),

    /// An outgoing body that cannot be framed.
    #[error("invalid command: {0}")]
    InvalidCommand(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Resolve(#[from] ResolverError),
}

pub type Result<T> = std::result::Result<T, Error>;
