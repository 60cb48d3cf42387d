use std::{io, time::Duration};

use tokio::{net::UdpSocket, time::timeout};

use crate::error::{Error, Result};
use crate::query::QueryPhase;

/// Sends one datagram and waits for the next one to come back.
///
/// A refusal reported by the peer's host (ICMP port unreachable) is
/// treated like silence: nothing answered in `waiting_in`.
pub async fn exchange_datagram(
    socket: &UdpSocket,
    payload: &[u8],
    deadline: Duration,
    max_datagram_size: usize,
    waiting_in: QueryPhase,
) -> Result<Vec<u8>> {
    socket
        .send(payload)
        .await
        .map_err(|err| unanswered(err, waiting_in))?;

    let mut buf = vec![0u8; max_datagram_size];
    let len = timeout(deadline, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::QueryTimeout(waiting_in))?
        .map_err(|err| unanswered(err, waiting_in))?;
    buf.truncate(len);
    Ok(buf)
}

fn unanswered(err: io::Error, waiting_in: QueryPhase) -> Error {
    if err.kind() == io::ErrorKind::ConnectionRefused {
        tracing::debug!("query refused while {waiting_in}: {err}");
        Error::QueryTimeout(waiting_in)
    } else {
        Error::Io(err)
    }
}

fn truncated(what: &str) -> Error {
    Error::MalformedResponse(format!("response ended while reading {what}"))
}

/// Little-endian cursor over a query response.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(truncated(what));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N, what)?);
        Ok(array)
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len, "padding").map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "a byte")?[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array("a short")?))
    }

    pub fn read_i32_le(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array("an int")?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array("a long")?))
    }

    pub fn read_f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array("a float")?))
    }

    /// Reads a NUL-terminated string. Invalid UTF-8 is replaced rather than
    /// rejected; server names are full of it.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| truncated("a string"))?;
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }
}
