//! Wire format of the remote console protocol.
//!
//! Every frame is `size | id | type | body | NUL | NUL` with little-endian
//! 32-bit integers, where `size` counts everything after itself.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Decoder;

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Error, Result};
use crate::text;

/// Smallest legal value of the size field: id, type and two NULs.
pub const MIN_PACKET_SIZE: i32 = 10;

const SIZE_FIELD_LEN: usize = 4;
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Auth,
    AuthResponse,
    ExecCommand,
    ResponseValue,
}

impl PacketType {
    pub fn code(self) -> i32 {
        match self {
            PacketType::Auth => 3,
            // the protocol reuses 2 for both directions
            PacketType::AuthResponse | PacketType::ExecCommand => 2,
            PacketType::ResponseValue => 0,
        }
    }

    /// Interprets a type code sent by the server.
    pub fn from_server_code(code: i32) -> Option<Self> {
        match code {
            3 => Some(PacketType::Auth),
            2 => Some(PacketType::AuthResponse),
            0 => Some(PacketType::ResponseValue),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub request_type: i32,
    /// Raw body bytes without the two trailing NULs.
    pub payload: Vec<u8>,
}

impl RconPacket {
    pub fn new(request_id: i32, kind: PacketType, body: &str) -> Self {
        RconPacket {
            request_id,
            request_type: kind.code(),
            payload: body.as_bytes().to_vec(),
        }
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_server_code(self.request_type)
    }

    /// Serializes the packet into one complete frame.
    pub fn build(&self) -> Result<Vec<u8>> {
        if self.payload.contains(&0) {
            return Err(Error::InvalidCommand("body must not contain NUL bytes"));
        }
        let size = i32::try_from(self.payload.len() + MIN_PACKET_SIZE as usize)
            .map_err(|_| Error::InvalidCommand("body is too long"))?;

        let mut packet = Vec::with_capacity(SIZE_FIELD_LEN + size as usize);
        packet.put_i32_le(size);
        packet.put_i32_le(self.request_id);
        packet.put_i32_le(self.request_type);
        packet.put_slice(&self.payload);
        packet.put_slice(b"\0\0");
        Ok(packet)
    }

    /// Encodes `(id, type, body)` straight to frame bytes.
    pub fn encode(request_id: i32, kind: PacketType, body: &str) -> Result<Vec<u8>> {
        RconPacket::new(request_id, kind, body).build()
    }

    /// Parses one frame, size field included, using the default frame limit.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        RconPacket::decode_with_limit(raw, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn decode_with_limit(raw: &[u8], max_frame_size: usize) -> Result<Self> {
        if raw.len() < SIZE_FIELD_LEN {
            return Err(Error::MalformedPacket("frame is shorter than its size field"));
        }
        if raw.len() > max_frame_size {
            return Err(Error::MalformedPacket("frame exceeds the maximum frame size"));
        }

        let mut cursor = raw;
        let size = cursor.get_i32_le();
        if size < MIN_PACKET_SIZE {
            return Err(Error::MalformedPacket("declared size is below the minimum"));
        }
        if size as usize > raw.len() - SIZE_FIELD_LEN {
            return Err(Error::MalformedPacket("frame is truncated"));
        }

        let request_id = cursor.get_i32_le();
        let request_type = cursor.get_i32_le();
        let body_len = size as usize - MIN_PACKET_SIZE as usize;
        let payload = raw[HEADER_LEN..HEADER_LEN + body_len].to_vec();

        Ok(RconPacket {
            request_id,
            request_type,
            payload,
        })
    }

    /// The body as text, trailing whitespace trimmed and line endings
    /// folded to `\n`. Invalid UTF-8 yields an empty string.
    pub fn body(&self) -> String {
        text::decode_body(&self.payload)
    }
}

/// Splits a TCP byte stream into [`RconPacket`]s.
#[derive(Debug, Clone)]
pub struct RconCodec {
    max_frame_size: usize,
}

impl RconCodec {
    pub fn new(max_frame_size: usize) -> Self {
        RconCodec { max_frame_size }
    }
}

impl Default for RconCodec {
    fn default() -> Self {
        RconCodec::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < SIZE_FIELD_LEN {
            return Ok(None);
        }

        let mut size_field = &src[..SIZE_FIELD_LEN];
        let size = size_field.get_i32_le();
        if size < MIN_PACKET_SIZE {
            return Err(Error::MalformedPacket("declared size is below the minimum"));
        }
        let frame_len = SIZE_FIELD_LEN + size as usize;
        if frame_len > self.max_frame_size {
            return Err(Error::MalformedPacket("frame exceeds the maximum frame size"));
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        RconPacket::decode_with_limit(&frame, self.max_frame_size).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_is_the_minimum_frame() {
        let frame = RconPacket::encode(7, PacketType::ResponseValue, "").unwrap();
        assert_eq!(
            frame,
            vec![10, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn layout_matches_the_wire_format() {
        let frame = RconPacket::encode(0x0102_0304, PacketType::Auth, "pw").unwrap();
        assert_eq!(&frame[..4], &12i32.to_le_bytes());
        assert_eq!(&frame[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&frame[8..12], &3i32.to_le_bytes());
        assert_eq!(&frame[12..], b"pw\0\0");
    }

    #[test]
    fn decode_reverses_encode() {
        for (id, kind, body) in [
            (1, PacketType::Auth, "hunter2"),
            (-1, PacketType::AuthResponse, ""),
            (42, PacketType::ResponseValue, "players: 3/16\r\nmap: de_dust2  "),
        ] {
            let packet = RconPacket::decode(&RconPacket::encode(id, kind, body).unwrap()).unwrap();
            assert_eq!(packet.request_id, id);
            assert_eq!(packet.kind(), Some(kind));
            assert_eq!(packet.body(), text::normalize(body));
        }
    }

    #[test]
    fn exec_command_shares_the_auth_response_code() {
        let frame = RconPacket::encode(5, PacketType::ExecCommand, "status").unwrap();
        let packet = RconPacket::decode(&frame).unwrap();
        assert_eq!(packet.request_type, 2);
        assert_eq!(packet.kind(), Some(PacketType::AuthResponse));
    }

    #[test]
    fn rejects_nul_in_body() {
        assert!(matches!(
            RconPacket::encode(1, PacketType::ExecCommand, "say\0hi"),
            Err(Error::InvalidCommand(_))
        ));
    }

    #[test]
    fn rejects_structurally_broken_frames() {
        let frame = RconPacket::encode(1, PacketType::ResponseValue, "abc").unwrap();

        // no size field
        assert!(matches!(RconPacket::decode(&frame[..3]), Err(Error::MalformedPacket(_))));
        // declared size runs past the buffer
        assert!(matches!(
            RconPacket::decode(&frame[..frame.len() - 1]),
            Err(Error::MalformedPacket(_))
        ));
        // declared size below the minimum
        let mut tiny = frame.clone();
        tiny[..4].copy_from_slice(&9i32.to_le_bytes());
        assert!(matches!(RconPacket::decode(&tiny), Err(Error::MalformedPacket(_))));
        // over the configured limit
        assert!(matches!(
            RconPacket::decode_with_limit(&frame, frame.len() - 1),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn bad_utf8_body_keeps_id_and_type() {
        let mut frame = RconPacket::encode(9, PacketType::ResponseValue, "ab").unwrap();
        frame[12] = 0xff;
        let packet = RconPacket::decode(&frame).unwrap();
        assert_eq!(packet.request_id, 9);
        assert_eq!(packet.kind(), Some(PacketType::ResponseValue));
        assert_eq!(packet.body(), "");
    }

    #[test]
    fn codec_waits_for_a_whole_frame() {
        let first = RconPacket::encode(1, PacketType::ResponseValue, "Hello").unwrap();
        let second = RconPacket::encode(2, PacketType::ResponseValue, "").unwrap();
        let mut codec = RconCodec::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&first[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&first[6..]);
        buf.extend_from_slice(&second);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.request_id, 1);
        assert_eq!(packet.payload, b"Hello");
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.request_id, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_rejects_oversized_declarations() {
        let mut codec = RconCodec::new(64);
        let mut buf = BytesMut::from(&1000i32.to_le_bytes()[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::MalformedPacket(_))));
    }
}
