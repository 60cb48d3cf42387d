//! Minecraft's GameSpy4-style UDP query (the `enable-query` listener).
//!
//! A handshake returns a challenge token as ASCII digits; the full-stat
//! request then carries that token as a big-endian int.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::packetutil::PacketReader;

const MAGIC: [u8; 2] = [0xfe, 0xfd];
const TYPE_HANDSHAKE: u8 = 0x09;
const TYPE_STAT: u8 = 0x00;

/// Session ids are masked with `0x0F0F0F0F` by the server, so every byte
/// stays below 0x10.
pub const SESSION_ID: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

/// Asks for the full stat instead of the basic one.
const FULL_STAT_PADDING: [u8; 4] = [0; 4];

/// `splitnum\0\x80\0` ahead of the key/value section.
const KEY_VALUE_PADDING: usize = 11;
/// `\x01player_\0\0` ahead of the player names.
const PLAYER_PADDING: usize = 10;

const REQUIRED_KEYS: [&str; 10] = [
    "hostname",
    "gametype",
    "game_id",
    "version",
    "plugins",
    "map",
    "numplayers",
    "maxplayers",
    "hostport",
    "hostip",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinecraftStat {
    pub motd: String,
    pub game_type: String,
    pub game_id: String,
    pub version: String,
    pub plugins: String,
    pub map: String,
    pub num_players: u32,
    pub max_players: u32,
    pub host_port: u16,
    pub host_ip: String,
    pub players: Vec<String>,
}

pub fn handshake_request() -> Vec<u8> {
    let mut packet = MAGIC.to_vec();
    packet.push(TYPE_HANDSHAKE);
    packet.extend_from_slice(&SESSION_ID);
    packet
}

/// Reads the decimal challenge token out of a handshake reply
/// (`09 | session | digits | NUL`).
pub fn parse_challenge(response: &[u8]) -> Result<i32> {
    let digits = response
        .get(5..)
        .filter(|digits| !digits.is_empty())
        .ok_or_else(|| Error::MalformedResponse("handshake reply is too short".to_string()))?;
    let digits = std::str::from_utf8(digits)
        .map_err(|_| Error::MalformedResponse("challenge token is not text".to_string()))?
        .trim_end_matches('\0')
        .trim();
    digits
        .parse::<i32>()
        .map_err(|err| Error::MalformedResponse(format!("bad challenge token {digits:?}: {err}")))
}

/// The token as it goes on the wire. The integer is held little-endian
/// locally, but the server expects its bytes in network order.
pub fn challenge_bytes(token: i32) -> [u8; 4] {
    let mut bytes = token.to_le_bytes();
    bytes.reverse();
    bytes
}

pub fn stat_request(token: i32) -> Vec<u8> {
    let mut packet = MAGIC.to_vec();
    packet.push(TYPE_STAT);
    packet.extend_from_slice(&SESSION_ID);
    packet.extend_from_slice(&challenge_bytes(token));
    packet.extend_from_slice(&FULL_STAT_PADDING);
    packet
}

pub fn parse_stat(response: &[u8]) -> Result<MinecraftStat> {
    let mut reader = PacketReader::new(response);
    let kind = reader.read_u8()?;
    if kind != TYPE_STAT {
        return Err(Error::MalformedResponse(format!(
            "expected a stat reply, got type {kind:#04x}"
        )));
    }
    reader.skip(SESSION_ID.len())?;
    reader.skip(KEY_VALUE_PADDING)?;

    let mut fields = HashMap::new();
    loop {
        let key = reader.read_cstring()?;
        if key.is_empty() {
            break;
        }
        let value = reader.read_cstring()?;
        fields.insert(key, value);
    }

    if let Some(missing) = REQUIRED_KEYS.iter().find(|key| !fields.contains_key(**key)) {
        return Err(Error::MalformedResponse(format!("stat reply has no {missing}")));
    }

    let mut players = Vec::new();
    if reader.skip(PLAYER_PADDING).is_ok() {
        while let Ok(name) = reader.read_cstring() {
            if name.is_empty() {
                break;
            }
            players.push(name);
        }
    }

    let mut take = |key: &str| fields.remove(key).unwrap_or_default();
    let num_players = parse_number(&take("numplayers"), "numplayers")?;
    let max_players = parse_number(&take("maxplayers"), "maxplayers")?;
    let host_port = parse_number(&take("hostport"), "hostport")?;

    Ok(MinecraftStat {
        motd: take("hostname"),
        game_type: take("gametype"),
        game_id: take("game_id"),
        version: take("version"),
        plugins: take("plugins"),
        map: take("map"),
        num_players,
        max_players,
        host_port,
        host_ip: take("hostip"),
        players,
    })
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::MalformedResponse(format!("{key} is not a number: {value:?}")))
}
