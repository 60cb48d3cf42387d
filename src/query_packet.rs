//! Source engine query datagrams (`A2S_INFO`, `A2S_PLAYER`).
//!
//! Every single-packet message starts with `FF FF FF FF` followed by a
//! one-byte message type.

use phf::phf_map;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::packetutil::PacketReader;

const SIMPLE_HEADER: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
const SPLIT_HEADER: [u8; 4] = [0xfe, 0xff, 0xff, 0xff];

const A2S_INFO: u8 = 0x54;
const A2S_PLAYER: u8 = 0x55;
const S2C_CHALLENGE: u8 = 0x41;
const S2A_INFO: u8 = 0x49;
const S2A_PLAYER: u8 = 0x44;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

/// Asks for a challenge instead of a player list.
pub const NO_CHALLENGE: [u8; 4] = [0xff, 0xff, 0xff, 0xff];

const THE_SHIP_APP_ID: u16 = 2400;

const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerType {
    Dedicated,
    NonDedicated,
    SourceTv,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Environment {
    Linux,
    Windows,
    Mac,
    Unknown,
}

static SERVER_TYPES: phf::Map<char, ServerType> = phf_map! {
    'd' => ServerType::Dedicated,
    'D' => ServerType::Dedicated,
    'l' => ServerType::NonDedicated,
    'L' => ServerType::NonDedicated,
    'p' => ServerType::SourceTv,
    'P' => ServerType::SourceTv,
};

static ENVIRONMENTS: phf::Map<char, Environment> = phf_map! {
    'l' => Environment::Linux,
    'L' => Environment::Linux,
    'w' => Environment::Windows,
    'W' => Environment::Windows,
    'm' => Environment::Mac,
    'o' => Environment::Mac,
};

impl ServerType {
    fn from_byte(byte: u8) -> Self {
        SERVER_TYPES
            .get(&char::from(byte))
            .copied()
            .unwrap_or(ServerType::Unknown)
    }
}

impl Environment {
    fn from_byte(byte: u8) -> Self {
        ENVIRONMENTS
            .get(&char::from(byte))
            .copied()
            .unwrap_or(Environment::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceTv {
    pub port: u16,
    pub name: String,
}

/// Decoded `A2S_INFO` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub server_type: ServerType,
    pub environment: Environment,
    pub password_protected: bool,
    pub vac_secured: bool,
    pub version: String,
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub source_tv: Option<SourceTv>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerInfo {
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected.
    pub duration: f32,
}

/// `A2S_INFO` request. A challenge, once the server hands one out, is
/// appended to the unchanged original payload.
pub fn info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = SIMPLE_HEADER.to_vec();
    packet.push(A2S_INFO);
    packet.extend_from_slice(INFO_PAYLOAD);
    if let Some(challenge) = challenge {
        packet.extend_from_slice(&challenge);
    }
    packet
}

pub fn player_request(challenge: [u8; 4]) -> Vec<u8> {
    let mut packet = SIMPLE_HEADER.to_vec();
    packet.push(A2S_PLAYER);
    packet.extend_from_slice(&challenge);
    packet
}

/// Returns the four challenge bytes if `response` is an `S2C_CHALLENGE`.
pub fn parse_challenge(response: &[u8]) -> Option<[u8; 4]> {
    if response.len() < 9 || response[..4] != SIMPLE_HEADER || response[4] != S2C_CHALLENGE {
        return None;
    }
    let mut challenge = [0u8; 4];
    challenge.copy_from_slice(&response[5..9]);
    Some(challenge)
}

pub fn is_player_list(response: &[u8]) -> bool {
    response.len() >= 5 && response[..4] == SIMPLE_HEADER && response[4] == S2A_PLAYER
}

fn open(response: &[u8], expected: u8) -> Result<PacketReader<'_>> {
    if response.len() >= 4 && response[..4] == SPLIT_HEADER {
        return Err(Error::MalformedResponse(
            "split responses are not supported".to_string(),
        ));
    }
    let mut reader = PacketReader::new(response);
    let header: [u8; 4] = [
        reader.read_u8()?,
        reader.read_u8()?,
        reader.read_u8()?,
        reader.read_u8()?,
    ];
    if header != SIMPLE_HEADER {
        return Err(Error::MalformedResponse(format!(
            "unexpected header {header:02x?}"
        )));
    }
    let kind = reader.read_u8()?;
    if kind != expected {
        return Err(Error::MalformedResponse(format!(
            "expected message type {expected:#04x}, got {kind:#04x}"
        )));
    }
    Ok(reader)
}

pub fn parse_info(response: &[u8]) -> Result<SourceInfo> {
    let mut reader = open(response, S2A_INFO)?;

    let protocol = reader.read_u8()?;
    let name = reader.read_cstring()?;
    let map = reader.read_cstring()?;
    let folder = reader.read_cstring()?;
    let game = reader.read_cstring()?;
    let app_id = reader.read_u16_le()?;
    let players = reader.read_u8()?;
    let max_players = reader.read_u8()?;
    let bots = reader.read_u8()?;
    let server_type = ServerType::from_byte(reader.read_u8()?);
    let environment = Environment::from_byte(reader.read_u8()?);
    let password_protected = reader.read_u8()? != 0;
    let vac_secured = reader.read_u8()? != 0;
    if app_id == THE_SHIP_APP_ID {
        // mode, witnesses, duration
        reader.skip(3)?;
    }
    let version = reader.read_cstring()?;

    let mut info = SourceInfo {
        protocol,
        name,
        map,
        folder,
        game,
        app_id,
        players,
        max_players,
        bots,
        server_type,
        environment,
        password_protected,
        vac_secured,
        version,
        port: None,
        steam_id: None,
        source_tv: None,
        keywords: None,
        game_id: None,
    };

    if reader.is_empty() {
        return Ok(info);
    }
    let flags = reader.read_u8()?;
    if flags & EDF_PORT != 0 {
        info.port = Some(reader.read_u16_le()?);
    }
    if flags & EDF_STEAM_ID != 0 {
        info.steam_id = Some(reader.read_u64_le()?);
    }
    if flags & EDF_SOURCE_TV != 0 {
        let port = reader.read_u16_le()?;
        let name = reader.read_cstring()?;
        info.source_tv = Some(SourceTv { port, name });
    }
    if flags & EDF_KEYWORDS != 0 {
        info.keywords = Some(reader.read_cstring()?);
    }
    if flags & EDF_GAME_ID != 0 {
        info.game_id = Some(reader.read_u64_le()?);
    }

    Ok(info)
}

/// Parses an `S2A_PLAYER` reply. Servers cut the list off at the packet
/// size limit without fixing the count, so a short list is accepted.
pub fn parse_players(response: &[u8]) -> Result<Vec<PlayerInfo>> {
    let mut reader = open(response, S2A_PLAYER)?;
    let count = reader.read_u8()?;

    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if reader.is_empty() {
            break;
        }
        players.push(PlayerInfo {
            index: reader.read_u8()?,
            name: reader.read_cstring()?,
            score: reader.read_i32_le()?,
            duration: reader.read_f32_le()?,
        });
    }
    Ok(players)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_reply(app_id: u16, extra: &[u8]) -> Vec<u8> {
        let mut reply = SIMPLE_HEADER.to_vec();
        reply.push(S2A_INFO);
        reply.push(17);
        reply.extend_from_slice(b"My Server\0de_dust2\0csgo\0Counter-Strike: Global Offensive\0");
        reply.extend_from_slice(&app_id.to_le_bytes());
        reply.extend_from_slice(&[12, 24, 2, b'd', b'l', 0, 1]);
        if app_id == THE_SHIP_APP_ID {
            reply.extend_from_slice(&[1, 3, 60]);
        }
        reply.extend_from_slice(b"1.38.7.9\0");
        reply.extend_from_slice(extra);
        reply
    }

    #[test]
    fn info_request_matches_the_documented_bytes() {
        assert_eq!(info_request(None), b"\xff\xff\xff\xffTSource Engine Query\0".to_vec());

        let with_challenge = info_request(Some([0x11, 0x22, 0x33, 0x44]));
        assert!(with_challenge.starts_with(&info_request(None)));
        assert!(with_challenge.ends_with(&[0x11, 0x22, 0x33, 0x44]));
    }

    #[test]
    fn player_challenge_request() {
        assert_eq!(
            player_request(NO_CHALLENGE),
            vec![0xff, 0xff, 0xff, 0xff, 0x55, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn challenge_only_from_challenge_messages() {
        let reply = [0xff, 0xff, 0xff, 0xff, 0x41, 0x11, 0x22, 0x33, 0x44];
        assert_eq!(parse_challenge(&reply), Some([0x11, 0x22, 0x33, 0x44]));
        assert_eq!(parse_challenge(&reply[..8]), None);
        assert_eq!(parse_challenge(&info_reply(730, &[])), None);
    }

    #[test]
    fn parses_basic_info() {
        let info = parse_info(&info_reply(730, &[])).unwrap();
        assert_eq!(info.name, "My Server");
        assert_eq!(info.map, "de_dust2");
        assert_eq!(info.folder, "csgo");
        assert_eq!(info.app_id, 730);
        assert_eq!((info.players, info.max_players, info.bots), (12, 24, 2));
        assert_eq!(info.server_type, ServerType::Dedicated);
        assert_eq!(info.environment, Environment::Linux);
        assert!(!info.password_protected);
        assert!(info.vac_secured);
        assert_eq!(info.version, "1.38.7.9");
        assert_eq!(info.port, None);
    }

    #[test]
    fn parses_extra_data_flags() {
        let mut extra = vec![EDF_PORT | EDF_STEAM_ID | EDF_KEYWORDS | EDF_GAME_ID];
        extra.extend_from_slice(&27015u16.to_le_bytes());
        extra.extend_from_slice(&90_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(b"secure,empty\0");
        extra.extend_from_slice(&730u64.to_le_bytes());

        let info = parse_info(&info_reply(730, &extra)).unwrap();
        assert_eq!(info.port, Some(27015));
        assert_eq!(info.steam_id, Some(90_000_000_000));
        assert_eq!(info.keywords.as_deref(), Some("secure,empty"));
        assert_eq!(info.game_id, Some(730));
        assert_eq!(info.source_tv, None);
    }

    #[test]
    fn skips_the_ship_fields() {
        let info = parse_info(&info_reply(THE_SHIP_APP_ID, &[])).unwrap();
        assert_eq!(info.version, "1.38.7.9");
    }

    #[test]
    fn rejects_truncated_and_foreign_replies() {
        let reply = info_reply(730, &[]);
        assert!(matches!(parse_info(&reply[..20]), Err(Error::MalformedResponse(_))));
        assert!(matches!(
            parse_info(&[0xfe, 0xff, 0xff, 0xff, 0x49]),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_players(&reply),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn parses_players_and_tolerates_a_short_list() {
        let mut reply = SIMPLE_HEADER.to_vec();
        reply.extend_from_slice(&[S2A_PLAYER, 3]);
        for (index, name, score) in [(0u8, "alice", 10i32), (1, "bob", -2)] {
            reply.push(index);
            reply.extend_from_slice(name.as_bytes());
            reply.push(0);
            reply.extend_from_slice(&score.to_le_bytes());
            reply.extend_from_slice(&42.5f32.to_le_bytes());
        }

        assert!(is_player_list(&reply));
        let players = parse_players(&reply).unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "alice");
        assert_eq!(players[1].score, -2);
        assert_eq!(players[1].duration, 42.5);
    }
}
