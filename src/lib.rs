#![doc = include_str!("../README.md")]

mod config;
pub use config::{Config, QueryConfig, RconConfig, DEFAULT_MAX_FRAME_SIZE};

mod error;
pub use error::{Error, Result};

mod text;

mod packetutil;

pub mod rcon_packet;
pub use rcon_packet::{PacketType, RconCodec, RconPacket};

mod rcon;
pub use rcon::{ConnectionState, DisconnectSignal, RconClient};

mod log_message;
pub use log_message::{start_log_listener, LogListener, LogMessage};

pub mod query_packet;
pub use query_packet::{Environment, PlayerInfo, ServerType, SourceInfo, SourceTv};

pub mod minecraft_query;
pub use minecraft_query::MinecraftStat;

mod query;
pub use query::{QueryClient, QueryPhase, QueryVariant, ServerInfo};

mod server_address;
pub use server_address::{ServerAddress, DEFAULT_PORT};

mod resolve_address;
pub use resolve_address::{resolve_address, ResolverError};
