//! Connectionless status queries over UDP.
//!
//! Every call binds its own ephemeral socket, runs the challenge exchange and
//! drops the socket again, so concurrent queries never share state.

use std::{fmt, net::SocketAddr};

use serde::Serialize;
use tokio::net::{lookup_host, UdpSocket};

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::minecraft_query::{self, MinecraftStat};
use crate::packetutil::exchange_datagram;
use crate::query_packet::{self, PlayerInfo, SourceInfo, NO_CHALLENGE};
use crate::resolve_address::ResolverError;
use crate::server_address::ServerAddress;

/// Where a query exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Idle,
    ChallengeSent,
    ChallengeReceived,
    RequestSent,
    ResponseReceived,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            QueryPhase::Idle => "idle",
            QueryPhase::ChallengeSent => "waiting for a challenge",
            QueryPhase::ChallengeReceived => "holding a challenge",
            QueryPhase::RequestSent => "waiting for the response",
            QueryPhase::ResponseReceived => "reading the response",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryVariant {
    Source,
    Minecraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ServerInfo {
    Source(SourceInfo),
    Minecraft(MinecraftStat),
}

#[derive(Debug, Clone, Default)]
pub struct QueryClient {
    config: QueryConfig,
}

impl QueryClient {
    pub fn new(config: QueryConfig) -> Self {
        QueryClient { config }
    }

    /// Server status for either protocol family.
    pub async fn query_info(&self, address: &ServerAddress, variant: QueryVariant) -> Result<ServerInfo> {
        match variant {
            QueryVariant::Source => self.info(address).await.map(ServerInfo::Source),
            QueryVariant::Minecraft => self.minecraft_stat(address).await.map(ServerInfo::Minecraft),
        }
    }

    pub async fn query_players(&self, address: &ServerAddress) -> Result<Vec<PlayerInfo>> {
        self.players(address).await
    }

    /// `A2S_INFO`. If the server answers with a challenge, the original
    /// request is sent again with the challenge appended.
    pub async fn info(&self, address: &ServerAddress) -> Result<SourceInfo> {
        let socket = self.open(address).await?;

        let mut response = self
            .exchange(&socket, &query_packet::info_request(None), QueryPhase::RequestSent)
            .await?;
        if let Some(challenge) = query_packet::parse_challenge(&response) {
            tracing::trace!("{address}: {}, challenge {challenge:02x?}", QueryPhase::ChallengeReceived);
            response = self
                .exchange(
                    &socket,
                    &query_packet::info_request(Some(challenge)),
                    QueryPhase::RequestSent,
                )
                .await?;
        }

        tracing::trace!("{address}: {}", QueryPhase::ResponseReceived);
        query_packet::parse_info(&response)
    }

    /// `A2S_PLAYER`. An empty reply to the challenge request gives an empty
    /// list rather than an error.
    pub async fn players(&self, address: &ServerAddress) -> Result<Vec<PlayerInfo>> {
        let socket = self.open(address).await?;

        let response = self
            .exchange(&socket, &query_packet::player_request(NO_CHALLENGE), QueryPhase::ChallengeSent)
            .await?;
        if query_packet::is_player_list(&response) {
            // some servers skip the challenge entirely
            return query_packet::parse_players(&response);
        }
        let challenge = match query_packet::parse_challenge(&response) {
            Some(challenge) => challenge,
            None if response.len() < 9 => {
                tracing::debug!("{address}: empty challenge reply, assuming no players");
                return Ok(Vec::new());
            }
            None => {
                return Err(Error::MalformedResponse(
                    "expected a challenge for the player request".to_string(),
                ))
            }
        };
        tracing::trace!("{address}: {}, challenge {challenge:02x?}", QueryPhase::ChallengeReceived);

        let response = self
            .exchange(&socket, &query_packet::player_request(challenge), QueryPhase::RequestSent)
            .await?;
        tracing::trace!("{address}: {}", QueryPhase::ResponseReceived);
        query_packet::parse_players(&response)
    }

    /// Minecraft full stat: handshake for a token, then the stat request.
    pub async fn minecraft_stat(&self, address: &ServerAddress) -> Result<MinecraftStat> {
        let socket = self.open(address).await?;

        let response = self
            .exchange(&socket, &minecraft_query::handshake_request(), QueryPhase::ChallengeSent)
            .await?;
        let token = minecraft_query::parse_challenge(&response)?;
        tracing::trace!("{address}: {}, token {token}", QueryPhase::ChallengeReceived);

        let response = self
            .exchange(&socket, &minecraft_query::stat_request(token), QueryPhase::RequestSent)
            .await?;
        tracing::trace!("{address}: {}", QueryPhase::ResponseReceived);
        minecraft_query::parse_stat(&response)
    }

    async fn open(&self, address: &ServerAddress) -> Result<UdpSocket> {
        let target: SocketAddr = lookup_host((address.host.as_str(), address.port))
            .await?
            .next()
            .ok_or(ResolverError::NoIp)?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        tracing::trace!("{address}: {} via {}", QueryPhase::Idle, socket.local_addr()?);
        Ok(socket)
    }

    async fn exchange(&self, socket: &UdpSocket, payload: &[u8], phase: QueryPhase) -> Result<Vec<u8>> {
        exchange_datagram(
            socket,
            payload,
            self.config.timeout(),
            self.config.max_datagram_size,
            phase,
        )
        .await
    }
}
