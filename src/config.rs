use std::time::Duration;

use serde::Deserialize;

/// Largest console frame accepted by default, size field included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 65_536;

/// Settings for a remote console session.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct RconConfig {
    /// Deadline for one connect attempt plus authentication. Defaults to 5
    /// seconds.
    pub connect_timeout_ms: u64,

    /// Deadline used by [`crate::RconClient::command`]. Defaults to 10 seconds.
    pub command_timeout_ms: u64,

    /// How many extra connect attempts are made when the TCP connect itself
    /// fails. A rejected password is never retried. Defaults to 0.
    pub retry_count: u32,

    /// Frames declaring more than this many bytes end the session.
    pub max_frame_size: usize,
}

impl Default for RconConfig {
    fn default() -> Self {
        RconConfig {
            connect_timeout_ms: 5_000,
            command_timeout_ms: 10_000,
            retry_count: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl RconConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Total number of connect attempts, the first one included.
    pub fn max_connect_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// Settings for UDP status queries.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct QueryConfig {
    /// Deadline for each datagram we wait on. Lost datagrams are not resent.
    /// Defaults to 3 seconds.
    pub timeout_ms: u64,

    pub max_datagram_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            timeout_ms: 3_000,
            max_datagram_size: 65_535,
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top level of the front-end's TOML file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub rcon: RconConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
