use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};
use gameserver_utilities::{
    resolve_address, start_log_listener, Config, QueryClient, QueryVariant, RconClient,
    ServerAddress, ServerInfo, DEFAULT_PORT,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const MINECRAFT_QUERY_PORT: u16 = 25565;
const DEFAULT_LOG_BIND: &str = "0.0.0.0:27500";

#[derive(Parser)]
#[command(version, about = "Talk to game servers over RCON and UDP queries")]
struct Cli {
    /// TOML file with optional [rcon] and [query] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Look up this SRV service first, e.g. _minecraft._tcp
    #[arg(long, global = true)]
    srv: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive console; every line read from stdin is run as a command
    Rcon {
        address: String,
        /// Asked for on stdin when left out
        #[arg(short, long)]
        password: Option<String>,
        /// Extra connect attempts, overrides the config file
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Server name, map and player counts
    Info {
        address: String,
        /// Use the Minecraft full-stat query instead of A2S_INFO
        #[arg(long)]
        minecraft: bool,
        #[arg(long)]
        json: bool,
    },
    /// Connected players (Source servers)
    Players {
        address: String,
        #[arg(long)]
        json: bool,
    },
    /// Print log lines a server sends to `logaddress_add`
    Logs {
        #[arg(default_value = DEFAULT_LOG_BIND)]
        bind: String,
    },
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_toml(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let srv = cli.srv.as_deref();

    match cli.command {
        Command::Rcon {
            address,
            password,
            retries,
        } => {
            let address = target(&address, DEFAULT_PORT, srv).await?;
            let mut rcon_config = config.rcon;
            if let Some(retries) = retries {
                rcon_config.retry_count = retries;
            }
            run_console(&address, password, &rcon_config).await?;
        }
        Command::Info {
            address,
            minecraft,
            json,
        } => {
            let (variant, default_port) = if minecraft {
                (QueryVariant::Minecraft, MINECRAFT_QUERY_PORT)
            } else {
                (QueryVariant::Source, DEFAULT_PORT)
            };
            let address = target(&address, default_port, srv).await?;
            let info = QueryClient::new(config.query).query_info(&address, variant).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_info(&info);
            }
        }
        Command::Players { address, json } => {
            let address = target(&address, DEFAULT_PORT, srv).await?;
            let players = QueryClient::new(config.query).query_players(&address).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&players)?);
            } else {
                for player in players {
                    println!(
                        "{:<32} {:>6} {:>8.0}s",
                        player.name, player.score, player.duration
                    );
                }
            }
        }
        Command::Logs { bind } => {
            let listener = start_log_listener(bind, |message| {
                println!("[{}] {}", message.timestamp.format("%Y-%m-%d %H:%M:%S"), message.body);
            })
            .await?;
            listener.await?;
        }
    }

    Ok(())
}

async fn target(
    address: &str,
    default_port: u16,
    srv: Option<&str>,
) -> Result<ServerAddress, Box<dyn Error>> {
    let address = ServerAddress::parse(address, default_port)?;
    match srv {
        Some(_) => Ok(resolve_address(&address, srv).await?),
        None => Ok(address),
    }
}

async fn run_console(
    address: &ServerAddress,
    password: Option<String>,
    config: &gameserver_utilities::RconConfig,
) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let password = match password {
        Some(password) => password,
        None => {
            eprintln!("Enter the RCON password for {address}:");
            lines.next_line().await?.unwrap_or_default()
        }
    };

    let connection = match RconClient::connect_with_config(address, &password, config).await {
        Ok(connection) => connection,
        Err(err) => {
            eprintln!("\x1b[31mConnection failed:\x1b[0m {err}");
            return Ok(());
        }
    };
    connection.on_disconnect(|| eprintln!("\x1b[31mDisconnected from server\x1b[0m"));
    eprintln!("\x1b[32mConnected :)\x1b[0m");

    while let Some(command) = lines.next_line().await? {
        if command.trim().is_empty() {
            continue;
        }
        match connection.command(&command).await {
            Ok(res) => println!("{res}"),
            Err(gameserver_utilities::Error::Timeout(after)) => {
                eprintln!("\x1b[33mNo response within {after:?}\x1b[0m");
            }
            Err(err) => {
                eprintln!("\x1b[31mConnection failed:\x1b[0m {err}");
                return Ok(());
            }
        }
    }

    connection.close().await;
    Ok(())
}

fn print_info(info: &ServerInfo) {
    match info {
        ServerInfo::Source(info) => {
            println!("{}", info.name);
            println!("  game:    {} ({})", info.game, info.app_id);
            println!("  map:     {}", info.map);
            println!(
                "  players: {}/{} ({} bots)",
                info.players, info.max_players, info.bots
            );
            println!("  version: {}", info.version);
            println!("  vac:     {}", info.vac_secured);
        }
        ServerInfo::Minecraft(stat) => {
            println!("{}", stat.motd);
            println!("  version: {}", stat.version);
            println!("  map:     {}", stat.map);
            println!("  players: {}/{}", stat.num_players, stat.max_players);
            for player in &stat.players {
                println!("    {player}");
            }
        }
    }
}
