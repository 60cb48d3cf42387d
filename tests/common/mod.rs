//! Scripted in-process servers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use gameserver_utilities::{PacketType, RconPacket};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
};

pub async fn read_packet(stream: &mut TcpStream) -> Option<RconPacket> {
    let size = stream.read_i32_le().await.ok()?;
    let mut frame = size.to_le_bytes().to_vec();
    frame.resize(4 + size as usize, 0);
    stream.read_exact(&mut frame[4..]).await.ok()?;
    Some(RconPacket::decode(&frame).expect("client sent a malformed frame"))
}

pub async fn write_packet(stream: &mut TcpStream, id: i32, kind: PacketType, body: &str) {
    let frame = RconPacket::encode(id, kind, body).unwrap();
    let _ = stream.write_all(&frame).await;
}

/// The odd trailing packet Source servers send after echoing an empty
/// `ResponseValue`. Its body holds NULs, so it is framed by hand.
pub async fn write_source_trailer(stream: &mut TcpStream, id: i32) {
    let mut frame = Vec::new();
    frame.extend_from_slice(&14i32.to_le_bytes());
    frame.extend_from_slice(&id.to_le_bytes());
    frame.extend_from_slice(&0i32.to_le_bytes());
    frame.extend_from_slice(&[0, 0, 0, 1, 0, 0]);
    let _ = stream.write_all(&frame).await;
}

/// Accepts one connection and grants its login, whatever the password.
pub async fn accept_and_login(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let auth = read_packet(&mut stream).await.unwrap();
    write_packet(&mut stream, auth.request_id, PacketType::AuthResponse, "").await;
    stream
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Script {
    /// Send an empty `ResponseValue` before the auth reply.
    pub noisy_auth: bool,
    /// Hang up after reading this many commands.
    pub drop_after_commands: Option<usize>,
}

/// Runs one console session per accepted connection.
///
/// `respond` maps a command to the fragments sent back for it; `None`
/// leaves both the command and its trailing empty packet unanswered.
pub async fn rcon_server<F>(password: &'static str, script: Script, respond: F) -> SocketAddr
where
    F: Fn(&str) -> Option<Vec<String>> + Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve(stream, password, script, respond.clone()));
        }
    });

    addr
}

async fn serve<F>(mut stream: TcpStream, password: &str, script: Script, respond: F)
where
    F: Fn(&str) -> Option<Vec<String>>,
{
    let Some(auth) = read_packet(&mut stream).await else {
        return;
    };
    assert_eq!(auth.kind(), Some(PacketType::Auth));

    if script.noisy_auth {
        write_packet(&mut stream, auth.request_id, PacketType::ResponseValue, "").await;
    }
    if auth.body() != password {
        write_packet(&mut stream, -1, PacketType::AuthResponse, "").await;
        return;
    }
    write_packet(&mut stream, auth.request_id, PacketType::AuthResponse, "").await;

    let mut commands = 0;
    let mut unanswered_sentinels = 0;
    while let Some(packet) = read_packet(&mut stream).await {
        match packet.request_type {
            2 => {
                commands += 1;
                match respond(&packet.body()) {
                    Some(fragments) => {
                        for fragment in fragments {
                            write_packet(
                                &mut stream,
                                packet.request_id,
                                PacketType::ResponseValue,
                                &fragment,
                            )
                            .await;
                        }
                    }
                    None => unanswered_sentinels += 1,
                }
                if script.drop_after_commands == Some(commands) {
                    return;
                }
            }
            0 if unanswered_sentinels > 0 => unanswered_sentinels -= 1,
            0 => {
                write_packet(&mut stream, packet.request_id, PacketType::ResponseValue, "").await;
                write_source_trailer(&mut stream, packet.request_id).await;
            }
            other => panic!("unexpected packet type {other}"),
        }
    }
}

/// `"echo <text>"` answers `<text>` split into one fragment per character.
pub fn echo(command: &str) -> Option<Vec<String>> {
    let text = command.strip_prefix("echo ")?;
    Some(text.chars().map(String::from).collect())
}

pub async fn udp_server() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

pub async fn recv_datagram(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 65_535];
    let (len, from) = socket.recv_from(&mut buf).await.unwrap();
    buf.truncate(len);
    (buf, from)
}
