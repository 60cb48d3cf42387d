//! Remote console client.
//!
//! One background task owns the socket for the whole session. It writes
//! each command followed by an empty `ResponseValue` packet with the next
//! id. The server answers in order, so once that empty packet's echo shows
//! up every fragment of the command's output has already arrived.

use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::FramedRead;

use crate::config::RconConfig;
use crate::error::{Error, Result};
use crate::rcon_packet::{PacketType, RconCodec, RconPacket};
use crate::server_address::ServerAddress;
use crate::text;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

#[derive(Debug)]
enum Request {
    Command {
        command_id: i32,
        sentinel_id: i32,
        frames: Vec<u8>,
        reply: oneshot::Sender<Result<String>>,
    },
    Cancel {
        command_id: i32,
    },
    Close,
}

/// An authenticated console session. Clones share the same connection, so
/// any number of tasks can run commands at once.
#[derive(Debug, Clone)]
pub struct RconClient {
    requests: mpsc::UnboundedSender<Request>,
    next_id: Arc<AtomicI32>,
    state: watch::Receiver<ConnectionState>,
    command_timeout: Duration,
}

impl RconClient {
    /// Connects and logs in. `retry_count` extra attempts are made if the TCP
    /// connect itself fails; a wrong password is never retried.
    pub async fn connect(address: &ServerAddress, password: &str, retry_count: u32) -> Result<Self> {
        let config = RconConfig {
            retry_count,
            ..RconConfig::default()
        };
        RconClient::connect_with_config(address, password, &config).await
    }

    /// Like [`RconClient::connect`], with every deadline and limit taken
    /// from `config`. `connect_timeout` covers each TCP attempt and, once
    /// connected, the login exchange. A login that misses it drops the
    /// socket and fails as [`Error::ConnectionFailed`].
    pub async fn connect_with_config(
        address: &ServerAddress,
        password: &str,
        config: &RconConfig,
    ) -> Result<Self> {
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let (stream, attempts) = open_stream(address, config).await?;
        state_tx.send_replace(ConnectionState::Authenticating);

        let (read_half, mut writer) = stream.into_split();
        let mut frames = FramedRead::new(read_half, RconCodec::new(config.max_frame_size));
        let next_id = Arc::new(AtomicI32::new(1));
        let auth_id = next_id.fetch_add(1, Ordering::Relaxed);

        timeout(
            config.connect_timeout(),
            login(&mut writer, &mut frames, auth_id, password),
        )
        .await
        .map_err(|_| Error::ConnectionFailed {
            attempts,
            source: io::Error::new(io::ErrorKind::TimedOut, "login timed out"),
        })??;

        tracing::info!("rcon session with {address} is ready");
        state_tx.send_replace(ConnectionState::Ready);

        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let session = Session {
            frames,
            outgoing,
            writer: tokio::spawn(write_frames(writer, outgoing_rx)),
            requests: requests_rx,
            state: state_tx,
            pending: HashMap::new(),
            sentinels: HashMap::new(),
        };
        tokio::spawn(session.run());

        Ok(RconClient {
            requests,
            next_id,
            state,
            command_timeout: config.command_timeout(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Runs a command with the configured default deadline.
    pub async fn command(&self, command: &str) -> Result<String> {
        self.command_with_timeout(command, self.command_timeout).await
    }

    /// Runs a command and returns its whole output, every fragment joined.
    ///
    /// Hitting the deadline fails only this call. Dropping the future has the
    /// same effect; the session stays up either way.
    pub async fn command_with_timeout(&self, command: &str, deadline: Duration) -> Result<String> {
        if !self.is_connected() {
            return Err(Error::ConnectionLost);
        }

        let command_id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let sentinel_id = command_id.wrapping_add(1);
        let mut frames = RconPacket::encode(command_id, PacketType::ExecCommand, command)?;
        frames.extend(RconPacket::encode(sentinel_id, PacketType::ResponseValue, "")?);

        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Command {
                command_id,
                sentinel_id,
                frames,
                reply,
            })
            .map_err(|_| Error::ConnectionLost)?;
        let mut guard = CancelOnDrop {
            requests: &self.requests,
            command_id,
            armed: true,
        };

        tracing::trace!("sent command {command_id}: {command}");
        match timeout(deadline, response).await {
            Ok(result) => {
                guard.armed = false;
                result.unwrap_or(Err(Error::ConnectionLost))
            }
            Err(_) => {
                tracing::debug!("command {command_id} timed out after {deadline:?}");
                Err(Error::Timeout(deadline))
            }
        }
    }

    /// Resolves once the session has ended, for whatever reason.
    pub fn disconnected(&self) -> DisconnectSignal {
        DisconnectSignal {
            state: self.state.clone(),
        }
    }

    /// Calls `callback` exactly once when the session ends.
    pub fn on_disconnect<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let signal = self.disconnected();
        tokio::spawn(async move {
            signal.wait().await;
            callback();
        })
    }

    /// Ends the session. Outstanding commands fail with
    /// [`Error::ConnectionLost`].
    pub async fn close(&self) {
        let _ = self.requests.send(Request::Close);
        self.disconnected().wait().await;
    }
}

/// Fires once when a session reaches [`ConnectionState::Disconnected`].
/// Every clone observes it, including ones taken after the fact.
#[derive(Debug, Clone)]
pub struct DisconnectSignal {
    state: watch::Receiver<ConnectionState>,
}

impl DisconnectSignal {
    pub async fn wait(mut self) {
        // the sender only goes away after publishing Disconnected
        let _ = self
            .state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }
}

struct CancelOnDrop<'a> {
    requests: &'a mpsc::UnboundedSender<Request>,
    command_id: i32,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.requests.send(Request::Cancel {
                command_id: self.command_id,
            });
        }
    }
}

/// Returns the stream and the attempt it took to open it.
async fn open_stream(address: &ServerAddress, config: &RconConfig) -> Result<(TcpStream, u32)> {
    let attempts = config.max_connect_attempts();
    let mut last_error = io::Error::new(io::ErrorKind::Other, "no connect attempt was made");

    for attempt in 1..=attempts {
        tracing::debug!("connecting to {address} (attempt {attempt}/{attempts})");
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        match timeout(config.connect_timeout(), connect).await {
            Ok(Ok(stream)) => return Ok((stream, attempt)),
            Ok(Err(err)) => last_error = err,
            Err(_) => last_error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        }
        tracing::warn!("connect attempt {attempt} to {address} failed: {last_error}");
    }

    Err(Error::ConnectionFailed {
        attempts,
        source: last_error,
    })
}

async fn login(
    writer: &mut OwnedWriteHalf,
    frames: &mut FramedRead<OwnedReadHalf, RconCodec>,
    auth_id: i32,
    password: &str,
) -> Result<()> {
    let login_packet = RconPacket::encode(auth_id, PacketType::Auth, password)?;
    writer.write_all(&login_packet).await?;

    loop {
        let packet = frames.next().await.ok_or(Error::ConnectionLost)??;

        // some servers send an empty ResponseValue right before the real reply
        if packet.kind() != Some(PacketType::AuthResponse) {
            tracing::trace!("skipping packet of type {} during login", packet.request_type);
            continue;
        }

        return if packet.request_id == -1 {
            Err(Error::AuthenticationFailed)
        } else if packet.request_id != auth_id {
            Err(Error::UnexpectedPacket {
                expected: auth_id,
                actual: packet.request_id,
            })
        } else {
            Ok(())
        };
    }
}

/// Writes each queued buffer whole, in order, until the session drops the
/// sending side or the socket fails.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) -> io::Result<()> {
    while let Some(frames) = outgoing.recv().await {
        writer.write_all(&frames).await?;
    }
    writer.shutdown().await
}

/// Why a session stopped.
#[derive(Debug)]
enum Ending {
    /// The server sent a frame that cannot be parsed; the stream cannot be
    /// resynced after it.
    Malformed(&'static str),
    Lost(String),
    Closed,
}

impl Ending {
    fn error(&self) -> Error {
        match self {
            Ending::Malformed(reason) => Error::MalformedPacket(reason),
            Ending::Lost(_) | Ending::Closed => Error::ConnectionLost,
        }
    }
}

impl fmt::Display for Ending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ending::Malformed(reason) => write!(f, "malformed frame from server: {reason}"),
            Ending::Lost(reason) => f.write_str(reason),
            Ending::Closed => f.write_str("closed by client"),
        }
    }
}

struct Pending {
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<String>>,
}

/// The background half of a client. Only this task reads the socket or
/// touches the table of outstanding commands. Writes go through a second
/// task so a slow write never stops the reads.
struct Session {
    frames: FramedRead<OwnedReadHalf, RconCodec>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    writer: JoinHandle<io::Result<()>>,
    requests: mpsc::UnboundedReceiver<Request>,
    state: watch::Sender<ConnectionState>,
    pending: HashMap<i32, Pending>,
    /// sentinel id -> command id
    sentinels: HashMap<i32, i32>,
}

impl Session {
    async fn run(mut self) {
        let ending = loop {
            tokio::select! {
                frame = self.frames.next() => match frame {
                    Some(Ok(packet)) => self.route(packet),
                    Some(Err(Error::MalformedPacket(reason))) => break Ending::Malformed(reason),
                    Some(Err(err)) => break Ending::Lost(err.to_string()),
                    None => break Ending::Lost("server closed the connection".to_string()),
                },
                written = &mut self.writer => match written {
                    Ok(Err(err)) => break Ending::Lost(err.to_string()),
                    Ok(Ok(())) => break Ending::Lost("writer stopped".to_string()),
                    Err(err) => break Ending::Lost(err.to_string()),
                },
                request = self.requests.recv() => match request {
                    Some(Request::Command { command_id, sentinel_id, frames, reply }) => {
                        self.dispatch(command_id, sentinel_id, frames, reply);
                    }
                    Some(Request::Cancel { command_id }) => self.forget(command_id),
                    Some(Request::Close) | None => break Ending::Closed,
                },
            }
        };

        self.shutdown(ending);
    }

    fn dispatch(
        &mut self,
        command_id: i32,
        sentinel_id: i32,
        frames: Vec<u8>,
        reply: oneshot::Sender<Result<String>>,
    ) {
        if reply.is_closed() {
            return;
        }
        self.pending.insert(
            command_id,
            Pending {
                payload: Vec::new(),
                reply,
            },
        );
        self.sentinels.insert(sentinel_id, command_id);
        // the writer only hangs up after failing, which the select loop sees
        let _ = self.outgoing.send(frames);
    }

    fn route(&mut self, packet: RconPacket) {
        if let Some(pending) = self.pending.get_mut(&packet.request_id) {
            pending.payload.extend_from_slice(&packet.payload);
            return;
        }

        if let Some(command_id) = self.sentinels.remove(&packet.request_id) {
            if let Some(pending) = self.pending.remove(&command_id) {
                let _ = pending.reply.send(Ok(text::decode_body(&pending.payload)));
            }
            return;
        }

        // Source servers follow the sentinel echo with one more packet
        tracing::trace!("ignoring packet {} with nobody waiting", packet.request_id);
    }

    fn forget(&mut self, command_id: i32) {
        if self.pending.remove(&command_id).is_some() {
            self.sentinels.retain(|_, pending_id| *pending_id != command_id);
        }
    }

    fn shutdown(mut self, ending: Ending) {
        match ending {
            Ending::Malformed(_) => tracing::warn!("rcon session ended: {ending}"),
            _ => tracing::info!("rcon session ended: {ending}"),
        }
        // dropping the write half on abort shuts down our side of the socket
        self.writer.abort();
        self.state.send_replace(ConnectionState::Disconnected);

        self.sentinels.clear();
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(ending.error()));
        }

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            if let Request::Command { reply, .. } = request {
                let _ = reply.send(Err(ending.error()));
            }
        }
    }
}
