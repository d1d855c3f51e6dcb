//! A single authenticated console connection to one game server instance
//!
//! A session owns its socket outright and runs one command at a time to
//! completion. `execute` takes `&mut self`, so two commands can never share
//! the socket; callers that share a session across tasks put it behind a
//! lock (see `registry`).
//!
//! Responses longer than one packet arrive as several fragments with the
//! same id. With [`Completion::TrailingProbe`] every command is followed by
//! an empty command, and everything received for the real command before the
//! probe's echo is the response.

use crate::config::{Completion, ConsoleConfig, Credential};
use crate::error::{ConsoleError, ExchangeFailure};
use bytes::BytesMut;
use log::{debug, info, warn};
use protocol::{PacketType, Response, AUTH_FAILED_ID};
use rand::Rng;
use std::future::Future;
use std::io;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Opens the byte stream a session runs over
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(&self, host: &str, port: u16)
        -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP, as spoken by the game servers
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Authenticated console connection for one instance
pub struct Session<S = TcpStream> {
    instance: String,
    host: String,
    port: u16,
    credential: Credential,
    stream: Option<S>,
    read_buf: BytesMut,
    next_id: i32,
    completion: Completion,
    authenticated: bool,
    broken: bool,
    last_activity: Instant,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Connects and logs in within `config.connect_timeout`
    pub async fn open<C>(
        connector: &C,
        instance: &str,
        host: &str,
        port: u16,
        credential: Credential,
        config: &ConsoleConfig,
    ) -> Result<Self, ConsoleError>
    where
        C: Connector<Stream = S>,
    {
        let addr = format!("{}:{}", host, port);
        let attempt = async {
            let stream =
                connector
                    .connect(host, port)
                    .await
                    .map_err(|source| ConsoleError::Connection {
                        instance: instance.to_string(),
                        addr: addr.clone(),
                        source,
                    })?;
            let mut session = Session::new(
                instance,
                host,
                port,
                credential,
                stream,
                random_first_id(),
                config.completion,
            );
            session.authenticate().await?;
            Ok::<_, ConsoleError>(session)
        };

        match timeout(config.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "[{}] no login answer from {} within {:?}",
                    instance, addr, config.connect_timeout
                );
                Err(ConsoleError::ConnectTimeout {
                    instance: instance.to_string(),
                    addr,
                    timeout: config.connect_timeout,
                })
            }
        }
    }

    /// Logs in over an already connected stream within `config.connect_timeout`
    pub async fn establish(
        instance: &str,
        host: &str,
        port: u16,
        credential: Credential,
        stream: S,
        config: &ConsoleConfig,
    ) -> Result<Self, ConsoleError> {
        let mut session = Session::new(
            instance,
            host,
            port,
            credential,
            stream,
            random_first_id(),
            config.completion,
        );

        match timeout(config.connect_timeout, session.authenticate()).await {
            Ok(Ok(())) => Ok(session),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                session.close().await;
                Err(ConsoleError::ConnectTimeout {
                    instance: instance.to_string(),
                    addr: session.addr(),
                    timeout: config.connect_timeout,
                })
            }
        }
    }

    pub(crate) fn new(
        instance: &str,
        host: &str,
        port: u16,
        credential: Credential,
        stream: S,
        first_id: i32,
        completion: Completion,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            host: host.to_string(),
            port,
            credential,
            stream: Some(stream),
            read_buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            next_id: first_id,
            completion,
            authenticated: false,
            broken: false,
            last_activity: Instant::now(),
        }
    }

    /// Sends the password and waits for the server's verdict
    pub(crate) async fn authenticate(&mut self) -> Result<(), ConsoleError> {
        let auth_id = self.next_request_id();
        let frame = protocol::encode_auth(auth_id, self.credential.expose()).map_err(|source| {
            ConsoleError::Encoding {
                instance: self.instance.clone(),
                source,
            }
        })?;

        if let Err(failure) = self.send(&frame).await {
            return Err(self.connection_error(failure));
        }

        loop {
            let response = match self.read_response().await {
                Ok(response) => response,
                Err(failure) => return Err(self.connection_error(failure)),
            };

            match response.kind {
                PacketType::AuthResponse if response.id == AUTH_FAILED_ID => {
                    warn!("[{}] console password rejected", self.instance);
                    self.close().await;
                    return Err(ConsoleError::Authentication {
                        instance: self.instance.clone(),
                    });
                }
                PacketType::AuthResponse if response.id == auth_id => {
                    self.authenticated = true;
                    self.last_activity = Instant::now();
                    info!("[{}] console session open to {}", self.instance, self.addr());
                    return Ok(());
                }
                // Servers send an empty RESPONSE_VALUE ahead of the verdict
                kind => debug!(
                    "[{}] ignoring {:?} frame {} during login",
                    self.instance, kind, response.id
                ),
            }
        }
    }

    /// Runs one command and returns its complete, reassembled response.
    ///
    /// Any failure after the command went out leaves the session broken:
    /// the reader may be positioned mid-frame, so the caller has to close
    /// it. Dropping the returned future part way has the same effect.
    pub async fn execute(&mut self, command: &str, limit: Duration) -> Result<String, ConsoleError> {
        if self.broken {
            return Err(ConsoleError::SessionBroken {
                instance: self.instance.clone(),
            });
        }
        if self.stream.is_none() {
            return Err(ConsoleError::NotConnected {
                instance: self.instance.clone(),
            });
        }

        let command_id = self.next_request_id();
        let mut outgoing = BytesMut::new();
        outgoing.extend_from_slice(&self.encode_command(command_id, command)?);

        let probe_id = match self.completion {
            Completion::TrailingProbe => {
                let probe_id = self.next_request_id();
                outgoing.extend_from_slice(&self.encode_command(probe_id, "")?);
                Some(probe_id)
            }
            Completion::FinalFragment => None,
        };

        debug!("[{}] sending '{}' as request {}", self.instance, command, command_id);

        self.broken = true;
        match timeout(limit, self.exchange(&outgoing, command_id, probe_id)).await {
            Ok(Ok(body)) => {
                self.broken = false;
                self.last_activity = Instant::now();
                Ok(body)
            }
            Ok(Err(source)) => {
                warn!("[{}] '{}' failed: {}", self.instance, command, source);
                Err(ConsoleError::Execution {
                    instance: self.instance.clone(),
                    command: command.to_string(),
                    source,
                })
            }
            Err(_) => {
                warn!("[{}] '{}' timed out after {:?}", self.instance, command, limit);
                Err(ConsoleError::ExecutionTimeout {
                    instance: self.instance.clone(),
                    command: command.to_string(),
                    timeout: limit,
                })
            }
        }
    }

    /// Releases the socket. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("[{}] shutdown after close: {}", self.instance, e);
            }
            info!("[{}] console session closed", self.instance);
        }
        self.authenticated = false;
        self.read_buf.clear();
    }

    async fn exchange(
        &mut self,
        outgoing: &[u8],
        command_id: i32,
        probe_id: Option<i32>,
    ) -> Result<String, ExchangeFailure> {
        self.send(outgoing).await?;

        let mut body = BytesMut::new();
        loop {
            let response = self.read_response().await?;

            if response.kind != PacketType::ResponseValue {
                debug!(
                    "[{}] ignoring {:?} frame {} mid-command",
                    self.instance, response.kind, response.id
                );
                continue;
            }
            if probe_id == Some(response.id) {
                return Ok(into_text(body));
            }
            if response.id != command_id {
                // Leftovers from an earlier exchange, e.g. extra probe echoes
                debug!("[{}] discarding stale frame {}", self.instance, response.id);
                continue;
            }

            body.extend_from_slice(&response.body);
            if probe_id.is_none() && response.is_final_fragment {
                return Ok(into_text(body));
            }
        }
    }

    fn encode_command(&self, id: i32, command: &str) -> Result<bytes::Bytes, ConsoleError> {
        protocol::encode_request(id, command).map_err(|source| ConsoleError::Encoding {
            instance: self.instance.clone(),
            source,
        })
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ExchangeFailure> {
        let stream = self.stream.as_mut().ok_or(ExchangeFailure::Closed)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads until one whole frame is buffered; frames may straddle reads
    async fn read_response(&mut self) -> Result<Response, ExchangeFailure> {
        loop {
            if let Some(response) = protocol::next_response(&mut self.read_buf)? {
                return Ok(response);
            }

            let stream = self.stream.as_mut().ok_or(ExchangeFailure::Closed)?;
            if stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ExchangeFailure::Closed);
            }
        }
    }

    fn connection_error(&self, failure: ExchangeFailure) -> ConsoleError {
        let source = match failure {
            ExchangeFailure::Io(err) => err,
            ExchangeFailure::Closed => io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during login",
            ),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        };

        ConsoleError::Connection {
            instance: self.instance.clone(),
            addr: self.addr(),
            source,
        }
    }

    fn next_request_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = if id >= i32::MAX - 1 { 1 } else { id + 1 };
        id
    }
}

impl<S> Session<S> {
    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Socket held, login accepted, and no failure since
    pub fn is_open(&self) -> bool {
        self.stream.is_some() && self.authenticated && !self.broken
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

/// Decodes the joined fragments; characters split across fragments survive
fn into_text(body: BytesMut) -> String {
    String::from_utf8_lossy(&body).into_owned()
}

fn random_first_id() -> i32 {
    rand::thread_rng().gen_range(1..=0x3fff_ffff)
}
